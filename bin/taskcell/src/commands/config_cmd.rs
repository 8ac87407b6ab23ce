use taskcell_core::{Config, Paths};

/// Print the effective configuration (file contents merged over defaults).
pub async fn show() -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    if !paths.config_file().exists() {
        eprintln!("No config file at {}, showing defaults.", paths.config_file().display());
    }
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

pub async fn path() -> anyhow::Result<()> {
    println!("{}", Paths::new().config_file().display());
    Ok(())
}
