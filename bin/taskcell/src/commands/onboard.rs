use std::io::{self, Write};
use taskcell_core::{Config, Paths};

pub async fn run(force: bool) -> anyhow::Result<()> {
    let paths = Paths::new();

    if paths.config_file().exists() && !force {
        print!("Config already exists. Overwrite? [y/N] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }

    paths.ensure_dirs()?;
    Config::default().save(&paths.config_file())?;
    println!("✓ Created config: {}", paths.config_file().display());
    println!("✓ Created workspace: {}", paths.workspace().display());
    println!();
    println!("Next steps:");
    println!(
        "  1. Edit {} and point driver.command.program at your automation runner",
        paths.config_file().display()
    );
    println!("     (or set driver.kind to \"scripted\" to try things without one)");
    println!("  2. Run `taskcell run --task \"open example.com and read the title\"`");
    println!("  3. Run `taskcell stdio` or `taskcell gateway` to serve requests");

    Ok(())
}
