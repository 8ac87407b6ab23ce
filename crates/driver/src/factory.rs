use std::sync::Arc;
use taskcell_core::{Config, Paths};
use tracing::info;

use crate::{CommandDriver, Driver, ScriptedDriver};

/// Build the driver selected by `config.driver.kind`.
pub fn create_driver(config: &Config, paths: &Paths) -> anyhow::Result<Arc<dyn Driver>> {
    let driver: Arc<dyn Driver> = match config.driver.kind.as_str() {
        "command" => Arc::new(CommandDriver::new(
            config.driver.command.clone(),
            config.driver.headless,
            paths.workspace(),
        )),
        "scripted" => Arc::new(ScriptedDriver::from_config(&config.driver.scripted)),
        other => {
            return Err(anyhow::anyhow!(
                "Unknown driver kind '{}'. Use 'command' or 'scripted'.",
                other
            ))
        }
    };
    info!(driver = driver.name(), "Driver created");
    Ok(driver)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_scripted() {
        let mut config = Config::default();
        config.driver.kind = "scripted".to_string();
        let driver = create_driver(&config, &Paths::with_base("/tmp/taskcell-test".into())).unwrap();
        assert_eq!(driver.name(), "scripted");
    }

    #[test]
    fn test_create_unknown_kind() {
        let mut config = Config::default();
        config.driver.kind = "telepathy".to_string();
        assert!(create_driver(&config, &Paths::with_base("/tmp/taskcell-test".into())).is_err());
    }
}
