pub mod config_cmd;
pub mod gateway;
pub mod onboard;
pub mod run_cmd;
pub mod stdio;
pub mod tools_cmd;

use taskcell_agent::TaskController;
use taskcell_core::{Config, Paths};
use taskcell_driver::create_driver;

/// Load config and wire the driver into a controller.
pub(crate) fn build_controller() -> anyhow::Result<(Config, Paths, TaskController)> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    let driver = create_driver(&config, &paths)?;
    let controller = TaskController::new(driver, config.controller.clone());
    Ok((config, paths, controller))
}
