use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    /// Wait budget for `run_task_and_wait` when the request sets none.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Sessions older than this are reaped. 0 disables expiry.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// 0 means unlimited.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
    /// Per-session activity log capacity.
    #[serde(default = "default_max_log_lines")]
    pub max_log_lines: usize,
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_session_ttl_secs() -> u64 {
    3600
}

fn default_max_sessions() -> usize {
    10
}

fn default_reap_interval_secs() -> u64 {
    60
}

fn default_max_log_lines() -> usize {
    200
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            session_ttl_secs: default_session_ttl_secs(),
            max_sessions: default_max_sessions(),
            reap_interval_secs: default_reap_interval_secs(),
            max_log_lines: default_max_log_lines(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandDriverConfig {
    /// Executable that performs one task per invocation.
    #[serde(default = "default_program")]
    pub program: String,
    /// `{task}` is replaced by the task text; without it the text is appended.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
}

fn default_program() -> String {
    "browser-use".to_string()
}

fn default_max_output_chars() -> usize {
    10000
}

impl Default for CommandDriverConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: Vec::new(),
            env: HashMap::new(),
            max_output_chars: default_max_output_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptedDriverConfig {
    #[serde(default = "default_scripted_delay_ms")]
    pub delay_ms: u64,
    /// Tasks containing this substring fail.
    #[serde(default)]
    pub fail_on: Option<String>,
}

fn default_scripted_delay_ms() -> u64 {
    200
}

impl Default for ScriptedDriverConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_scripted_delay_ms(),
            fail_on: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverConfig {
    /// "command" or "scripted".
    #[serde(default = "default_driver_kind")]
    pub kind: String,
    #[serde(default)]
    pub headless: bool,
    #[serde(default)]
    pub command: CommandDriverConfig,
    #[serde(default)]
    pub scripted: ScriptedDriverConfig,
}

fn default_driver_kind() -> String {
    "command".to_string()
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            kind: default_driver_kind(),
            headless: false,
            command: CommandDriverConfig::default(),
            scripted: ScriptedDriverConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
}

fn default_gateway_host() -> String {
    "127.0.0.1".to_string()
}

fn default_gateway_port() -> u16 {
    18790
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.controller.default_timeout_secs == 0 {
            return Err(Error::Config(
                "controller.defaultTimeoutSecs must be greater than 0".to_string(),
            ));
        }
        if self.controller.reap_interval_secs == 0 {
            return Err(Error::Config(
                "controller.reapIntervalSecs must be greater than 0".to_string(),
            ));
        }
        match self.driver.kind.as_str() {
            "command" | "scripted" => Ok(()),
            other => Err(Error::Config(format!(
                "Unknown driver kind '{}' (expected 'command' or 'scripted')",
                other
            ))),
        }
    }
}
