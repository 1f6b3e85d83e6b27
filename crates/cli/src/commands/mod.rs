pub mod config_cmd;
pub mod run;

use std::path::Path;

use switchboard_config::{ConfigError, RunnerConfig};

/// Load the config from `path` when given, else from the default location.
/// Environment overrides apply either way.
pub fn load_config(path: Option<&Path>) -> Result<RunnerConfig, ConfigError> {
    match path {
        Some(path) => {
            let mut config = RunnerConfig::load_from(path)?;
            config.apply_env(|key| std::env::var(key).ok())?;
            config.validate()?;
            Ok(config)
        }
        None => RunnerConfig::load(),
    }
}
