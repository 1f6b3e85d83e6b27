//! `switchboard config`: configuration management commands.

use std::path::{Path, PathBuf};

use switchboard_config::RunnerConfig;
use switchboard_core::ConversationMemory;

use super::load_config;

pub fn validate(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match load_config(config_path) {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let mut warnings = Vec::new();
            if config.max_turns > 100 {
                warnings.push("max_turns above 100 lets a looping agent run for a long time");
            }
            if config.stream_buffer < 8 {
                warnings.push("stream_buffer below 8 makes streamed runs wait on slow consumers");
            }

            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            let memory = match config.memory.to_conversation_memory()? {
                ConversationMemory::FullHistory => "full history".to_string(),
                ConversationMemory::ServerConversation { conversation_id } => {
                    format!("server conversation ({conversation_id})")
                }
                ConversationMemory::ServerPreviousResponse { .. } => "previous response chain".to_string(),
            };

            println!();
            println!("   Max turns:    {}", config.max_turns);
            println!("   Tool errors:  {:?}", config.tool_errors);
            println!("   Memory:       {memory}");
            println!(
                "   Tracing:      {}",
                if config.tracing.enabled { "enabled" } else { "disabled" }
            );
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub fn show(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub fn path(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", resolve_path(config_path).display());
    Ok(())
}

fn resolve_path(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| RunnerConfig::config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_path_is_under_config_dir() {
        let path = resolve_path(None);
        assert!(path.starts_with(RunnerConfig::config_dir()));
        assert!(path.to_str().unwrap().ends_with("config.toml"));
    }

    #[test]
    fn explicit_path_wins() {
        let path = resolve_path(Some(Path::new("/etc/switchboard.toml")));
        assert_eq!(path, PathBuf::from("/etc/switchboard.toml"));
    }
}
