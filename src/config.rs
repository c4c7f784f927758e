//! Server configuration, from environment with CLI overrides.

use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::session::EngineConfig;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to a TOML settings file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory for saved games and results (overrides POKER_DATA_DIR)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Discussion window in seconds (overrides POKER_DISCUSSION_SECS)
    #[arg(long)]
    pub discussion_secs: Option<u64>,

    /// Settle delay between rounds in seconds (overrides POKER_ROUND_DELAY_SECS)
    #[arg(long)]
    pub round_delay_secs: Option<u64>,

    /// Vote value that pauses the session when unanimous (overrides POKER_PAUSE_TOKEN)
    #[arg(long)]
    pub pause_token: Option<String>,
}

/// Resolved server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub data_dir: PathBuf,
    pub engine: EngineConfig,
}

impl ServerConfig {
    /// Environment defaults. Unset or unparsable variables fall back
    /// to the built-in values.
    pub fn from_env() -> Self {
        let defaults = EngineConfig::default();
        Self {
            data_dir: std::env::var("POKER_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            engine: EngineConfig {
                discussion_window: env_secs("POKER_DISCUSSION_SECS")
                    .unwrap_or(defaults.discussion_window),
                round_delay: env_secs("POKER_ROUND_DELAY_SECS").unwrap_or(defaults.round_delay),
                pause_token: std::env::var("POKER_PAUSE_TOKEN")
                    .unwrap_or(defaults.pause_token),
            },
        }
    }

    /// Layer a settings file over the environment defaults.
    pub fn apply_file(mut self, file: &FileConfig) -> Self {
        if let Some(dir) = &file.data_dir {
            self.data_dir = dir.clone();
        }
        if let Some(secs) = file.discussion_secs {
            self.engine.discussion_window = Duration::from_secs(secs);
        }
        if let Some(secs) = file.round_delay_secs {
            self.engine.round_delay = Duration::from_secs(secs);
        }
        if let Some(token) = &file.pause_token {
            self.engine.pause_token = token.clone();
        }
        self
    }

    /// Apply CLI overrides on top of the environment.
    pub fn apply_args(mut self, args: &Args) -> Self {
        if let Some(dir) = &args.data_dir {
            self.data_dir = dir.clone();
        }
        if let Some(secs) = args.discussion_secs {
            self.engine.discussion_window = Duration::from_secs(secs);
        }
        if let Some(secs) = args.round_delay_secs {
            self.engine.round_delay = Duration::from_secs(secs);
        }
        if let Some(token) = &args.pause_token {
            self.engine.pause_token = token.clone();
        }
        self
    }
}

/// Optional TOML settings file; every field may be omitted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub data_dir: Option<PathBuf>,
    pub discussion_secs: Option<u64>,
    pub round_delay_secs: Option<u64>,
    pub pause_token: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_override_env_defaults() {
        let config = ServerConfig {
            data_dir: PathBuf::from("."),
            engine: EngineConfig::default(),
        };
        let args = Args {
            config: None,
            data_dir: Some(PathBuf::from("/tmp/poker")),
            discussion_secs: Some(30),
            round_delay_secs: None,
            pause_token: Some("tea".to_string()),
        };
        let config = config.apply_args(&args);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/poker"));
        assert_eq!(config.engine.discussion_window, Duration::from_secs(30));
        assert_eq!(config.engine.round_delay, Duration::from_secs(2));
        assert_eq!(config.engine.pause_token, "tea");
    }

    #[test]
    fn test_file_config_partial_toml() {
        let file: FileConfig =
            toml::from_str("discussion_secs = 90\npause_token = \"break\"").unwrap();
        let config = ServerConfig {
            data_dir: PathBuf::from("."),
            engine: EngineConfig::default(),
        }
        .apply_file(&file);
        assert_eq!(config.engine.discussion_window, Duration::from_secs(90));
        assert_eq!(config.engine.pause_token, "break");
        assert_eq!(config.data_dir, PathBuf::from("."));
    }
}
