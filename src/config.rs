use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::catalog::TranslationType;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config directory not found")]
    NoConfigDir,
    #[error("failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("validation failed: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlayerConfig {
    #[serde(default = "default_player_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub translation: TranslationType,
    /// Overrides the platform default IPC socket / pipe path
    pub ipc_path: Option<PathBuf>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            command: default_player_command(),
            args: Vec::new(),
            translation: TranslationType::default(),
            ipc_path: None,
        }
    }
}

fn default_player_command() -> String {
    "mpv".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_stream_host")]
    pub stream_host: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            stream_host: default_stream_host(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl CatalogConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_api_url() -> String {
    "https://api.allanime.day/api".to_string()
}

fn default_stream_host() -> String {
    "https://allanime.day".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Log file location, falling back to the platform state/data dir
    pub fn file_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.file {
            return Some(path.clone());
        }
        ProjectDirs::from("", "", "hisame").map(|dirs| {
            dirs.state_dir()
                .unwrap_or_else(|| dirs.data_local_dir())
                .join("hisame.log")
        })
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load a config file. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn config_path() -> Result<PathBuf, ConfigError> {
        if let Some(path) = std::env::var_os("HISAME_CONFIG_PATH").filter(|p| !p.is_empty()) {
            return Ok(PathBuf::from(path));
        }
        ProjectDirs::from("", "", "hisame")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Apply `HISAME_*` overrides. `lookup` is the environment accessor.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(command) = get("HISAME_PLAYER_COMMAND") {
            self.player.command = command;
        }
        if let Some(args) = get("HISAME_PLAYER_ARGS") {
            self.player.args = split_args(&args);
        }
        if let Some(translation) = get("HISAME_PLAYER_TRANSLATION") {
            match translation.parse() {
                Ok(t) => self.player.translation = t,
                Err(()) => tracing::warn!(value = %translation, "ignoring unknown translation type"),
            }
        }
        if let Some(level) = get("HISAME_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(file) = get("HISAME_LOG_FILE") {
            self.logging.file = Some(PathBuf::from(file));
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.player.command.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "player.command cannot be empty".to_string(),
            ));
        }

        for (key, url) in [
            ("catalog.api_url", &self.catalog.api_url),
            ("catalog.stream_host", &self.catalog.stream_host),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::ValidationError(format!(
                    "{} must start with http:// or https://",
                    key
                )));
            }
        }

        Ok(())
    }
}

/// Split a command-line string on spaces, keeping quoted sections together
pub fn split_args(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in input.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => current.push(c),
            (None, '"' | '\'') => quote = Some(c),
            (None, c) if c.is_whitespace() => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            (None, c) => current.push(c),
        }
    }

    if !current.is_empty() {
        args.push(current);
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.player.command, "mpv");
        assert!(config.player.args.is_empty());
        assert_eq!(config.player.translation, TranslationType::Sub);
        assert_eq!(config.catalog.timeout(), Duration::from_secs(30));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_player_section() {
        let config = Config::parse(
            r#"
[player]
command = "/usr/bin/mpv"
args = ["--fs", "--volume=50"]
translation = "dub"
"#,
        )
        .unwrap();

        assert_eq!(config.player.command, "/usr/bin/mpv");
        assert_eq!(config.player.args, vec!["--fs", "--volume=50"]);
        assert_eq!(config.player.translation, TranslationType::Dub);
    }

    #[test]
    fn test_rejects_unknown_translation() {
        let result = Config::parse("[player]\ntranslation = \"raw\"\n");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_rejects_non_http_catalog_url() {
        let result = Config::parse("[catalog]\napi_url = \"ftp://example.com\"\n");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_missing_file_is_default() {
        let path = std::env::temp_dir().join("hisame-does-not-exist/config.toml");
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.player.command, "mpv");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env_overrides(|name| match name {
            "HISAME_PLAYER_COMMAND" => Some("mpv.com".to_string()),
            "HISAME_PLAYER_ARGS" => Some("--fs --title='my show'".to_string()),
            "HISAME_PLAYER_TRANSLATION" => Some("dub".to_string()),
            "HISAME_LOG_LEVEL" => Some(String::new()),
            _ => None,
        });

        assert_eq!(config.player.command, "mpv.com");
        assert_eq!(config.player.args, vec!["--fs", "--title=my show"]);
        assert_eq!(config.player.translation, TranslationType::Dub);
        // Empty values are ignored
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_split_args() {
        assert_eq!(split_args("--fs  --mute"), vec!["--fs", "--mute"]);
        assert_eq!(
            split_args(r#"--sub-font="Noto Sans" --x"#),
            vec!["--sub-font=Noto Sans", "--x"]
        );
        assert_eq!(split_args("'a b' \"c\""), vec!["a b", "c"]);
        assert!(split_args("   ").is_empty());
    }
}
