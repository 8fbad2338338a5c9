//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::{Config, LogFormat};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "SERIAL_BRIDGE";

/// Config file name
const CONFIG_FILE_NAME: &str = "serial-bridge.toml";

/// Application directory under the platform config directory
const APP_DIR: &str = "serial-bridge";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "SERIAL_BRIDGE_CONFIG";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path (if any)
    pub config_path: Option<PathBuf>,
    /// The loaded configuration
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// 1. `SERIAL_BRIDGE_CONFIG` (explicit path; must exist)
    /// 2. `./serial-bridge.toml`
    /// 3. `$XDG_CONFIG_HOME/serial-bridge/serial-bridge.toml`
    ///    (`%APPDATA%\serial-bridge\` on Windows)
    /// 4. Built-in defaults
    ///
    /// `SERIAL_BRIDGE_<SECTION>_<KEY>` variables are applied on top.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path()?;

        let mut config = match config_path {
            Some(ref path) => load_from_file(path)?,
            None => Config::default(),
        };
        apply_env_overrides(&mut config)?;
        config.validate()?;

        debug!(path = ?config_path, "configuration loaded");
        Ok(Self {
            config_path,
            config,
        })
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Defaults plus environment overrides; invalid overrides are ignored.
    pub fn with_defaults() -> Self {
        let mut config = Config::default();
        if let Err(e) = apply_env_overrides(&mut config) {
            debug!(error = %e, "ignoring environment override");
        }
        if config.validate().is_err() {
            config = Config::default();
        }

        Self {
            config_path: None,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    /// Save the current configuration back to the file it came from.
    pub fn save(&self) -> ConfigResult<()> {
        let path = self.config_path.as_ref().ok_or(ConfigError::NoPath)?;
        save_to_file(&self.config, path)
    }

    /// Save the current configuration to a specific file.
    pub fn save_to(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        save_to_file(&self.config, path.as_ref())
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> ConfigResult<Option<PathBuf>> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }
        return Ok(Some(path));
    }

    let cwd_config = PathBuf::from(CONFIG_FILE_NAME);
    if cwd_config.exists() {
        return Ok(Some(cwd_config));
    }

    Ok(get_default_config_path().filter(|path| path.exists()))
}

/// Get the platform-specific config directory.
fn get_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }
}

/// Directory new config files are written to.
pub fn get_default_config_dir() -> Option<PathBuf> {
    get_config_dir().map(|d| d.join(APP_DIR))
}

/// Default config file path under [`get_default_config_dir`].
pub fn get_default_config_path() -> Option<PathBuf> {
    get_default_config_dir().map(|d| d.join(CONFIG_FILE_NAME))
}

fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn save_to_file(config: &Config, path: &Path) -> ConfigResult<()> {
    let write_error = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_error)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(write_error)
}

/// Parse `SERIAL_BRIDGE_<key>` into `T` if it is set.
fn env_value<T: FromStr>(key: &str, expected: &str) -> ConfigResult<Option<T>> {
    let var = format!("{ENV_PREFIX}_{key}");
    match std::env::var(&var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::env(var, value, expected)),
        Err(_) => Ok(None),
    }
}

/// Apply `SERIAL_BRIDGE_<SECTION>_<KEY>` overrides.
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    if let Some(baud) = env_value("SERIAL_DEFAULT_BAUD", "a baud rate")? {
        config.serial.default_baud = baud;
    }
    if let Some(ms) = env_value("SERIAL_DEFAULT_TIMEOUT_MS", "milliseconds")? {
        config.serial.default_timeout_ms = ms;
    }

    if let Some(ms) = env_value("READER_POLL_TIMEOUT_MS", "milliseconds")? {
        config.reader.poll_timeout_ms = ms;
    }
    if let Some(capacity) = env_value("READER_CHANNEL_CAPACITY", "a chunk count")? {
        config.reader.channel_capacity = capacity;
    }

    if let Some(level) = env_value::<String>("LOGGING_LEVEL", "a filter directive")? {
        config.logging.level = level;
    }
    if let Some(format) = env_value::<LogFormat>("LOGGING_FORMAT", "json, pretty or compact")? {
        config.logging.format = format;
    }

    Ok(())
}
