use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TftpError};
use crate::packet::TFTP_PORT;
use crate::{DEFAULT_MAX_TIMEOUTS, DEFAULT_TIMEOUT_SECS};

/// Which transfer directions the server serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerMode {
    /// Serve RRQs only (the default; TFTP writes are usually off).
    GetOnly,
    /// Serve WRQs only.
    PutOnly,
    /// Serve both directions.
    GetAndPut,
}

impl ServerMode {
    pub fn allows_read(self) -> bool {
        matches!(self, ServerMode::GetOnly | ServerMode::GetAndPut)
    }

    pub fn allows_write(self) -> bool {
        matches!(self, ServerMode::PutOnly | ServerMode::GetAndPut)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TftpConfig {
    pub bind_addr: SocketAddr,
    /// Directory RRQ paths resolve inside.
    pub root_dir: PathBuf,
    /// Directory WRQ paths resolve inside.
    pub write_dir: PathBuf,
    pub mode: ServerMode,
    /// When false, a WRQ for an existing file gets "File already
    /// exists" per RFC 1350.
    pub allow_overwrite: bool,
    pub timeout_secs: u64,
    pub max_timeouts: u32,
    pub logging: LoggingConfig,
}

impl Default for TftpConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), TFTP_PORT),
            root_dir: PathBuf::from("/var/lib/retronet/tftp"),
            write_dir: PathBuf::from("/var/lib/retronet/tftp/incoming"),
            mode: ServerMode::GetOnly,
            allow_overwrite: false,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_timeouts: DEFAULT_MAX_TIMEOUTS,
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text for human readability.
    Text,
    /// JSON lines for log aggregators.
    Json,
}

pub fn load_config(path: &Path) -> Result<TftpConfig> {
    let raw = std::fs::read_to_string(path)?;
    toml::from_str(&raw)
        .map_err(|e| TftpError::InvalidArgument(format!("{}: {e}", path.display())))
}

pub fn write_config(path: &Path, config: &TftpConfig) -> Result<()> {
    let raw = toml::to_string_pretty(config)
        .map_err(|e| TftpError::InvalidArgument(format!("cannot serialize config: {e}")))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, raw)?;
    Ok(())
}

/// Sanity-check a configuration. With `check_dirs` the served
/// directories must already exist.
pub fn validate_config(config: &TftpConfig, check_dirs: bool) -> Result<()> {
    if config.timeout_secs == 0 {
        return Err(TftpError::InvalidArgument(
            "timeout_secs must be at least 1".to_string(),
        ));
    }
    if config.max_timeouts == 0 {
        return Err(TftpError::InvalidArgument(
            "max_timeouts must be at least 1".to_string(),
        ));
    }

    if check_dirs {
        if config.mode.allows_read() && !config.root_dir.is_dir() {
            return Err(TftpError::InvalidArgument(format!(
                "root_dir {} is not a directory",
                config.root_dir.display()
            )));
        }
        if config.mode.allows_write() && !config.write_dir.is_dir() {
            return Err(TftpError::InvalidArgument(format!(
                "write_dir {} is not a directory",
                config.write_dir.display()
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrips_through_toml() {
        let config = TftpConfig::default();
        let raw = toml::to_string_pretty(&config).unwrap();
        let parsed: TftpConfig = toml::from_str(&raw).unwrap();
        assert_eq!(parsed.bind_addr, config.bind_addr);
        assert_eq!(parsed.mode, config.mode);
        assert_eq!(parsed.max_timeouts, config.max_timeouts);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let parsed: TftpConfig = toml::from_str(
            r#"
            root_dir = "/srv/tftp"
            mode = "get-and-put"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.root_dir, PathBuf::from("/srv/tftp"));
        assert_eq!(parsed.mode, ServerMode::GetAndPut);
        assert_eq!(parsed.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert!(!parsed.allow_overwrite);
    }

    #[test]
    fn zero_retry_budget_is_rejected() {
        let config = TftpConfig {
            max_timeouts: 0,
            ..TftpConfig::default()
        };
        assert!(validate_config(&config, false).is_err());
    }

    #[test]
    fn server_mode_direction_predicates() {
        assert!(ServerMode::GetOnly.allows_read());
        assert!(!ServerMode::GetOnly.allows_write());
        assert!(!ServerMode::PutOnly.allows_read());
        assert!(ServerMode::PutOnly.allows_write());
        assert!(ServerMode::GetAndPut.allows_read());
        assert!(ServerMode::GetAndPut.allows_write());
    }
}
