//! Configuration file handling

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Diagnostics side-channel settings
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    /// Launch request defaults
    #[serde(default)]
    pub launch: LaunchDefaults,

    /// External deploy tool used for `contractFile` launches
    #[serde(default)]
    pub deploy: DeployConfig,

    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Diagnostics side-channel settings
#[derive(Debug, Deserialize)]
pub struct DiagnosticsConfig {
    /// Whether to open the diagnostics listener at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Address the diagnostics listener binds to
    #[serde(default = "default_diagnostics_address")]
    pub address: SocketAddr,

    /// How long to wait for a diagnostics client before serving DAP
    #[serde(default)]
    pub startup_wait_ms: u64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: default_diagnostics_address(),
            startup_wait_ms: 0,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_diagnostics_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9000))
}

/// Defaults applied to launch arguments the client leaves out
#[derive(Debug, Clone, Deserialize)]
pub struct LaunchDefaults {
    /// RPC endpoint used when `rpc` is absent
    #[serde(default = "default_rpc")]
    pub default_rpc: String,

    /// Fork port used when `forkPort` is absent
    #[serde(default = "default_fork_port")]
    pub default_fork_port: u16,
}

impl Default for LaunchDefaults {
    fn default() -> Self {
        Self {
            default_rpc: default_rpc(),
            default_fork_port: default_fork_port(),
        }
    }
}

fn default_rpc() -> String {
    "http://localhost:8545".to_string()
}

fn default_fork_port() -> u16 {
    8545
}

/// External deploy tool configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DeployConfig {
    /// Program that compiles and deploys a contract file
    pub command: Option<String>,

    /// Additional arguments placed before the generated ones
    #[serde(default)]
    pub args: Vec<String>,
}

/// Log output settings
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Also write logs to `<data dir>/logs/adapter.log`
    #[serde(default = "default_true")]
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { file: true }
    }
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }

    /// Resolve the deploy command to an executable path
    ///
    /// Bare names are searched on PATH
    pub fn deploy_command(&self) -> Option<PathBuf> {
        let command = self.deploy.command.as_deref()?;
        let path = PathBuf::from(command);
        if path.components().count() > 1 {
            return Some(path);
        }
        which::which(command).ok()
    }
}
