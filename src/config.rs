//! Configuration for the coordinator, read from `atelier.toml`.
//!
//! Settings layer in the usual order: file, then environment, then CLI
//! flags. Every section is optional; a missing file yields the defaults.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! port = 4100
//! dev_mode = false
//!
//! [hub]
//! capacity = 256
//!
//! [process]
//! shell = "/bin/bash"
//! workspace = "."
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::coordinator::server::ServerConfig;

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub dev_mode: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            dev_mode: false,
        }
    }
}

/// `[hub]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSection {
    /// Broadcast channel capacity. Slow observers that fall more than this
    /// many frames behind are dropped, never backpressured.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

/// `[process]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSection {
    /// Shell used to run terminal commands (`<shell> -c <command>`).
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Default working directory for new terminal sessions.
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,
}

impl Default for ProcessSection {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            workspace: default_workspace(),
        }
    }
}

fn default_port() -> u16 {
    4100
}

fn default_capacity() -> usize {
    256
}

fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string())
}

fn default_workspace() -> PathBuf {
    PathBuf::from(".")
}

/// The complete atelier.toml configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AtelierToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub hub: HubSection,
    #[serde(default)]
    pub process: ProcessSection,
}

impl AtelierToml {
    /// Load configuration from a specific file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Load `atelier.toml` from the given directory, falling back to
    /// defaults when it does not exist.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let config_path = dir.join("atelier.toml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse atelier.toml")
    }

    /// Apply environment overrides (`ATELIER_PORT`, `ATELIER_SHELL`) on top
    /// of the file layer.
    pub fn apply_env(&mut self) {
        if let Ok(port) = std::env::var("ATELIER_PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
        }
        if let Ok(shell) = std::env::var("ATELIER_SHELL") {
            self.process.shell = shell;
        }
    }

    /// Flatten into the server's runtime config.
    pub fn into_server_config(self) -> ServerConfig {
        ServerConfig {
            port: self.server.port,
            workspace: self.process.workspace,
            shell: self.process.shell,
            hub_capacity: self.hub.capacity,
            dev_mode: self.server.dev_mode,
        }
    }
}
