//! Link configuration.
//!
//! Values come from a JSON file, then from environment variables:
//! - `PVLIVE_HOST`: host the simulation connects to (default: "localhost")
//! - `PVLIVE_PORT`: port the visualization listens on (default: "22222")
//! - `PVLIVE_RANK`: process rank; only rank 0 talks to the peer (default: "0")

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LinkError;
use crate::url::ConnectionUrl;

pub const DEFAULT_PORT: u16 = 22222;
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 8000;

/// Which end of the link this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessType {
    /// Catalyst side: connects and pushes its pipeline state.
    #[default]
    Simulation,
    /// Server side: listens and serves remote calls.
    Visualization,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub process_type: ProcessType,
    pub hostname: String,
    pub port: u16,
    pub rank: u32,
    /// Embedded in the handshake; both ends must agree.
    pub version: String,
    /// How long the visualization waits for the initial state.
    pub handshake_timeout_ms: u64,
    /// How long the simulation waits for an update answer. `None` blocks.
    pub update_timeout_ms: Option<u64>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            process_type: ProcessType::default(),
            hostname: "localhost".to_string(),
            port: DEFAULT_PORT,
            rank: 0,
            version: env!("CARGO_PKG_VERSION").to_string(),
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            update_timeout_ms: None,
        }
    }
}

impl LinkConfig {
    pub fn simulation(hostname: impl Into<String>, port: u16) -> Self {
        LinkConfig {
            process_type: ProcessType::Simulation,
            hostname: hostname.into(),
            port,
            ..Self::default()
        }
    }

    pub fn visualization(port: u16) -> Self {
        LinkConfig {
            process_type: ProcessType::Visualization,
            port,
            ..Self::default()
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Reads a JSON config file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, LinkError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|err| LinkError::Config {
            reason: format!("{}: {err}", path.display()),
        })
    }

    /// Applies `PVLIVE_*` overrides from the process environment.
    pub fn apply_env(self) -> Result<Self, LinkError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self, LinkError> {
        if let Some(host) = var("PVLIVE_HOST") {
            self.hostname = host;
        }
        if let Some(port) = var("PVLIVE_PORT") {
            self.port = port.parse().map_err(|_| LinkError::Config {
                reason: format!("PVLIVE_PORT '{port}' is not a port number"),
            })?;
        }
        if let Some(rank) = var("PVLIVE_RANK") {
            self.rank = rank.parse().map_err(|_| LinkError::Config {
                reason: format!("PVLIVE_RANK '{rank}' is not a rank"),
            })?;
        }
        Ok(self)
    }

    pub fn is_root(&self) -> bool {
        self.rank == 0
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn update_timeout(&self) -> Option<Duration> {
        self.update_timeout_ms.map(Duration::from_millis)
    }

    /// URL the visualization listens on.
    pub fn listen_url(&self) -> ConnectionUrl {
        ConnectionUrl::listen(self.port, &self.version)
    }

    /// URL the simulation connects to.
    pub fn connect_url(&self) -> ConnectionUrl {
        ConnectionUrl::connect(&self.hostname, self.port, &self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn json_fields_default_individually() {
        let config: LinkConfig =
            serde_json::from_str(r#"{ "process_type": "visualization", "port": 11111 }"#).unwrap();
        assert_eq!(config.process_type, ProcessType::Visualization);
        assert_eq!(config.port, 11111);
        assert_eq!(config.hostname, "localhost");
        assert_eq!(config.handshake_timeout_ms, DEFAULT_HANDSHAKE_TIMEOUT_MS);
    }

    #[test]
    fn env_overrides_file_values() {
        let vars: HashMap<&str, &str> = [("PVLIVE_HOST", "cluster-7"), ("PVLIVE_RANK", "3")].into();
        let config = LinkConfig::simulation("localhost", 4000)
            .apply_vars(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.hostname, "cluster-7");
        assert_eq!(config.port, 4000);
        assert_eq!(config.rank, 3);
        assert!(!config.is_root());
    }

    #[test]
    fn bad_port_is_rejected() {
        let result = LinkConfig::default().apply_vars(|key| {
            (key == "PVLIVE_PORT").then(|| "http".to_string())
        });
        assert!(matches!(result, Err(LinkError::Config { .. })));
    }

    #[test]
    fn urls_follow_role() {
        let config = LinkConfig::visualization(22222).with_version("5.12.0");
        assert_eq!(
            config.listen_url().to_string(),
            "tcp://localhost:22222?listen=true&nonblocking=true&handshake=paraview.insitu.5.12.0"
        );
        let config = LinkConfig::simulation("node1", 22222).with_version("5.12.0");
        assert_eq!(
            config.connect_url().to_string(),
            "tcp://node1:22222?handshake=paraview.insitu.5.12.0"
        );
    }
}
