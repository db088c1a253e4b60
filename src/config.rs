//! Node configuration: a TOML file describing listen address, identity key
//! paths, UNL membership, the peer registry directory, and the four
//! artifact stream paths. Validation produces a report of warnings and
//! errors rather than failing on the first problem found.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::bulk::StreamPaths;
use crate::error::{NodeError, Result};

#[derive(Debug, Deserialize)]
pub struct NodeConfig {
    pub listen_addr: String,
    pub identity_key_path: PathBuf,
    pub unl_dir: PathBuf,
    pub peer_registry_dir: PathBuf,
    pub artifacts: ArtifactPaths,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct ArtifactPaths {
    pub block_loading: PathBuf,
    pub block_temp: PathBuf,
    pub accounts_loading: PathBuf,
    pub accounts_temp: PathBuf,
    pub blockshash_loading: PathBuf,
    pub blockshash_temp: PathBuf,
    pub blockshash_part_loading: PathBuf,
    pub blockshash_part_temp: PathBuf,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_handshake_timeout_secs() -> u64 {
    10
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(NodeError::Io)?;
        toml::from_str(&raw).map_err(|e| NodeError::Config(e.to_string()))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Load every `*.pem` file in `unl_dir` as a UNL member's public key.
    pub fn load_unl_members(&self) -> Result<Vec<String>> {
        let mut members = Vec::new();
        let entries = fs::read_dir(&self.unl_dir).map_err(NodeError::Io)?;
        for entry in entries {
            let entry = entry.map_err(NodeError::Io)?;
            if entry.path().extension().and_then(|e| e.to_str()) != Some("pem") {
                continue;
            }
            members.push(fs::read_to_string(entry.path()).map_err(NodeError::Io)?);
        }
        Ok(members)
    }

    pub fn stream_paths(&self) -> (StreamPaths, StreamPaths, StreamPaths, StreamPaths) {
        let a = &self.artifacts;
        (
            StreamPaths {
                loading: a.block_loading.clone(),
                temp: a.block_temp.clone(),
            },
            StreamPaths {
                loading: a.accounts_loading.clone(),
                temp: a.accounts_temp.clone(),
            },
            StreamPaths {
                loading: a.blockshash_loading.clone(),
                temp: a.blockshash_temp.clone(),
            },
            StreamPaths {
                loading: a.blockshash_part_loading.clone(),
                temp: a.blockshash_part_temp.clone(),
            },
        )
    }

    /// Sanity-check the configuration without touching the network.
    /// Missing directories are warnings (they are created on demand);
    /// an unparsable listen address is an error.
    pub fn validate(&self) -> ConfigReport {
        let mut report = ConfigReport::default();

        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            report.add_error(format!("listen_addr is not a valid socket address: {}", self.listen_addr));
        }

        if !self.identity_key_path.exists() {
            report.add_warning(format!(
                "identity_key_path {} does not exist yet — a fresh identity will be generated",
                self.identity_key_path.display()
            ));
        }

        if !self.unl_dir.exists() {
            report.add_error(format!("unl_dir {} does not exist", self.unl_dir.display()));
        } else {
            match self.load_unl_members() {
                Ok(members) if members.is_empty() => {
                    report.add_warning("unl_dir contains no .pem files — no peers will ever be admitted".into());
                }
                Err(e) => report.add_error(format!("failed to read unl_dir: {}", e)),
                Ok(_) => {}
            }
        }

        if !self.peer_registry_dir.exists() {
            report.add_warning(format!(
                "peer_registry_dir {} does not exist yet — it will be created on first save",
                self.peer_registry_dir.display()
            ));
        }

        if self.connect_timeout_secs == 0 {
            report.add_warning("connect_timeout_secs is 0 — outbound dials will fail instantly".into());
        }

        report
    }
}

/// Warnings and errors gathered by `NodeConfig::validate`. Callers decide
/// whether to abort on `!is_valid()` or just log the warnings.
#[derive(Debug, Default)]
pub struct ConfigReport {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ConfigReport {
    fn add_warning(&mut self, msg: String) {
        self.warnings.push(msg);
    }

    fn add_error(&mut self, msg: String) {
        self.errors.push(msg);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn log(&self) {
        for warning in &self.warnings {
            tracing::warn!("{}", warning);
        }
        for error in &self.errors {
            tracing::error!("{}", error);
        }
        if self.is_valid() && self.warnings.is_empty() {
            tracing::info!("configuration validated with no warnings");
        }
    }
}
