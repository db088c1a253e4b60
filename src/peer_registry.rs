//! Durable, on-disk registry of previously-handshaked peers, used to
//! reconnect on restart. One JSON file per peer, named by a content hash of
//! its identity, so re-saving the same peer overwrites rather than
//! duplicates. A `README.md` placed in the directory by an operator is
//! ignored rather than treated as a bad entry.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{NodeError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRegistryEntry {
    pub id: String,
    pub host: String,
    pub port: u16,
}

/// `hex(sha256(id ‖ host ‖ decimal(port)))` — deterministic for a given
/// `(id, host, port)` triple, so re-registering the same peer always names
/// the same file.
pub fn hashed_file_name(id: &str, host: &str, port: u16) -> String {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hasher.update(host.as_bytes());
    hasher.update(port.to_string().as_bytes());
    format!("{}.json", hex::encode(hasher.finalize()))
}

pub struct PeerRegistry {
    dir: PathBuf,
}

impl PeerRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Scan the directory, skip `README.md`, parse each remaining file as
    /// a `PeerRegistryEntry`, and key the result by `id`. A missing
    /// directory yields an empty map rather than an error — first run on a
    /// fresh data directory is not a failure.
    pub fn load_all(&self) -> Result<HashMap<String, PeerRegistryEntry>> {
        let mut out = HashMap::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(NodeError::Io(e)),
        };

        for dir_entry in entries {
            let dir_entry = dir_entry.map_err(NodeError::Io)?;
            if dir_entry.file_name() == "README.md" {
                continue;
            }
            let raw = fs::read_to_string(dir_entry.path()).map_err(NodeError::Io)?;
            let entry: PeerRegistryEntry = serde_json::from_str(&raw)
                .map_err(|e| NodeError::Registry(format!("{}: {}", dir_entry.path().display(), e)))?;
            out.insert(entry.id.clone(), entry);
        }
        Ok(out)
    }

    /// Write `{id, host, port}` under the hashed filename. Overwrites are
    /// permitted: saving the same `(id, host, port)` twice is idempotent on
    /// disk.
    pub fn save(&self, host: &str, port: u16, id: &str) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(NodeError::Io)?;
        let entry = PeerRegistryEntry {
            id: id.to_string(),
            host: host.to_string(),
            port,
        };
        let path = self.dir.join(hashed_file_name(id, host, port));
        let body = serde_json::to_string_pretty(&entry)
            .map_err(|e| NodeError::Registry(e.to_string()))?;
        fs::write(path, body).map_err(NodeError::Io)
    }

    /// Remove the file whose name equals the computed hash for `entry`.
    /// Missing files are not an error — deletion is idempotent.
    pub fn delete(&self, entry: &PeerRegistryEntry) -> Result<()> {
        let path = self.dir.join(hashed_file_name(&entry.id, &entry.host, entry.port));
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(NodeError::Io(e)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashed_filename_is_deterministic() {
        let a = hashed_file_name("A_pub", "127.0.0.1", 10001);
        let b = hashed_file_name("A_pub", "127.0.0.1", 10001);
        assert_eq!(a, b);
        let c = hashed_file_name("A_pub", "127.0.0.1", 10002);
        assert_ne!(a, c);
    }

    #[test]
    fn save_then_load_all_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let registry = PeerRegistry::new(dir.path());
        registry.save("127.0.0.1", 10001, "B_pub").unwrap();
        let loaded = registry.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        let entry = &loaded["B_pub"];
        assert_eq!(entry.host, "127.0.0.1");
        assert_eq!(entry.port, 10001);
    }

    #[test]
    fn repeated_save_is_idempotent_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let registry = PeerRegistry::new(dir.path());
        registry.save("127.0.0.1", 10001, "B_pub").unwrap();
        registry.save("127.0.0.1", 10001, "B_pub").unwrap();
        let file_count = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(file_count, 1);
    }

    #[test]
    fn readme_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("README.md"), "not json").unwrap();
        let registry = PeerRegistry::new(dir.path());
        assert!(registry.load_all().unwrap().is_empty());
    }

    #[test]
    fn missing_directory_yields_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = PeerRegistry::new(dir.path().join("does-not-exist"));
        assert!(registry.load_all().unwrap().is_empty());
    }

    #[test]
    fn delete_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let registry = PeerRegistry::new(dir.path());
        registry.save("127.0.0.1", 10001, "B_pub").unwrap();
        let entry = PeerRegistryEntry {
            id: "B_pub".into(),
            host: "127.0.0.1".into(),
            port: 10001,
        };
        registry.delete(&entry).unwrap();
        assert!(registry.load_all().unwrap().is_empty());
        // idempotent
        registry.delete(&entry).unwrap();
    }
}
