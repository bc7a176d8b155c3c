//! Config loading.
//!
//! Searched at a fixed hierarchy of paths; the first file present wins.
//! `--config` bypasses the search.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Policy;

/// Search order for the config file.
pub const PATH_HIERARCHY: [&str; 4] = [
    "/etc/backupd.toml",
    "/usr/local/etc/backupd.toml",
    "/opt/local/etc/backupd.toml",
    "/Library/Application Support/backupd/backupd.toml",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub local: LocalConfig,
    pub remote: RemoteConfig,
    /// Dead-man's-switch identifier, pinged after all-OK cycles.
    #[serde(default)]
    pub snitch_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Dataset prefix on the local pool, e.g. `tank`.
    pub root: String,
    #[serde(default)]
    pub policy: Policy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Dataset prefix on the remote pool.
    pub root: String,
    pub ssh_key: PathBuf,
    pub ssh_host: String,
    #[serde(default)]
    pub policy: Policy,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no config file exists at any of: {searched}")]
    NotFound { searched: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Walk the path hierarchy and load the first config file present.
pub fn load() -> Result<Config, ConfigError> {
    for path in PATH_HIERARCHY {
        let path = Path::new(path);
        if !path.exists() {
            continue;
        }
        return load_from(path);
    }
    Err(ConfigError::NotFound {
        searched: PATH_HIERARCHY.join(", "),
    })
}

pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    const SAMPLE: &str = r#"
snitch_id = "abc123"

[local]
root = "tank"

[local.policy]
hourly = 24
daily = 7

[remote]
root = "backup/tank"
ssh_key = "/root/.ssh/id_ed25519"
ssh_host = "root@backup.example.net"

[remote.policy]
daily = 30
monthly = 12
"#;

    #[test]
    fn parses_a_full_config() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(SAMPLE.as_bytes()).expect("write");

        let config = load_from(file.path()).expect("load");
        assert_eq!(config.local.root, "tank");
        assert_eq!(config.local.policy.keep_count("hourly"), Some(24));
        assert_eq!(config.remote.ssh_host, "root@backup.example.net");
        assert_eq!(config.remote.policy.keep_count("monthly"), Some(12));
        assert_eq!(config.snitch_id.as_deref(), Some("abc123"));
    }

    #[test]
    fn policies_default_to_empty() {
        let minimal = r#"
[local]
root = "tank"

[remote]
root = "backup/tank"
ssh_key = "/root/.ssh/key"
ssh_host = "root@host"
"#;
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(minimal.as_bytes()).expect("write");

        let config = load_from(file.path()).expect("load");
        assert!(config.local.policy.is_empty());
        assert!(config.remote.policy.is_empty());
        assert!(config.snitch_id.is_none());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_from(Path::new("/definitely/not/here.toml")).expect_err("must fail");
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
