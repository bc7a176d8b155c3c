//! Snapshot and dataset naming.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::metrics::humanize_bytes;

/// Which side of the backup relationship a snapshot set lives on.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Side {
    Local,
    Remote,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Local => write!(f, "local"),
            Side::Remote => write!(f, "remote"),
        }
    }
}

/// Path-like dataset identifier, relative to the configured root prefix.
///
/// The empty name denotes the root dataset itself; children look like
/// `/photos/2024`.
#[derive(Debug, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetName(String);

impl DatasetName {
    pub fn new(path: impl Into<String>) -> Self {
        DatasetName(path.into())
    }

    pub fn root() -> Self {
        DatasetName(String::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn path(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "(root)")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Immutable capture of a dataset at a point in time.
///
/// Identity is `(dataset, name)`; `created_at` only orders snapshots.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub dataset: DatasetName,
    pub name: String,
    /// Unix seconds.
    pub created_at: i64,
    /// Logical size at this snapshot, display/estimates only.
    pub logical_referenced: Option<i64>,
}

impl Snapshot {
    pub fn new(dataset: DatasetName, name: impl Into<String>, created_at: i64) -> Self {
        Snapshot {
            dataset,
            name: name.into(),
            created_at,
            logical_referenced: None,
        }
    }

    /// Identity key: unique within and across sets of the same dataset.
    pub fn id(&self) -> String {
        format!("{}@{}", self.dataset.path(), self.name)
    }

    /// Policy bucket: the name prefix before the first `-`.
    pub fn kind(&self) -> &str {
        self.name.split('-').next().unwrap_or(&self.name)
    }

    /// The part of the name after the kind, typically a timestamp.
    pub fn title(&self) -> &str {
        match self.name.split_once('-') {
            Some((_, title)) => title,
            None => "",
        }
    }

    /// Total order: by creation time, then by name. Identity ties are
    /// impossible within a well-formed set.
    pub fn less(&self, other: &Snapshot) -> bool {
        if self.created_at == other.created_at {
            self.name < other.name
        } else {
            self.created_at < other.created_at
        }
    }

    pub fn more(&self, other: &Snapshot) -> bool {
        other.less(self)
    }

    pub fn size_string(&self) -> String {
        match self.logical_referenced {
            Some(bytes) if bytes > 0 => humanize_bytes(bytes as u64),
            _ => "-".to_string(),
        }
    }
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.dataset == other.dataset && self.name == other.name
    }
}

impl Eq for Snapshot {}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.logical_referenced {
            Some(bytes) if bytes > 0 => write!(
                f,
                "{}@{} ({})",
                self.dataset.path(),
                self.name,
                humanize_bytes(bytes as u64)
            ),
            _ => write!(f, "{}@{}", self.dataset.path(), self.name),
        }
    }
}
