//! Retention policy: how many of each snapshot kind to keep.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Maps a snapshot kind (`hourly`, `daily`, ...) to the number of
/// most-recent snapshots of that kind worth keeping. Kinds absent from
/// the map are never selected by policy matching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Policy {
    keep: BTreeMap<String, u32>,
}

impl Policy {
    pub fn new() -> Self {
        Policy::default()
    }

    pub fn set(&mut self, kind: impl Into<String>, count: u32) {
        self.keep.insert(kind.into(), count);
    }

    pub fn keep_count(&self, kind: &str) -> Option<u32> {
        self.keep.get(kind).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.keep.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.keep.iter().map(|(kind, count)| (kind.as_str(), *count))
    }
}
