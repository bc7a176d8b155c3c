//! Bounded in-memory logbooks backing the status UI.
//!
//! Every line also flows through `tracing`, so files and stderr see the
//! same stream; the logbooks only exist so the UI can show recent lines
//! without tailing anything.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use time::OffsetDateTime;

use crate::model::DatasetName;

/// Lines kept per logbook before the oldest fall off.
const LOGBOOK_CAP: usize = 500;

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub at: OffsetDateTime,
    pub line: String,
}

/// A labelled, bounded log buffer. Cheap to clone; clones share the
/// buffer.
#[derive(Clone)]
pub struct Logbook {
    label: String,
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
}

impl Logbook {
    pub fn new(label: impl Into<String>) -> Self {
        Logbook {
            label: label.into(),
            entries: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn log(&self, line: impl Into<String>) {
        let line = line.into();
        tracing::info!(target: "backupd", "[{}] {line}", self.label);

        let mut entries = self.entries.lock().expect("logbook lock poisoned");
        if entries.len() == LOGBOOK_CAP {
            entries.pop_front();
        }
        entries.push_back(LogEntry {
            at: OffsetDateTime::now_utc(),
            line,
        });
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .expect("logbook lock poisoned")
            .iter()
            .cloned()
            .collect()
    }
}

/// The daemon's logbooks: one global, one per dataset, created on
/// demand.
pub struct LogRegistry {
    global: Logbook,
    datasets: Mutex<BTreeMap<DatasetName, Logbook>>,
}

impl LogRegistry {
    pub fn new() -> Self {
        LogRegistry {
            global: Logbook::new("global"),
            datasets: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn global(&self) -> &Logbook {
        &self.global
    }

    pub fn dataset(&self, name: &DatasetName) -> Logbook {
        let mut datasets = self.datasets.lock().expect("logbook registry poisoned");
        datasets
            .entry(name.clone())
            .or_insert_with(|| Logbook::new(name.to_string()))
            .clone()
    }
}

impl Default for LogRegistry {
    fn default() -> Self {
        LogRegistry::new()
    }
}
