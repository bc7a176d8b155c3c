//! Dataset records and the process-wide model.

use std::collections::BTreeMap;
use std::fmt;

use super::inventory::Inventory;
use super::metrics::{DatasetSize, StorageMetrics};
use super::plan::Plan;
use super::set::SnapshotSet;
use super::snapshot::{DatasetName, Snapshot};

/// Everything the daemon knows about one dataset.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub name: DatasetName,
    pub current: Inventory,
    pub target: Option<Inventory>,
    pub plan: Option<Plan>,
    pub metrics: StorageMetrics,
    pub sync_in_progress: bool,
}

impl Dataset {
    pub fn new(name: DatasetName) -> Self {
        Dataset {
            name,
            current: Inventory::default(),
            target: None,
            plan: None,
            metrics: StorageMetrics::default(),
            sync_in_progress: false,
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{}: {}L, {}R>",
            self.name,
            self.current.local.len(),
            self.current.remote.len()
        )
    }
}

/// Map of dataset name to record. Replaced wholesale at the start of a
/// reconciliation cycle, then mutated step by step through the state
/// atom as operations land.
#[derive(Debug, Clone, Default)]
pub struct Model {
    datasets: BTreeMap<DatasetName, Dataset>,
}

impl Model {
    pub fn new() -> Self {
        Model::default()
    }

    pub fn get(&self, name: &DatasetName) -> Option<&Dataset> {
        self.datasets.get(name)
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    /// Dataset names in processing order: ascending by path length, then
    /// lexicographic. Parents come before children, and the order is
    /// stable across cycles.
    pub fn names(&self) -> Vec<DatasetName> {
        let mut names: Vec<DatasetName> = self.datasets.keys().cloned().collect();
        names.sort_by(|a, b| {
            a.path()
                .len()
                .cmp(&b.path().len())
                .then_with(|| a.path().cmp(b.path()))
        });
        names
    }

    pub fn datasets(&self) -> impl Iterator<Item = &Dataset> {
        self.datasets.values()
    }

    /// Record a local-side observation: replace the dataset's local set
    /// and, when given, its local size.
    pub fn with_local_observation(
        mut self,
        name: &DatasetName,
        snapshots: Vec<Snapshot>,
        size: Option<DatasetSize>,
    ) -> Model {
        let ds = self
            .datasets
            .entry(name.clone())
            .or_insert_with(|| Dataset::new(name.clone()));
        ds.current.local = snapshots.into_iter().collect::<SnapshotSet>();
        if size.is_some() {
            ds.metrics.local = size;
        }
        self
    }

    /// Record a remote-side observation.
    pub fn with_remote_observation(
        mut self,
        name: &DatasetName,
        snapshots: Vec<Snapshot>,
        size: Option<DatasetSize>,
    ) -> Model {
        let ds = self
            .datasets
            .entry(name.clone())
            .or_insert_with(|| Dataset::new(name.clone()));
        ds.current.remote = snapshots.into_iter().collect::<SnapshotSet>();
        if size.is_some() {
            ds.metrics.remote = size;
        }
        self
    }

    /// Replace one dataset record.
    pub fn with_dataset(mut self, dataset: Dataset) -> Model {
        self.datasets.insert(dataset.name.clone(), dataset);
        self
    }

    /// Apply `update` to one dataset record, if present.
    pub fn with_updated(
        mut self,
        name: &DatasetName,
        update: impl FnOnce(&mut Dataset),
    ) -> Model {
        if let Some(ds) = self.datasets.get_mut(name) {
            update(ds);
        }
        self
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (mut local, mut remote) = (0, 0);
        for ds in self.datasets.values() {
            local += ds.current.local.len();
            remote += ds.current.remote.len();
        }
        write!(f, "<{} datasets, {local}L, {remote}R>", self.datasets.len())
    }
}
