//! Physical storage metrics, observability only.

/// On-disk footprint of a dataset on one side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatasetSize {
    /// Total on-disk space with children, including all snapshots.
    pub used: u64,
    /// Logical size of the most recent snapshot, without children.
    pub logical_referenced: u64,
}

/// Per-side sizes for the status UI. Never read by planning or target
/// synthesis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageMetrics {
    pub local: Option<DatasetSize>,
    pub remote: Option<DatasetSize>,
}

impl StorageMetrics {
    pub fn local_used_string(&self) -> String {
        match self.local {
            Some(size) => humanize_bytes(size.used),
            None => "-".to_string(),
        }
    }

    pub fn remote_used_string(&self) -> String {
        match self.remote {
            Some(size) => humanize_bytes(size.used),
            None => "-".to_string(),
        }
    }
}

/// Render a byte count with a binary-step unit and one decimal.
pub fn humanize_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut unit_index = 0_usize;
    let mut divisor = 1_u64;
    while bytes / divisor >= 1024 && unit_index < UNITS.len() - 1 {
        divisor *= 1024;
        unit_index += 1;
    }
    if unit_index == 0 {
        format!("{bytes} {}", UNITS[unit_index])
    } else {
        let whole = bytes / divisor;
        let frac = (bytes - whole * divisor) * 10 / divisor;
        format!("{whole}.{frac} {}", UNITS[unit_index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn humanize_steps_through_units() {
        assert_eq!(humanize_bytes(0), "0 B");
        assert_eq!(humanize_bytes(512), "512 B");
        assert_eq!(humanize_bytes(2048), "2.0 KB");
        assert_eq!(humanize_bytes(1536), "1.5 KB");
        assert_eq!(humanize_bytes(3 * 1024 * 1024), "3.0 MB");
        assert_eq!(humanize_bytes(5 * 1024 * 1024 * 1024), "5.0 GB");
    }

    #[test]
    fn missing_sizes_render_as_dashes() {
        let metrics = StorageMetrics::default();
        assert_eq!(metrics.local_used_string(), "-");
        assert_eq!(metrics.remote_used_string(), "-");

        let metrics = StorageMetrics {
            local: Some(DatasetSize {
                used: 1024,
                logical_referenced: 0,
            }),
            remote: None,
        };
        assert_eq!(metrics.local_used_string(), "1.0 KB");
    }
}
