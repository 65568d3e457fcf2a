/// Engine configuration
///
/// One `EngineConfig` per executor; every query sees it through its `QueryContext`.
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rows per batch produced by scans and blocking operators
    pub batch_size: usize,

    /// Size of the executor's worker pool
    pub worker_threads: usize,

    /// Memory limits
    pub memory: MemoryConfig,

    /// Scan configuration
    pub scan: ScanConfig,

    /// Sort configuration
    pub sort: SortConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Budget for all buffered operator state of one query, in bytes
    pub query_memory_budget_bytes: usize,

    /// Number of lock-partitions of the join hash table
    pub join_partitions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Rows sampled for schema inference
    pub sample_rows: usize,

    /// What readers do with a record they cannot parse
    pub malformed_record_policy: MalformedRecordPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SortConfig {
    /// NULL placement for sort keys without an explicit NULLS FIRST/LAST
    pub default_null_ordering: NullOrdering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MalformedRecordPolicy {
    /// Abort the query with a format error
    #[default]
    Strict,
    /// Drop the record and count it
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NullOrdering {
    /// NULL compares greater than every value: last ascending, first descending
    #[default]
    NullsLargest,
    NullsFirst,
    NullsLast,
}

impl NullOrdering {
    /// Whether NULLs come first for a key with the given direction
    pub fn nulls_first(self, ascending: bool) -> bool {
        match self {
            NullOrdering::NullsLargest => !ascending,
            NullOrdering::NullsFirst => true,
            NullOrdering::NullsLast => false,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 8192,
            worker_threads: num_cpus::get(),
            memory: MemoryConfig::default(),
            scan: ScanConfig::default(),
            sort: SortConfig::default(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            query_memory_budget_bytes: 4 * 1024 * 1024 * 1024, // 4GB
            join_partitions: 16,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            sample_rows: 1000,
            malformed_record_policy: MalformedRecordPolicy::Strict,
        }
    }
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            default_null_ordering: NullOrdering::NullsLargest,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file; missing keys take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::io_with_path(e.to_string(), path.display().to_string()))?;
        let config: EngineConfig = serde_json::from_str(&text)
            .map_err(|e| EngineError::from(e).with_path(path.display().to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.batch_size == 0 {
            return Err(EngineError::planning("batch_size must be positive"));
        }
        if self.worker_threads == 0 {
            return Err(EngineError::planning("worker_threads must be positive"));
        }
        if self.memory.join_partitions == 0 {
            return Err(EngineError::planning("memory.join_partitions must be positive"));
        }
        if self.scan.sample_rows == 0 {
            return Err(EngineError::planning("scan.sample_rows must be positive"));
        }
        Ok(())
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory.query_memory_budget_bytes = bytes;
        self
    }

    pub fn with_malformed_record_policy(mut self, policy: MalformedRecordPolicy) -> Self {
        self.scan.malformed_record_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.batch_size, 8192);
        assert_eq!(config.memory.join_partitions, 16);
        assert_eq!(config.scan.malformed_record_policy, MalformedRecordPolicy::Strict);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"batch_size": 1024, "scan": {{"malformed_record_policy": "Skip"}}}}"#
        )
        .unwrap();
        let config = EngineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.batch_size, 1024);
        assert_eq!(config.scan.malformed_record_policy, MalformedRecordPolicy::Skip);
        assert_eq!(config.scan.sample_rows, 1000);
    }

    #[test]
    fn test_validate_rejects_zero_batch_size() {
        assert!(EngineConfig::default().with_batch_size(0).validate().is_err());
    }

    #[test]
    fn test_null_ordering() {
        assert!(!NullOrdering::NullsLargest.nulls_first(true));
        assert!(NullOrdering::NullsLargest.nulls_first(false));
        assert!(NullOrdering::NullsFirst.nulls_first(true));
    }
}
