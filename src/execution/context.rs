/// Query-scoped execution state
///
/// Everything an operator needs that is not its own input: config, cancellation,
/// memory budget, worker pool and the diagnostics counters reported with the result.
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::execution::memory_pool::{MemoryPool, MemoryReservation};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between a query and its caller
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Counters accumulated while a query runs
#[derive(Debug, Default)]
pub struct QueryDiagnostics {
    rows_scanned: AtomicU64,
    malformed_rows_skipped: AtomicU64,
    blocks_total: AtomicU64,
    blocks_skipped: AtomicU64,
}

/// Point-in-time copy of `QueryDiagnostics`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsSnapshot {
    pub rows_scanned: u64,
    pub malformed_rows_skipped: u64,
    pub blocks_total: u64,
    pub blocks_skipped: u64,
    pub peak_memory_bytes: u64,
}

impl QueryDiagnostics {
    pub fn add_rows_scanned(&self, n: u64) {
        self.rows_scanned.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_malformed_rows_skipped(&self, n: u64) {
        self.malformed_rows_skipped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_blocks(&self, total: u64, skipped: u64) {
        self.blocks_total.fetch_add(total, Ordering::Relaxed);
        self.blocks_skipped.fetch_add(skipped, Ordering::Relaxed);
    }

    pub fn snapshot(&self, peak_memory_bytes: usize) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            rows_scanned: self.rows_scanned.load(Ordering::Relaxed),
            malformed_rows_skipped: self.malformed_rows_skipped.load(Ordering::Relaxed),
            blocks_total: self.blocks_total.load(Ordering::Relaxed),
            blocks_skipped: self.blocks_skipped.load(Ordering::Relaxed),
            peak_memory_bytes: peak_memory_bytes as u64,
        }
    }
}

/// Execution context of one query
#[derive(Clone)]
pub struct QueryContext {
    query_id: u64,
    config: Arc<EngineConfig>,
    cancellation: CancellationToken,
    memory_pool: Arc<MemoryPool>,
    thread_pool: Arc<rayon::ThreadPool>,
    diagnostics: Arc<QueryDiagnostics>,
}

impl QueryContext {
    pub fn new(
        query_id: u64,
        config: Arc<EngineConfig>,
        cancellation: CancellationToken,
        thread_pool: Arc<rayon::ThreadPool>,
    ) -> Self {
        let memory_pool = Arc::new(MemoryPool::new(config.memory.query_memory_budget_bytes));
        Self {
            query_id,
            config,
            cancellation,
            memory_pool,
            thread_pool,
            diagnostics: Arc::new(QueryDiagnostics::default()),
        }
    }

    /// Standalone context with its own small pool, for tests and one-off operator use
    pub fn for_config(config: EngineConfig) -> EngineResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .build()
            .map_err(|e| EngineError::internal(format!("failed to build worker pool: {}", e)))?;
        Ok(Self::new(0, Arc::new(config), CancellationToken::new(), Arc::new(pool)))
    }

    pub fn query_id(&self) -> u64 {
        self.query_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Fail with `Cancelled` once the token is tripped; operators call this before each pull
    pub fn check_cancelled(&self) -> EngineResult<()> {
        if self.cancellation.is_cancelled() {
            return Err(EngineError::cancelled(format!("query {} was cancelled", self.query_id)));
        }
        Ok(())
    }

    pub fn memory_pool(&self) -> &Arc<MemoryPool> {
        &self.memory_pool
    }

    pub fn reserve_memory(&self, operator: impl Into<String>) -> MemoryReservation {
        self.memory_pool.reserve(operator)
    }

    pub fn thread_pool(&self) -> &rayon::ThreadPool {
        &self.thread_pool
    }

    pub fn diagnostics(&self) -> &QueryDiagnostics {
        &self.diagnostics
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot(self.memory_pool.peak())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_shared() {
        let ctx = QueryContext::for_config(EngineConfig::default().with_worker_threads(1)).unwrap();
        let token = ctx.cancellation().clone();
        assert!(ctx.check_cancelled().is_ok());
        token.cancel();
        assert!(ctx.check_cancelled().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_diagnostics_snapshot() {
        let ctx = QueryContext::for_config(EngineConfig::default().with_worker_threads(1)).unwrap();
        ctx.diagnostics().add_blocks(4, 3);
        ctx.diagnostics().add_malformed_rows_skipped(2);
        let snap = ctx.diagnostics_snapshot();
        assert_eq!(snap.blocks_total, 4);
        assert_eq!(snap.blocks_skipped, 3);
        assert_eq!(snap.malformed_rows_skipped, 2);
    }
}
