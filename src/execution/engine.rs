/// Query executor
///
/// Owns the worker pool and the engine config. Each query gets its own `QueryContext`
/// (cancellation token, memory budget, diagnostics), is optimized, bound into an operator
/// tree and drained from the root inside the pool. A query either returns all of its rows
/// or an error; a cancelled query never yields a partial result.
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::execution::batch::collect_batches;
use crate::execution::context::{CancellationToken, QueryContext};
use crate::execution::operators::build_operator;
use crate::execution::result::QueryResult;
use crate::query::optimizer::optimize;
use crate::query::plan::PlanOperator;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Clone)]
pub struct QueryExecutor {
    config: Arc<EngineConfig>,
    pool: Arc<rayon::ThreadPool>,
    next_query_id: Arc<AtomicU64>,
}

impl QueryExecutor {
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|i| format!("filequery-worker-{}", i))
            .build()
            .map_err(|e| EngineError::internal(format!("failed to build worker pool: {}", e)))?;
        info!(
            worker_threads = config.worker_threads,
            batch_size = config.batch_size,
            memory_budget = config.memory.query_memory_budget_bytes,
            "executor started"
        );
        Ok(Self {
            config: Arc::new(config),
            pool: Arc::new(pool),
            next_query_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn execute(&self, plan: &PlanOperator) -> EngineResult<QueryResult> {
        self.execute_with_token(plan, CancellationToken::new())
    }

    /// Run `plan`, giving up with `Cancelled` once `token` is tripped
    pub fn execute_with_token(&self, plan: &PlanOperator, token: CancellationToken) -> EngineResult<QueryResult> {
        let query_id = self.next_query_id.fetch_add(1, Ordering::Relaxed);
        let ctx = QueryContext::new(query_id, self.config.clone(), token, self.pool.clone());
        let start = Instant::now();
        info!(query_id, root = plan.name(), "query started");

        let outcome = self.pool.install(|| -> EngineResult<_> {
            let optimized = optimize(plan.clone(), &self.config)?;
            let mut root = build_operator(&optimized, &ctx)?;
            let schema = root.schema();
            let batches = collect_batches(root.as_mut(), &ctx)?;
            ctx.check_cancelled()?;
            Ok((schema, batches))
        });

        match outcome {
            Ok((schema, batches)) => {
                let result = QueryResult::new(schema, batches, start.elapsed(), ctx.diagnostics_snapshot());
                info!(
                    query_id,
                    rows = result.row_count,
                    elapsed_ms = result.execution_time_ms,
                    rows_scanned = result.diagnostics.rows_scanned,
                    blocks_skipped = result.diagnostics.blocks_skipped,
                    peak_memory = result.diagnostics.peak_memory_bytes,
                    "query finished"
                );
                Ok(result)
            }
            Err(e) => {
                warn!(query_id, error = %e, "query failed");
                Err(e)
            }
        }
    }

    /// Run `plan` on tokio's blocking pool. When `timeout` elapses the query is cancelled
    /// and `Cancelled` is returned.
    pub async fn execute_async(&self, plan: PlanOperator, timeout: Option<Duration>) -> EngineResult<QueryResult> {
        let token = CancellationToken::new();
        let executor = self.clone();
        let task_token = token.clone();
        let handle = tokio::task::spawn_blocking(move || executor.execute_with_token(&plan, task_token));
        let joined = match timeout {
            None => handle.await,
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    token.cancel();
                    warn!(timeout_ms = limit.as_millis() as u64, "query timed out");
                    return Err(EngineError::cancelled(format!("query timed out after {:?}", limit)));
                }
            },
        };
        joined.map_err(|e| EngineError::internal(format!("query task failed: {}", e)))?
    }
}
