/// Per-query memory budget
///
/// Blocking operators (join build, sort, aggregation, window) hold a `MemoryReservation`
/// and grow it as they buffer input. Growing past the query budget fails with
/// `ResourceExhausted`; there is no spilling.
use crate::error::{EngineError, EngineResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Memory pool for tracking buffered operator state of one query
#[derive(Debug)]
pub struct MemoryPool {
    /// Total memory limit (bytes)
    budget: usize,

    /// Current memory usage (bytes)
    used: AtomicUsize,

    /// High-water mark (bytes)
    peak: AtomicUsize,
}

impl MemoryPool {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            used: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Start an empty reservation owned by `operator`
    pub fn reserve(self: &Arc<Self>, operator: impl Into<String>) -> MemoryReservation {
        MemoryReservation {
            pool: Arc::clone(self),
            operator: operator.into(),
            size: 0,
        }
    }

    fn try_allocate(&self, operator: &str, bytes: usize) -> EngineResult<()> {
        let mut current = self.used.load(Ordering::Relaxed);
        loop {
            let new_total = current.saturating_add(bytes);
            if new_total > self.budget {
                warn!(
                    operator = operator,
                    requested = bytes,
                    used = current,
                    budget = self.budget,
                    "Memory allocation would exceed query budget"
                );
                return Err(EngineError::resource_exhausted(operator, bytes, current, self.budget));
            }
            match self.used.compare_exchange_weak(
                current,
                new_total,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    self.peak.fetch_max(new_total, Ordering::Relaxed);
                    return Ok(());
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn release(&self, bytes: usize) {
        let _ = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Relaxed, |v| Some(v.saturating_sub(bytes)));
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn available(&self) -> usize {
        self.budget.saturating_sub(self.used())
    }
}

/// Bytes charged to the pool on behalf of one operator; released on drop
#[derive(Debug)]
pub struct MemoryReservation {
    pool: Arc<MemoryPool>,
    operator: String,
    size: usize,
}

impl MemoryReservation {
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn try_grow(&mut self, bytes: usize) -> EngineResult<()> {
        if bytes == 0 {
            return Ok(());
        }
        self.pool.try_allocate(&self.operator, bytes)?;
        self.size += bytes;
        debug!(
            operator = %self.operator,
            allocated = bytes,
            reservation = self.size,
            total_usage = self.pool.used(),
            "Memory allocated"
        );
        Ok(())
    }

    pub fn shrink(&mut self, bytes: usize) {
        let bytes = bytes.min(self.size);
        self.pool.release(bytes);
        self.size -= bytes;
    }

    /// Grow or shrink to exactly `new_size`
    pub fn resize(&mut self, new_size: usize) -> EngineResult<()> {
        if new_size > self.size {
            self.try_grow(new_size - self.size)
        } else {
            self.shrink(self.size - new_size);
            Ok(())
        }
    }

    pub fn free(&mut self) {
        self.shrink(self.size);
    }
}

impl Drop for MemoryReservation {
    fn drop(&mut self) {
        self.free();
    }
}
