//! Bounded parallelism, retry with backoff, adaptive windows, and the row budget.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use taxa_core::{EngineConfig, EntityStore, Result};

// =============================================================================
// WORK POOL
// =============================================================================

/// Runs units of store work on at most `workers` concurrent tasks.
///
/// Each unit receives its own store handle from `EntityStore::for_worker`.
/// Results come back in completion order.
#[derive(Debug, Clone, Copy)]
pub struct WorkPool {
    workers: usize,
}

impl WorkPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub async fn run<U, T, F, Fut>(&self, store: &Arc<dyn EntityStore>, units: Vec<U>, work: F) -> Vec<T>
    where
        U: Send + 'static,
        T: Send + 'static,
        F: Fn(Arc<dyn EntityStore>, U) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let total = units.len();
        if total == 0 {
            return Vec::new();
        }
        let start = Instant::now();
        let permits = Arc::new(Semaphore::new(self.workers));
        let work = Arc::new(work);
        let mut tasks = JoinSet::new();

        for unit in units {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let handle = store.for_worker();
            let work = work.clone();
            tasks.spawn(async move {
                let result = work(handle, unit).await;
                drop(permit);
                result
            });
        }

        let mut results = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(value) => results.push(value),
                Err(e) => error!(
                    subsystem = "engine",
                    component = "pool",
                    error = %e,
                    "Work unit panicked"
                ),
            }
        }

        debug!(
            subsystem = "engine",
            component = "pool",
            units = total,
            workers = self.workers,
            duration_ms = start.elapsed().as_millis() as u64,
            "Work units complete"
        );
        results
    }
}

// =============================================================================
// ROW BUDGET
// =============================================================================

/// Caps how many entities a run hands out for processing.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowBudget {
    limit: Option<usize>,
    used: usize,
}

impl RowBudget {
    pub fn new(limit: Option<usize>) -> Self {
        Self { limit, used: 0 }
    }

    /// Grant up to `wanted` rows and count them as used.
    pub fn take(&mut self, wanted: usize) -> usize {
        let granted = match self.limit {
            Some(limit) => wanted.min(limit.saturating_sub(self.used)),
            None => wanted,
        };
        self.used += granted;
        granted
    }

    pub fn exhausted(&self) -> bool {
        self.limit.is_some_and(|limit| self.used >= limit)
    }

    pub fn used(&self) -> usize {
        self.used
    }
}

// =============================================================================
// RETRY
// =============================================================================

/// Repeat `op` while it fails transiently, sleeping `backoff_for(attempt)`
/// between attempts, for at most `config.max_retries` attempts.
pub async fn retry_transient<T, F, Fut>(config: &EngineConfig, op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Err(e) if e.is_transient() && attempt < config.max_retries => {
                let delay = config.backoff_for(attempt);
                warn!(
                    subsystem = "engine",
                    op = op_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

// =============================================================================
// ADAPTIVE WINDOWS
// =============================================================================

/// How an item identifies itself in logs when it has to be dropped.
pub trait Described {
    fn describe(&self) -> String;
}

impl Described for taxa_core::SynonymRecord {
    fn describe(&self) -> String {
        format!("{} {} '{}'", self.entity_id, self.kind, self.name)
    }
}

impl Described for uuid::Uuid {
    fn describe(&self) -> String {
        self.to_string()
    }
}

impl Described for String {
    fn describe(&self) -> String {
        format!("'{}'", self)
    }
}

/// Outcome of sending a slice through adaptive windows.
#[derive(Debug)]
pub struct Windowed<T> {
    /// One value per successful window, in order.
    pub values: Vec<T>,
    /// Items in successful windows.
    pub completed: usize,
    /// Items given up on.
    pub dropped: usize,
}

/// Send `items` in windows of at most `start` items.
///
/// A payload-too-large failure halves the window and retries the same
/// offset. A single item that is still too large is dropped and the run
/// moves on. Transient failures are retried with backoff; once retries are
/// exhausted, or on any other failure, the window is dropped. Nothing here
/// is fatal.
pub async fn run_windows<'a, I, T, F, Fut>(
    items: &'a [I],
    start: usize,
    config: &EngineConfig,
    op_name: &'static str,
    mut send: F,
) -> Windowed<T>
where
    I: Described,
    F: FnMut(&'a [I]) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut out = Windowed {
        values: Vec::new(),
        completed: 0,
        dropped: 0,
    };
    let mut size = start.max(1);
    let mut offset = 0;

    while offset < items.len() {
        let end = (offset + size).min(items.len());
        let window = &items[offset..end];

        match retry_transient(config, op_name, || send(window)).await {
            Ok(value) => {
                out.values.push(value);
                out.completed += window.len();
                offset = end;
            }
            Err(e) if e.is_payload_too_large() && window.len() > 1 => {
                size = (window.len() / 2).max(1);
                debug!(
                    subsystem = "engine",
                    op = op_name,
                    offset,
                    chunk_size = size,
                    "Payload too large, shrinking window"
                );
            }
            Err(e) => {
                let first = window.first().map(Described::describe).unwrap_or_default();
                warn!(
                    subsystem = "engine",
                    op = op_name,
                    offset,
                    chunk_size = window.len(),
                    first_item = %first,
                    error = %e,
                    "Dropping window"
                );
                out.dropped += window.len();
                offset = end;
            }
        }
    }
    out
}
