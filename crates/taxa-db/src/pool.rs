//! Connection pool sized for the engine's store workers.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use taxa_core::{defaults, Error, Result};

/// How long startup waits for the first connection before giving up.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle connections are closed after this long; runs are bursty.
const IDLE_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// One connection per store worker plus one for paging reads.
    pub max_connections: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::for_workers(defaults::DB_CONCURRENCY)
    }
}

impl PoolConfig {
    /// Size the pool for `workers` concurrent store workers.
    pub fn for_workers(workers: usize) -> Self {
        Self {
            max_connections: workers.max(1) as u32 + 1,
        }
    }
}

pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    create_pool_with_config(database_url, PoolConfig::default()).await
}

/// Connect, mapping any failure to `Error::StoreUnavailable` so a run can
/// abort before reading anything.
pub async fn create_pool_with_config(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    let start = Instant::now();
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(1)
        .acquire_timeout(CONNECT_TIMEOUT)
        .idle_timeout(IDLE_TIMEOUT)
        .connect(database_url)
        .await
        .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "connect",
        max_connections = config.max_connections,
        pool_size = pool.size(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Store connected"
    );
    Ok(pool)
}

/// Log pool occupancy after a run. Zero idle connections at the end means
/// workers were queueing for handles and `TAXA_DB_CONCURRENCY` outgrew the pool.
pub fn log_pool_metrics(pool: &PgPool) {
    let size = pool.size();
    let idle = pool.num_idle();
    if idle == 0 && size > 0 {
        warn!(
            subsystem = "db",
            component = "pool",
            op = "metrics",
            pool_size = size,
            "No idle connections left after run"
        );
    } else {
        debug!(
            subsystem = "db",
            component = "pool",
            op = "metrics",
            pool_size = size,
            pool_idle = idle,
            "Pool health"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_sized_for_workers() {
        assert_eq!(PoolConfig::for_workers(3).max_connections, 4);
        assert_eq!(PoolConfig::for_workers(0).max_connections, 2);
        assert_eq!(
            PoolConfig::default().max_connections,
            defaults::DB_CONCURRENCY as u32 + 1
        );
    }
}
