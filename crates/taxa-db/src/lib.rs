//! # taxa-db
//!
//! PostgreSQL store for taxa.
//!
//! This crate provides:
//! - Connection pool management
//! - `PgPlantStore`, the `EntityStore` over `plants` / `plant_synonyms`
//! - Bundled schema migrations (feature `migrations`)
//!
//! ## Example
//!
//! ```rust,ignore
//! use taxa_db::Database;
//! use taxa_core::EntityStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/plants").await?;
//!     db.plants.ping().await?;
//!     let page = db.plants.fetch_page(0, 100).await?;
//!     println!("{} plants", page.len());
//!     Ok(())
//! }
//! ```

pub mod plants;
pub mod pool;

pub use plants::PgPlantStore;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};

#[cfg(feature = "migrations")]
use taxa_core::Error;
use taxa_core::Result;

/// Combined database context.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    pub plants: PgPlantStore,
}

impl Database {
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            plants: PgPlantStore::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
