// Database connection management

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use relay_core::Config;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a connection pool from platform configuration.
    /// Pool headroom maps `db_pool_size + db_max_overflow` onto
    /// `max_connections`.
    pub async fn connect(config: &Config) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.db_pool_size + config.db_max_overflow)
            .min_connections(config.db_pool_size.min(2))
            .connect(&config.db_url)
            .await?;
        Ok(Self { pool })
    }

    /// Create database connection from URL
    pub async fn from_url(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Cheap liveness probe for health endpoints
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
