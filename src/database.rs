use std::{ops::Deref, time::Duration};

use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::debug;

/// Settings for the Postgres connection pool.
pub struct DatabaseOptions {
    pub url: String,
    pub pool_size: u32,
    pub timeout_seconds: u8,
}

#[derive(Clone)]
pub struct PostgresConnection(PgPool);

impl PostgresConnection {
    pub fn new(pool: PgPool) -> Self {
        Self(pool)
    }

    /// Open a connection pool using the provided options.
    pub async fn connect(opts: &DatabaseOptions) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(opts.pool_size)
            .acquire_timeout(Duration::from_secs(opts.timeout_seconds.into()))
            .connect(&opts.url)
            .await?;
        debug!(pool_size = opts.pool_size, "Connected to database.");

        Ok(Self::new(pool))
    }
}

impl Deref for PostgresConnection {
    type Target = PgPool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
