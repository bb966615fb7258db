use anyhow::Context;
use sqlx::{Connection, PgConnection};
use tracing::info;

pub struct MigrationOpts {
    pub database_url: String,
}

/// Apply any pending migrations from the `migrations` directory.
pub async fn run_migrations(opts: MigrationOpts) -> anyhow::Result<()> {
    let mut connection = PgConnection::connect(&opts.database_url)
        .await
        .context("failed to connect to the database")?;

    sqlx::migrate!("./migrations")
        .run(&mut connection)
        .await
        .context("failed to apply migrations")?;
    info!("Applied database migrations.");

    connection.close().await?;

    Ok(())
}
