use anyhow::{Context, Result};
use aprsdb::config::Config;
use aprsdb::pg_store::run_migrations;
use tracing::info;

use super::connect_pool;

pub async fn handle_migrate(config: Config) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        let pool = connect_pool(&config)?;
        let applied = run_migrations(&pool).context("Failed to run database migrations")?;
        if applied == 0 {
            info!("Database schema is up to date");
        } else {
            info!("Applied {} migration(s)", applied);
        }
        Ok(())
    })
    .await
    .context("Migration task panicked")?
}
