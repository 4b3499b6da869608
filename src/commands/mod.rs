pub mod calibrate;
pub mod ingest;
pub mod migrate;

pub use calibrate::handle_calibrate;
pub use ingest::{IngestOptions, handle_ingest};
pub use migrate::handle_migrate;

use std::time::Duration;

use anyhow::{Context, Result};
use aprsdb::config::Config;
use aprsdb::pg_store::{PgPool, build_pool};
use tracing::info;

/// Connection pool for the configured database. Failing here is fatal.
pub(crate) fn connect_pool(config: &Config) -> Result<PgPool> {
    let url = config.database_url()?;
    let pool = build_pool(
        &url,
        config.database.pool_size,
        Duration::from_secs(config.database.connect_timeout_secs),
    )
    .context("Unable to connect to the database")?;
    info!("Connected to database (pool size {})", config.database.pool_size);
    Ok(pool)
}
