use anyhow::{Context, Result, bail};
use aprsdb::config::Config;
use aprsdb::pg_store::PgStore;
use aprsdb::sessions::SessionClock;
use aprsdb::store::SessionId;
use chrono::{DateTime, Utc};
use tracing::info;

use super::connect_pool;

/// Set a past session's clock offset from a trusted start time.
pub async fn handle_calibrate(config: Config, session_id: SessionId, trusted_start: DateTime<Utc>) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        let pool = connect_pool(&config)?;
        let mut store = PgStore::connect(&pool).context("Unable to get a database connection")?;

        info!(
            "Calibrating session {} against trusted start {}",
            session_id,
            trusted_start.to_rfc3339()
        );
        if !SessionClock::calibrate(&mut store, session_id, trusted_start) {
            bail!("Calibration of session {} failed", session_id);
        }
        Ok(())
    })
    .await
    .context("Calibration task panicked")?
}
