//! Ingestion sessions and their clock calibration.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::store::{SessionId, Store};

/// One run of the ingestion process.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable)]
#[diesel(table_name = crate::schema::sessions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Session {
    #[diesel(column_name = session_id)]
    pub id: SessionId,
    pub started_at: DateTime<Utc>,
    /// Seconds to add to this session's wall clock to get trusted time.
    pub offset_seconds: f64,
}

/// Record the start of a run. The offset starts at zero.
pub fn start_session<S: Store>(store: &mut S, started_at: DateTime<Utc>) -> Result<SessionId, StoreError> {
    let id = store.transaction(|tx| tx.create_session(started_at))?;
    info!("Started session {} at {}", id, started_at.to_rfc3339());
    Ok(id)
}

pub struct SessionClock;

impl SessionClock {
    /// Store `trusted_start - recorded_start` as the session's offset.
    ///
    /// Re-running overwrites the previous offset. Store failures and unknown
    /// sessions are reported as `false`.
    pub fn calibrate<S: Store>(store: &mut S, session_id: SessionId, trusted_start: DateTime<Utc>) -> bool {
        let result = store.transaction(|tx| -> Result<Option<f64>, StoreError> {
            let Some(recorded) = tx.session_started_at(session_id)? else {
                return Ok(None);
            };
            let offset = offset_seconds(recorded, trusted_start);
            if tx.set_session_offset(session_id, offset)? {
                Ok(Some(offset))
            } else {
                Ok(None)
            }
        });

        match result {
            Ok(Some(offset)) => {
                info!("Session {} clock offset set to {:.3}s", session_id, offset);
                true
            }
            Ok(None) => {
                warn!("Cannot calibrate unknown session {}", session_id);
                false
            }
            Err(e) => {
                warn!("Failed to calibrate session {}: {}", session_id, e);
                false
            }
        }
    }
}

fn offset_seconds(recorded: DateTime<Utc>, trusted: DateTime<Utc>) -> f64 {
    let delta = trusted - recorded;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_seconds() as f64,
    }
}
