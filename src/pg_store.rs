//! PostgreSQL/PostGIS implementation of [`Store`].
//!
//! A `PgStore` owns one pooled connection for the lifetime of an ingestion
//! loop. Transactions map onto diesel's ANSI transaction manager, so nested
//! calls become savepoints.

use std::time::Duration;

use chrono::{DateTime, Utc};
use diesel::connection::{AnsiTransactionManager, TransactionManager};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::r2d2::ConnectionManager;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_types;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use r2d2::{Pool, PooledConnection};
use tracing::{info, warn};

use crate::digipeaters::{Digipeater, DigipeaterUpdate, NewDigipeater};
use crate::error::StoreError;
use crate::formats::FormatRow;
use crate::locations::{Coordinates, SRID};
use crate::postgis_functions::{st_make_point, st_set_srid};
use crate::schema::{digipeaters, ingest_errors, locations, packets, path_hops, routes, sessions};
use crate::store::{
    DigipeaterId, FieldValue, LocationId, NewEnvelope, NewIngestError, PacketId, PathHop, RouteId, SessionId,
    Store,
};

pub type PgPool = Pool<ConnectionManager<PgConnection>>;
type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Messages PostgreSQL uses for data exceptions (SQLSTATE class 22) and type
/// mismatches. diesel reports these as `DatabaseErrorKind::Unknown`.
const DATA_ERROR_MARKERS: &[&str] = &[
    "value too long",
    "out of range",
    "invalid input syntax",
    "is of type",
    "invalid input value",
    "numeric field overflow",
];

/// Build the connection pool. Fails if no connection can be established
/// within `connect_timeout`.
pub fn build_pool(database_url: &str, max_size: u32, connect_timeout: Duration) -> Result<PgPool, StoreError> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder()
        .max_size(max_size)
        .connection_timeout(connect_timeout)
        .build(manager)
        .map_err(|e| StoreError::Connection(e.to_string()))
}

/// Apply pending migrations. Returns how many were applied.
pub fn run_migrations(pool: &PgPool) -> Result<usize, StoreError> {
    let mut conn = pool.get().map_err(|e| StoreError::Connection(e.to_string()))?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| StoreError::Query(format!("migrations failed: {}", e)))?;
    for version in &applied {
        info!("Applied migration {}", version);
    }
    Ok(applied.len())
}

pub struct PgStore {
    conn: PgPooledConnection,
}

impl PgStore {
    pub fn connect(pool: &PgPool) -> Result<Self, StoreError> {
        let conn = pool.get().map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { conn })
    }
}

pub(crate) fn store_error(err: DieselError) -> StoreError {
    match err {
        DieselError::DatabaseError(kind, info) => {
            let message = info.message().to_string();
            match kind {
                DatabaseErrorKind::CheckViolation | DatabaseErrorKind::NotNullViolation => {
                    StoreError::Validation(message)
                }
                DatabaseErrorKind::ClosedConnection => StoreError::Connection(message),
                _ if DATA_ERROR_MARKERS.iter().any(|m| message.contains(m)) => StoreError::Validation(message),
                _ => StoreError::Query(message),
            }
        }
        DieselError::NotFound => StoreError::NotFound("row".to_string()),
        other => StoreError::Query(other.to_string()),
    }
}

impl Store for PgStore {
    fn transaction<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self) -> Result<T, E>,
        E: From<StoreError>,
    {
        <AnsiTransactionManager as TransactionManager<PgConnection>>::begin_transaction(&mut *self.conn)
            .map_err(|e| E::from(store_error(e)))?;

        match f(self) {
            Ok(value) => {
                <AnsiTransactionManager as TransactionManager<PgConnection>>::commit_transaction(&mut *self.conn)
                    .map_err(|e| E::from(store_error(e)))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) =
                    <AnsiTransactionManager as TransactionManager<PgConnection>>::rollback_transaction(
                        &mut *self.conn,
                    )
                {
                    warn!("Rollback failed: {}", rollback_err);
                }
                Err(err)
            }
        }
    }

    fn find_location(&mut self, coordinates: Coordinates) -> Result<Option<LocationId>, StoreError> {
        locations::table
            .filter(locations::latitude.eq(coordinates.latitude()))
            .filter(locations::longitude.eq(coordinates.longitude()))
            .select(locations::location_id)
            .first::<LocationId>(&mut *self.conn)
            .optional()
            .map_err(store_error)
    }

    fn insert_location(&mut self, coordinates: Coordinates) -> Result<Option<LocationId>, StoreError> {
        let (lat, lon) = (coordinates.latitude(), coordinates.longitude());
        diesel::insert_into(locations::table)
            .values((
                locations::latitude.eq(lat),
                locations::longitude.eq(lon),
                locations::geom.eq(st_set_srid(st_make_point(lon, lat), SRID)),
            ))
            .on_conflict((locations::latitude, locations::longitude))
            .do_nothing()
            .returning(locations::location_id)
            .get_result::<LocationId>(&mut *self.conn)
            .optional()
            .map_err(store_error)
    }

    fn find_digipeater(&mut self, callsign: &str) -> Result<Option<Digipeater>, StoreError> {
        digipeaters::table
            .filter(digipeaters::callsign.eq(callsign))
            .select(Digipeater::as_select())
            .first(&mut *self.conn)
            .optional()
            .map_err(store_error)
    }

    fn insert_digipeater(&mut self, digipeater: &NewDigipeater) -> Result<Option<DigipeaterId>, StoreError> {
        diesel::insert_into(digipeaters::table)
            .values(digipeater)
            .on_conflict(digipeaters::callsign)
            .do_nothing()
            .returning(digipeaters::digipeater_id)
            .get_result::<DigipeaterId>(&mut *self.conn)
            .optional()
            .map_err(store_error)
    }

    fn update_digipeater(&mut self, id: DigipeaterId, update: &DigipeaterUpdate) -> Result<(), StoreError> {
        let updated = diesel::update(digipeaters::table.find(id))
            .set(update)
            .execute(&mut *self.conn)
            .map_err(store_error)?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("digipeater {}", id)));
        }
        Ok(())
    }

    fn find_route(&mut self, src: &str, dest: &str) -> Result<Option<RouteId>, StoreError> {
        routes::table
            .filter(routes::src.eq(src))
            .filter(routes::dest.eq(dest))
            .select(routes::route_id)
            .first::<RouteId>(&mut *self.conn)
            .optional()
            .map_err(store_error)
    }

    fn insert_route(&mut self, src: &str, dest: &str) -> Result<Option<RouteId>, StoreError> {
        diesel::insert_into(routes::table)
            .values((routes::src.eq(src), routes::dest.eq(dest)))
            .on_conflict((routes::src, routes::dest))
            .do_nothing()
            .returning(routes::route_id)
            .get_result::<RouteId>(&mut *self.conn)
            .optional()
            .map_err(store_error)
    }

    fn insert_path_hop(&mut self, hop: &PathHop) -> Result<(), StoreError> {
        diesel::insert_into(path_hops::table)
            .values((
                path_hops::pid.eq(hop.packet_id),
                path_hops::hop.eq(hop.hop),
                path_hops::route_id.eq(hop.route_id),
            ))
            .execute(&mut *self.conn)
            .map_err(store_error)?;
        Ok(())
    }

    fn insert_envelope(&mut self, envelope: &NewEnvelope) -> Result<PacketId, StoreError> {
        diesel::insert_into(packets::table)
            .values((
                packets::src.eq(&envelope.src),
                packets::dest.eq(&envelope.dest),
                packets::format.eq(&envelope.format),
                packets::rxtime.eq(envelope.received_at),
                packets::rxsession.eq(envelope.session_id),
                packets::is_subpacket.eq(envelope.is_subpacket),
                packets::rx_location_id.eq(envelope.receiver_location_id),
                packets::raw.eq(envelope.raw.as_deref()),
                packets::parse_error.eq(envelope.parse_error.as_deref()),
            ))
            .returning(packets::pid)
            .get_result::<PacketId>(&mut *self.conn)
            .map_err(store_error)
    }

    fn insert_format_row(&mut self, row: &FormatRow) -> Result<(), StoreError> {
        let columns: Vec<&str> = row.values.iter().map(|(column, _)| *column).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            row.table.table_name(),
            columns.join(", "),
            placeholders.join(", ")
        );

        let mut query = diesel::sql_query(sql).into_boxed::<Pg>();
        for (_, value) in &row.values {
            query = match value {
                FieldValue::Text(s) => query.bind::<sql_types::Text, _>(s.clone()),
                FieldValue::Integer(i) => query.bind::<sql_types::BigInt, _>(*i),
                FieldValue::Float(f) => query.bind::<sql_types::Double, _>(*f),
                FieldValue::Bool(b) => query.bind::<sql_types::Bool, _>(*b),
            };
        }
        query.execute(&mut *self.conn).map_err(store_error)?;
        Ok(())
    }

    fn insert_ingest_error(&mut self, error: &NewIngestError) -> Result<(), StoreError> {
        diesel::insert_into(ingest_errors::table)
            .values((
                ingest_errors::rxtime.eq(error.received_at),
                ingest_errors::rxsession.eq(error.session_id),
                ingest_errors::raw.eq(&error.raw),
                ingest_errors::message.eq(&error.message),
            ))
            .execute(&mut *self.conn)
            .map_err(store_error)?;
        Ok(())
    }

    fn create_session(&mut self, started_at: DateTime<Utc>) -> Result<SessionId, StoreError> {
        diesel::insert_into(sessions::table)
            .values((sessions::started_at.eq(started_at), sessions::offset_seconds.eq(0.0)))
            .returning(sessions::session_id)
            .get_result::<SessionId>(&mut *self.conn)
            .map_err(store_error)
    }

    fn session_started_at(&mut self, id: SessionId) -> Result<Option<DateTime<Utc>>, StoreError> {
        sessions::table
            .find(id)
            .select(sessions::started_at)
            .first::<DateTime<Utc>>(&mut *self.conn)
            .optional()
            .map_err(store_error)
    }

    fn set_session_offset(&mut self, id: SessionId, offset_seconds: f64) -> Result<bool, StoreError> {
        let updated = diesel::update(sessions::table.find(id))
            .set(sessions::offset_seconds.eq(offset_seconds))
            .execute(&mut *self.conn)
            .map_err(store_error)?;
        Ok(updated > 0)
    }
}
