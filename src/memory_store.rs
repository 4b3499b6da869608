//! In-process [`Store`] used by tests and `ingest --dry-run`.
//!
//! Transactions snapshot every table and restore the snapshot when the
//! closure fails, so nested transactions behave like savepoints. The
//! constraints that make PostgreSQL reject values (callsign length,
//! coordinate range, duplicate hop) are mirrored as [`StoreError`]s.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::digipeaters::{Digipeater, DigipeaterUpdate, NewDigipeater};
use crate::error::StoreError;
use crate::formats::{FormatRow, FormatTable};
use crate::locations::{Coordinates, Location};
use crate::route_graph::Route;
use crate::sessions::Session;
use crate::store::{
    DigipeaterId, LocationId, MAX_CALLSIGN_LEN, MAX_FORMAT_LEN, NewEnvelope, NewIngestError, PacketId,
    PathHop, RouteId, SessionId, Store,
};

/// Envelope as stored, with its generated id.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEnvelope {
    pub pid: PacketId,
    pub envelope: NewEnvelope,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    locations: Vec<Location>,
    digipeaters: Vec<Digipeater>,
    digipeater_updates: usize,
    routes: Vec<Route>,
    path_hops: Vec<PathHop>,
    envelopes: Vec<StoredEnvelope>,
    format_rows: Vec<FormatRow>,
    ingest_errors: Vec<NewIngestError>,
    sessions: Vec<Session>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Tables,
    /// Id sequences live outside the snapshot: like `BIGSERIAL`, a rolled
    /// back id is never handed out again.
    sequences: HashMap<&'static str, i64>,
    failing: BTreeSet<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later write to `table` fail with a query error.
    /// Not affected by rollbacks.
    pub fn fail_writes_to(&mut self, table: &str) {
        self.failing.insert(table.to_string());
    }

    pub fn locations(&self) -> &[Location] {
        &self.tables.locations
    }

    pub fn digipeaters(&self) -> &[Digipeater] {
        &self.tables.digipeaters
    }

    pub fn digipeater(&self, callsign: &str) -> Option<&Digipeater> {
        self.tables.digipeaters.iter().find(|d| d.callsign == callsign)
    }

    /// Number of digipeater update statements issued.
    pub fn digipeater_update_count(&self) -> usize {
        self.tables.digipeater_updates
    }

    pub fn routes(&self) -> &[Route] {
        &self.tables.routes
    }

    /// `(src, dest)` of a route.
    pub fn route(&self, id: RouteId) -> Option<(String, String)> {
        self.tables
            .routes
            .iter()
            .find(|r| r.id == id)
            .map(|r| (r.src.clone(), r.dest.clone()))
    }

    pub fn path_hops(&self) -> &[PathHop] {
        &self.tables.path_hops
    }

    pub fn envelopes(&self) -> &[StoredEnvelope] {
        &self.tables.envelopes
    }

    pub fn envelope(&self, pid: PacketId) -> Option<&StoredEnvelope> {
        self.tables.envelopes.iter().find(|e| e.pid == pid)
    }

    pub fn format_rows(&self, table: FormatTable) -> Vec<&FormatRow> {
        self.tables.format_rows.iter().filter(|r| r.table == table).collect()
    }

    pub fn ingest_errors(&self) -> &[NewIngestError] {
        &self.tables.ingest_errors
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.tables.sessions.iter().find(|s| s.id == id)
    }

    fn next_id(&mut self, table: &'static str) -> i64 {
        let id = self.sequences.entry(table).or_insert(0);
        *id += 1;
        *id
    }

    fn check_writable(&self, table: &str) -> Result<(), StoreError> {
        if self.failing.contains(table) {
            return Err(StoreError::Query(format!("write to {} failed", table)));
        }
        Ok(())
    }
}

fn check_callsign(column: &str, value: &str) -> Result<(), StoreError> {
    if value.chars().count() > MAX_CALLSIGN_LEN {
        return Err(StoreError::Validation(format!(
            "value too long for {} (max {}): {}",
            column, MAX_CALLSIGN_LEN, value
        )));
    }
    Ok(())
}

impl Store for MemoryStore {
    fn transaction<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self) -> Result<T, E>,
        E: From<StoreError>,
    {
        let snapshot = self.tables.clone();
        let result = f(self);
        if result.is_err() {
            self.tables = snapshot;
        }
        result
    }

    fn find_location(&mut self, coordinates: Coordinates) -> Result<Option<LocationId>, StoreError> {
        let key = coordinates.key();
        Ok(self
            .tables
            .locations
            .iter()
            .find(|l| l.coordinates.key() == key)
            .map(|l| l.id))
    }

    fn insert_location(&mut self, coordinates: Coordinates) -> Result<Option<LocationId>, StoreError> {
        self.check_writable("locations")?;
        if !coordinates.is_valid() {
            return Err(StoreError::Validation(format!(
                "coordinates out of range: ({}, {})",
                coordinates.latitude(),
                coordinates.longitude()
            )));
        }
        if self.find_location(coordinates)?.is_some() {
            return Ok(None);
        }
        let id = self.next_id("locations");
        self.tables.locations.push(Location {
            id,
            coordinates,
            geometry: coordinates.to_ewkt(),
        });
        Ok(Some(id))
    }

    fn find_digipeater(&mut self, callsign: &str) -> Result<Option<Digipeater>, StoreError> {
        Ok(self.digipeater(callsign).cloned())
    }

    fn insert_digipeater(&mut self, digipeater: &NewDigipeater) -> Result<Option<DigipeaterId>, StoreError> {
        self.check_writable("digipeaters")?;
        check_callsign("digipeaters.callsign", &digipeater.callsign)?;
        if self.digipeater(&digipeater.callsign).is_some() {
            return Ok(None);
        }
        let id = self.next_id("digipeaters");
        self.tables.digipeaters.push(Digipeater {
            id,
            callsign: digipeater.callsign.clone(),
            symbol: digipeater.symbol.clone(),
            symbol_table: digipeater.symbol_table.clone(),
            location_id: digipeater.location_id,
        });
        Ok(Some(id))
    }

    fn update_digipeater(&mut self, id: DigipeaterId, update: &DigipeaterUpdate) -> Result<(), StoreError> {
        self.check_writable("digipeaters")?;
        let digi = self
            .tables
            .digipeaters
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("digipeater {}", id)))?;
        digi.symbol = Some(update.symbol.clone());
        digi.symbol_table = Some(update.symbol_table.clone());
        digi.location_id = Some(update.location_id);
        self.tables.digipeater_updates += 1;
        Ok(())
    }

    fn find_route(&mut self, src: &str, dest: &str) -> Result<Option<RouteId>, StoreError> {
        Ok(self
            .tables
            .routes
            .iter()
            .find(|r| r.src == src && r.dest == dest)
            .map(|r| r.id))
    }

    fn insert_route(&mut self, src: &str, dest: &str) -> Result<Option<RouteId>, StoreError> {
        self.check_writable("routes")?;
        check_callsign("routes.src", src)?;
        check_callsign("routes.dest", dest)?;
        if self.find_route(src, dest)?.is_some() {
            return Ok(None);
        }
        let id = self.next_id("routes");
        self.tables.routes.push(Route {
            id,
            src: src.to_string(),
            dest: dest.to_string(),
        });
        Ok(Some(id))
    }

    fn insert_path_hop(&mut self, hop: &PathHop) -> Result<(), StoreError> {
        self.check_writable("path_hops")?;
        if self
            .tables
            .path_hops
            .iter()
            .any(|h| h.packet_id == hop.packet_id && h.hop == hop.hop)
        {
            return Err(StoreError::Query(format!(
                "duplicate key value violates unique constraint \"path_hops_pkey\": ({}, {})",
                hop.packet_id, hop.hop
            )));
        }
        self.tables.path_hops.push(*hop);
        Ok(())
    }

    fn insert_envelope(&mut self, envelope: &NewEnvelope) -> Result<PacketId, StoreError> {
        self.check_writable("packets")?;
        check_callsign("packets.src", &envelope.src)?;
        check_callsign("packets.dest", &envelope.dest)?;
        if envelope.format.chars().count() > MAX_FORMAT_LEN {
            return Err(StoreError::Validation(format!(
                "value too long for packets.format (max {}): {}",
                MAX_FORMAT_LEN, envelope.format
            )));
        }
        let pid = self.next_id("packets");
        self.tables.envelopes.push(StoredEnvelope {
            pid,
            envelope: envelope.clone(),
        });
        Ok(pid)
    }

    fn insert_format_row(&mut self, row: &FormatRow) -> Result<(), StoreError> {
        self.check_writable(row.table.table_name())?;
        self.tables.format_rows.push(row.clone());
        Ok(())
    }

    fn insert_ingest_error(&mut self, error: &NewIngestError) -> Result<(), StoreError> {
        self.check_writable("ingest_errors")?;
        self.tables.ingest_errors.push(error.clone());
        Ok(())
    }

    fn create_session(&mut self, started_at: DateTime<Utc>) -> Result<SessionId, StoreError> {
        self.check_writable("sessions")?;
        let id = self.next_id("sessions");
        self.tables.sessions.push(Session {
            id,
            started_at,
            offset_seconds: 0.0,
        });
        Ok(id)
    }

    fn session_started_at(&mut self, id: SessionId) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.session(id).map(|s| s.started_at))
    }

    fn set_session_offset(&mut self, id: SessionId, offset_seconds: f64) -> Result<bool, StoreError> {
        self.check_writable("sessions")?;
        match self.tables.sessions.iter_mut().find(|s| s.id == id) {
            Some(session) => {
                session.offset_seconds = offset_seconds;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
