//! Boundary to the persistent store.
//!
//! The pipeline only talks to storage through [`Store`]. The PostgreSQL
//! implementation lives in [`crate::pg_store`]; [`crate::memory_store`]
//! keeps everything in process for tests and dry runs.

use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::digipeaters::{Digipeater, DigipeaterUpdate, NewDigipeater};
use crate::error::StoreError;
use crate::formats::FormatRow;
use crate::locations::Coordinates;

pub type PacketId = i64;
pub type LocationId = i64;
pub type RouteId = i64;
pub type SessionId = i64;
pub type DigipeaterId = i64;

/// Longest callsign the envelope, digipeater and route tables accept.
pub const MAX_CALLSIGN_LEN: usize = 16;

/// Longest format tag the envelope table accepts.
pub const MAX_FORMAT_LEN: usize = 32;

/// Scalar value handed to the store. Structured values are stringified
/// before they get here.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl FieldValue {
    /// Convert a decoded JSON value. `null` has no scalar form and yields `None`;
    /// arrays and objects become their JSON text.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(FieldValue::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(FieldValue::Integer(i)),
                None => n.as_f64().map(FieldValue::Float),
            },
            Value::String(s) => Some(FieldValue::Text(s.clone())),
            Value::Array(_) | Value::Object(_) => Some(FieldValue::Text(value.to_string())),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(i) => Some(*i as f64),
            FieldValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Integer(i) => write!(f, "{}", i),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// Envelope row: one per decoded packet, sub-packets included.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEnvelope {
    pub src: String,
    pub dest: String,
    pub format: String,
    pub received_at: DateTime<Utc>,
    pub session_id: SessionId,
    pub is_subpacket: bool,
    pub receiver_location_id: Option<LocationId>,
    pub raw: Option<String>,
    pub parse_error: Option<String>,
}

/// Diagnostic row written when a packet could not be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewIngestError {
    pub received_at: DateTime<Utc>,
    pub session_id: SessionId,
    pub raw: String,
    pub message: String,
}

/// One hop of one packet's relay path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathHop {
    pub packet_id: PacketId,
    pub hop: i32,
    pub route_id: RouteId,
}

/// Transactional store used by the ingestion pipeline.
///
/// `transaction` may be nested; inner calls behave as savepoints, so an
/// inner failure can be recovered from without abandoning the outer scope.
/// `insert_*` methods that can hit a uniqueness constraint return `None`
/// when the row already exists instead of failing.
pub trait Store {
    fn transaction<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self) -> Result<T, E>,
        E: From<StoreError>;

    fn find_location(&mut self, coordinates: Coordinates) -> Result<Option<LocationId>, StoreError>;
    fn insert_location(&mut self, coordinates: Coordinates) -> Result<Option<LocationId>, StoreError>;

    fn find_digipeater(&mut self, callsign: &str) -> Result<Option<Digipeater>, StoreError>;
    fn insert_digipeater(&mut self, digipeater: &NewDigipeater) -> Result<Option<DigipeaterId>, StoreError>;
    fn update_digipeater(&mut self, id: DigipeaterId, update: &DigipeaterUpdate) -> Result<(), StoreError>;

    fn find_route(&mut self, src: &str, dest: &str) -> Result<Option<RouteId>, StoreError>;
    fn insert_route(&mut self, src: &str, dest: &str) -> Result<Option<RouteId>, StoreError>;
    fn insert_path_hop(&mut self, hop: &PathHop) -> Result<(), StoreError>;

    fn insert_envelope(&mut self, envelope: &NewEnvelope) -> Result<PacketId, StoreError>;
    fn insert_format_row(&mut self, row: &FormatRow) -> Result<(), StoreError>;
    fn insert_ingest_error(&mut self, error: &NewIngestError) -> Result<(), StoreError>;

    fn create_session(&mut self, started_at: DateTime<Utc>) -> Result<SessionId, StoreError>;
    fn session_started_at(&mut self, id: SessionId) -> Result<Option<DateTime<Utc>>, StoreError>;
    /// Returns `false` when no such session exists.
    fn set_session_offset(&mut self, id: SessionId, offset_seconds: f64) -> Result<bool, StoreError>;
}
