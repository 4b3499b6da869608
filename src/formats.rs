//! Static mapping from packet format to the table and columns it is stored in.
//!
//! Every format-specific table is keyed by the envelope's `pid`. Only the
//! columns listed here are ever written; other decoded fields are dropped.

use std::collections::BTreeMap;
use std::fmt;

use crate::store::{FieldValue, PacketId};

/// Canonical (storage-safe) packet format tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketFormat {
    Uncompressed,
    Compressed,
    MicE,
    Object,
    Item,
    Status,
    Message,
    TelemetryMessage,
    Telemetry,
    Weather,
    ThirdParty,
    ParseError,
    Unknown,
    Other(String),
}

impl PacketFormat {
    /// Parse an already canonicalised tag.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "uncompressed" => PacketFormat::Uncompressed,
            "compressed" => PacketFormat::Compressed,
            "mic_e" => PacketFormat::MicE,
            "object" => PacketFormat::Object,
            "item" => PacketFormat::Item,
            "status" => PacketFormat::Status,
            "message" => PacketFormat::Message,
            "telemetry_message" => PacketFormat::TelemetryMessage,
            "telemetry" => PacketFormat::Telemetry,
            "weather" => PacketFormat::Weather,
            "third_party" => PacketFormat::ThirdParty,
            "parse_error" => PacketFormat::ParseError,
            "unknown" => PacketFormat::Unknown,
            other => PacketFormat::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PacketFormat::Uncompressed => "uncompressed",
            PacketFormat::Compressed => "compressed",
            PacketFormat::MicE => "mic_e",
            PacketFormat::Object => "object",
            PacketFormat::Item => "item",
            PacketFormat::Status => "status",
            PacketFormat::Message => "message",
            PacketFormat::TelemetryMessage => "telemetry_message",
            PacketFormat::Telemetry => "telemetry",
            PacketFormat::Weather => "weather",
            PacketFormat::ThirdParty => "third_party",
            PacketFormat::ParseError => "parse_error",
            PacketFormat::Unknown => "unknown",
            PacketFormat::Other(tag) => tag,
        }
    }

    /// Objects and items describe something other than their sender.
    pub fn describes_other_station(&self) -> bool {
        matches!(self, PacketFormat::Object | PacketFormat::Item)
    }
}

impl fmt::Display for PacketFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FormatTable {
    Uncompressed,
    Compressed,
    MicE,
    Object,
    Status,
    Message,
    TelemetryMessage,
    Weather,
    ThirdParty,
    MapEntry,
}

const UNCOMPRESSED_COLUMNS: &[&str] = &[
    "latitude",
    "longitude",
    "posambiguity",
    "symbol",
    "symbol_table",
    "comment",
    "altitude",
    "course",
    "speed",
    "phg",
    "rng",
    "messagecapable",
    "raw_timestamp",
];

const COMPRESSED_COLUMNS: &[&str] = &[
    "latitude",
    "longitude",
    "symbol",
    "symbol_table",
    "comment",
    "altitude",
    "course",
    "speed",
    "rng",
    "gpsfixstatus",
    "messagecapable",
    "raw_timestamp",
];

const MIC_E_COLUMNS: &[&str] = &[
    "latitude",
    "longitude",
    "posambiguity",
    "symbol",
    "symbol_table",
    "comment",
    "altitude",
    "course",
    "speed",
    "mbits",
    "mtype",
];

const OBJECT_COLUMNS: &[&str] = &[
    "object_name",
    "alive",
    "latitude",
    "longitude",
    "posambiguity",
    "symbol",
    "symbol_table",
    "comment",
    "altitude",
    "course",
    "speed",
    "phg",
    "rng",
    "raw_timestamp",
];

const STATUS_COLUMNS: &[&str] = &["status", "raw_timestamp"];

const MESSAGE_COLUMNS: &[&str] = &["addressee", "message_text", "msgno", "response"];

const TELEMETRY_MESSAGE_COLUMNS: &[&str] = &["addressee", "title", "tparm", "tunit", "teqns", "tbits"];

const WEATHER_COLUMNS: &[&str] = &[
    "wind_direction",
    "wind_speed",
    "wind_gust",
    "temperature",
    "rain_1h",
    "rain_24h",
    "rain_since_midnight",
    "humidity",
    "pressure",
    "luminosity",
    "snow",
    "rain_raw",
    "comment",
];

const THIRD_PARTY_COLUMNS: &[&str] = &["subpacket_id", "subpacket_type"];

const MAP_ENTRY_COLUMNS: &[&str] = &[
    "lid",
    "symbol",
    "symbol_table",
    "course",
    "speed",
    "altitude",
    "phg",
    "rng",
];

impl FormatTable {
    pub const ALL: [FormatTable; 10] = [
        FormatTable::Uncompressed,
        FormatTable::Compressed,
        FormatTable::MicE,
        FormatTable::Object,
        FormatTable::Status,
        FormatTable::Message,
        FormatTable::TelemetryMessage,
        FormatTable::Weather,
        FormatTable::ThirdParty,
        FormatTable::MapEntry,
    ];

    /// Table holding the fields of a packet's own declared format, if any.
    pub fn for_format(format: &PacketFormat) -> Option<Self> {
        match format {
            PacketFormat::Uncompressed => Some(FormatTable::Uncompressed),
            PacketFormat::Compressed => Some(FormatTable::Compressed),
            PacketFormat::MicE => Some(FormatTable::MicE),
            PacketFormat::Object => Some(FormatTable::Object),
            PacketFormat::Status => Some(FormatTable::Status),
            PacketFormat::Message => Some(FormatTable::Message),
            PacketFormat::TelemetryMessage => Some(FormatTable::TelemetryMessage),
            PacketFormat::Weather => Some(FormatTable::Weather),
            PacketFormat::ThirdParty => Some(FormatTable::ThirdParty),
            PacketFormat::Item
            | PacketFormat::Telemetry
            | PacketFormat::ParseError
            | PacketFormat::Unknown
            | PacketFormat::Other(_) => None,
        }
    }

    pub fn table_name(self) -> &'static str {
        match self {
            FormatTable::Uncompressed => "uncompressed",
            FormatTable::Compressed => "compressed",
            FormatTable::MicE => "mic_e",
            FormatTable::Object => "object",
            FormatTable::Status => "status",
            FormatTable::Message => "message",
            FormatTable::TelemetryMessage => "telemetry_message",
            FormatTable::Weather => "weather",
            FormatTable::ThirdParty => "third_party",
            FormatTable::MapEntry => "map_entry",
        }
    }

    /// Data columns, excluding `pid`.
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            FormatTable::Uncompressed => UNCOMPRESSED_COLUMNS,
            FormatTable::Compressed => COMPRESSED_COLUMNS,
            FormatTable::MicE => MIC_E_COLUMNS,
            FormatTable::Object => OBJECT_COLUMNS,
            FormatTable::Status => STATUS_COLUMNS,
            FormatTable::Message => MESSAGE_COLUMNS,
            FormatTable::TelemetryMessage => TELEMETRY_MESSAGE_COLUMNS,
            FormatTable::Weather => WEATHER_COLUMNS,
            FormatTable::ThirdParty => THIRD_PARTY_COLUMNS,
            FormatTable::MapEntry => MAP_ENTRY_COLUMNS,
        }
    }

    /// Pick this table's columns out of a normalised field map.
    pub fn row(self, packet_id: PacketId, fields: &BTreeMap<String, FieldValue>) -> FormatRow {
        let mut values = Vec::with_capacity(self.columns().len() + 1);
        values.push(("pid", FieldValue::Integer(packet_id)));
        for column in self.columns() {
            if let Some(value) = fields.get(*column) {
                values.push((*column, value.clone()));
            }
        }
        FormatRow { table: self, values }
    }
}

impl fmt::Display for FormatTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

/// Column/value pairs bound for one format table, `pid` first.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatRow {
    pub table: FormatTable,
    pub values: Vec<(&'static str, FieldValue)>,
}

impl FormatRow {
    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.values
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, value)| value)
    }

    pub fn packet_id(&self) -> Option<PacketId> {
        self.get("pid").and_then(FieldValue::as_i64)
    }
}
