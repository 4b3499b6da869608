//! APRS packet decoder.
//!
//! Turns one raw `SRC>DEST,PATH:body` string into a flat field map using the
//! decoder-native key names (`from`, `to`, `addresse`, `msgNo`, `tPARM`, ...).
//! The [`Normalizer`](crate::normalizer) rewrites those into storage names.

mod mic_e;
mod message;
mod object;
mod position;
mod weather;

use serde_json::{Map, Value, json};

use crate::error::DecodeError;

/// Structured record produced by a [`PacketDecoder`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedPacket {
    fields: Map<String, Value>,
}

impl DecodedPacket {
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        self.fields.insert(key.to_string(), value);
    }

    pub fn format(&self) -> Option<&str> {
        self.get("format").and_then(Value::as_str)
    }

    /// The embedded packet string of a third-party packet.
    pub fn subpacket(&self) -> Option<&str> {
        self.get("subpacket").and_then(Value::as_str)
    }
}

/// Decoder collaborator of the envelope processor.
pub trait PacketDecoder {
    fn decode(&self, raw: &str) -> Result<DecodedPacket, DecodeError>;
}

/// Default decoder for AX.25-over-text APRS packets as printed by TNC software.
#[derive(Debug, Clone, Copy, Default)]
pub struct AprsDecoder;

type Fields = Map<String, Value>;

impl PacketDecoder for AprsDecoder {
    fn decode(&self, raw: &str) -> Result<DecodedPacket, DecodeError> {
        let raw = raw.trim_end_matches(['\r', '\n']);
        let (header, body) = raw
            .split_once(':')
            .ok_or_else(|| DecodeError::Fatal("packet has no header separator".to_string()))?;

        let mut fields = parse_header(header).map_err(DecodeError::Fatal)?;
        fields.insert("raw".to_string(), json!(raw));

        let Some(identifier) = body.chars().next() else {
            return Err(DecodeError::Partial {
                salvaged: Box::new(DecodedPacket::from_fields(fields)),
                reason: "packet body is empty".to_string(),
            });
        };

        let dest = fields
            .get("to")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut body_fields = Fields::new();
        let rest = &body[identifier.len_utf8()..];

        let parsed = match identifier {
            '!' | '=' => {
                body_fields.insert("messagecapable".to_string(), json!(identifier == '='));
                position::parse(rest, &mut body_fields)
            }
            '/' | '@' => {
                body_fields.insert("messagecapable".to_string(), json!(identifier == '@'));
                position::take_timestamp(rest, &mut body_fields)
                    .and_then(|rest| position::parse(rest, &mut body_fields))
            }
            '`' | '\'' => mic_e::parse(&dest, rest, &mut body_fields),
            ';' => object::parse_object(rest, &mut body_fields),
            ')' => object::parse_item(rest, &mut body_fields),
            ':' => message::parse_message(rest, &mut body_fields),
            '>' => message::parse_status(rest, &mut body_fields),
            'T' if rest.starts_with('#') => message::parse_telemetry(&rest[1..], &mut body_fields),
            '_' => weather::parse_positionless(rest, &mut body_fields),
            '}' => parse_third_party(rest, &mut body_fields),
            _ => {
                return Err(DecodeError::UnknownFormat {
                    salvaged: Box::new(DecodedPacket::from_fields(fields)),
                });
            }
        };

        match parsed {
            Ok(()) => {
                fields.extend(body_fields);
                Ok(DecodedPacket::from_fields(fields))
            }
            Err(reason) => Err(DecodeError::Partial {
                salvaged: Box::new(DecodedPacket::from_fields(fields)),
                reason,
            }),
        }
    }
}

fn is_station_char(c: char) -> bool {
    c.is_ascii_graphic() && !matches!(c, '>' | ',' | ':')
}

/// `SRC>DEST[,PATH...]` into `from`, `to` and `path`.
fn parse_header(header: &str) -> Result<Fields, String> {
    let (src, rest) = header
        .split_once('>')
        .ok_or_else(|| "header has no destination".to_string())?;
    let mut parts = rest.split(',');
    let dest = parts.next().unwrap_or_default();

    if src.is_empty() || !src.chars().all(is_station_char) {
        return Err(format!("invalid source callsign {:?}", src));
    }
    if dest.is_empty() || !dest.chars().all(is_station_char) {
        return Err(format!("invalid destination callsign {:?}", dest));
    }

    let path: Vec<Value> = parts.map(|hop| json!(hop.trim())).collect();

    let mut fields = Fields::new();
    fields.insert("from".to_string(), json!(src));
    fields.insert("to".to_string(), json!(dest));
    fields.insert("path".to_string(), Value::Array(path));
    Ok(fields)
}

fn parse_third_party(rest: &str, fields: &mut Fields) -> Result<(), String> {
    let inner = rest.trim();
    if inner.is_empty() {
        return Err("third-party packet has no embedded packet".to_string());
    }
    fields.insert("format".to_string(), json!("third-party"));
    fields.insert("subpacket".to_string(), json!(inner));
    Ok(())
}

/// Decode a base-91 number (each character `!`..`{`).
pub(crate) fn base91(text: &str) -> Option<u32> {
    text.bytes().try_fold(0u32, |acc, b| {
        if (33..=123).contains(&b) {
            Some(acc * 91 + u32::from(b - 33))
        } else {
            None
        }
    })
}
