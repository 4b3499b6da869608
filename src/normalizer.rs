//! Maps decoder-native field names and values onto the shape persistence expects.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::decoder::DecodedPacket;
use crate::error::ProcessError;
use crate::formats::PacketFormat;
use crate::locations::Coordinates;
use crate::store::FieldValue;

/// Decoder key for the message addressee (sic).
const DECODER_ADDRESSEE: &str = "addresse";

/// A decoded packet after normalisation. Header fields are lifted out of the
/// field map; everything else is a lower-case key with a scalar value.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPacket {
    pub src: String,
    pub dest: String,
    pub format: PacketFormat,
    pub path: Vec<String>,
    pub has_wx: bool,
    /// Embedded packet of a third-party packet, still undecoded.
    pub subpacket: Option<String>,
    pub fields: BTreeMap<String, FieldValue>,
}

impl NormalizedPacket {
    pub fn text(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(FieldValue::as_text)
    }

    pub fn symbol(&self) -> Option<&str> {
        self.text("symbol")
    }

    pub fn symbol_table(&self) -> Option<&str> {
        self.text("symbol_table")
    }

    /// Position, when both latitude and longitude are present.
    pub fn coordinates(&self) -> Option<Coordinates> {
        let latitude = self.fields.get("latitude")?.as_f64()?;
        let longitude = self.fields.get("longitude")?.as_f64()?;
        Some(Coordinates::new(latitude, longitude))
    }
}

/// Lower-case the tag and replace anything that is not `[a-z0-9_]` with `_`.
pub fn canonical_format(tag: &str) -> String {
    tag.chars()
        .map(|c| c.to_ascii_lowercase())
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn take_string(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match fields.remove(key)? {
        Value::String(s) => Some(s),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

pub fn normalize(packet: DecodedPacket) -> Result<NormalizedPacket, ProcessError> {
    let mut raw = packet.into_fields();

    let dest = take_string(&mut raw, "to").ok_or(ProcessError::MissingField("dest"))?;
    let src = take_string(&mut raw, "from").ok_or(ProcessError::MissingField("src"))?;
    let format = take_string(&mut raw, "format").ok_or(ProcessError::MissingField("format"))?;
    let format = PacketFormat::from_tag(&canonical_format(&format));

    if let Some(addressee) = raw.get(DECODER_ADDRESSEE).cloned() {
        raw.insert("addressee".to_string(), addressee);
    }

    let path = match raw.remove("path") {
        Some(Value::Array(hops)) => hops
            .into_iter()
            .filter_map(|hop| match hop {
                Value::String(s) => Some(s),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    };

    let subpacket = take_string(&mut raw, "subpacket");
    raw.remove("raw");

    let mut fields = BTreeMap::new();
    let mut has_wx = false;
    for (key, value) in raw {
        let key = key.to_lowercase();
        if key == "weather" {
            if let Value::Object(weather) = value {
                has_wx = true;
                for (wx_key, wx_value) in weather {
                    if let Some(v) = FieldValue::from_json(&wx_value) {
                        fields.insert(wx_key.to_lowercase(), v);
                    }
                }
                continue;
            }
        }
        if let Some(v) = FieldValue::from_json(&value) {
            fields.insert(key, v);
        }
    }

    Ok(NormalizedPacket {
        src,
        dest,
        format,
        path,
        has_wx,
        subpacket,
        fields,
    })
}
