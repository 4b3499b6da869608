//! Mic-E: latitude and message bits ride in the destination callsign,
//! longitude, speed and course in the first bytes of the body.

use serde_json::json;

use super::position::{KNOTS_TO_KMH, finish_comment};
use super::{Fields, base91};

/// One destination character: (latitude digit, message bit set, bit is custom, "high" flag).
fn destination_char(c: u8) -> Option<(u8, bool, bool, bool)> {
    match c {
        b'0'..=b'9' => Some((c - b'0', false, false, false)),
        b'A'..=b'J' => Some((c - b'A', true, true, false)),
        b'K' => Some((0, true, true, false)),
        b'L' => Some((0, false, false, false)),
        b'P'..=b'Y' => Some((c - b'P', true, false, true)),
        b'Z' => Some((0, true, false, true)),
        _ => None,
    }
}

const STANDARD_TYPES: [&str; 8] = [
    "Emergency",
    "M6: Priority",
    "M5: Special",
    "M4: Committed",
    "M3: Returning",
    "M2: In Service",
    "M1: En Route",
    "M0: Off Duty",
];

const CUSTOM_TYPES: [&str; 8] = [
    "Emergency",
    "C6: Custom-6",
    "C5: Custom-5",
    "C4: Custom-4",
    "C3: Custom-3",
    "C2: Custom-2",
    "C1: Custom-1",
    "C0: Custom-0",
];

pub(super) fn parse(dest: &str, body: &str, fields: &mut Fields) -> Result<(), String> {
    let dest = dest.split('-').next().unwrap_or_default().as_bytes();
    if dest.len() != 6 {
        return Err(format!("Mic-E destination must be 6 characters, got {}", dest.len()));
    }
    let mut digits = [0u8; 6];
    let mut flags = [false; 6];
    let mut bits = String::with_capacity(3);
    let (mut any_standard, mut any_custom) = (false, false);
    let mut ambiguity = 0;
    for (i, c) in dest.iter().enumerate() {
        let (digit, bit, custom, high) =
            destination_char(*c).ok_or_else(|| format!("invalid Mic-E destination character {:?}", *c as char))?;
        if matches!(c, b'K' | b'L' | b'Z') {
            ambiguity += 1;
        }
        digits[i] = digit;
        flags[i] = high;
        if i < 3 {
            bits.push(if bit { '1' } else { '0' });
            if bit {
                any_standard |= !custom;
                any_custom |= custom;
            }
        }
    }

    let degrees = f64::from(digits[0] * 10 + digits[1]);
    let minutes = f64::from(digits[2] * 10 + digits[3]) + f64::from(digits[4] * 10 + digits[5]) / 100.0;
    let mut latitude = degrees + minutes / 60.0;
    if !flags[3] {
        latitude = -latitude;
    }

    let info = body.as_bytes();
    if info.len() < 8 || !info[..8].iter().all(|b| (28..=127).contains(b)) {
        return Err("Mic-E body is truncated".to_string());
    }

    let mut lon_degrees = i32::from(info[0]) - 28;
    if flags[4] {
        lon_degrees += 100;
    }
    if (180..=189).contains(&lon_degrees) {
        lon_degrees -= 80;
    } else if (190..=199).contains(&lon_degrees) {
        lon_degrees -= 190;
    }
    let mut lon_minutes = i32::from(info[1]) - 28;
    if lon_minutes >= 60 {
        lon_minutes -= 60;
    }
    let lon_hundredths = i32::from(info[2]) - 28;
    let mut longitude = f64::from(lon_degrees) + (f64::from(lon_minutes) + f64::from(lon_hundredths) / 100.0) / 60.0;
    if flags[5] {
        longitude = -longitude;
    }
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err("Mic-E position out of range".to_string());
    }

    let sp = i32::from(info[3]) - 28;
    let dc = i32::from(info[4]) - 28;
    let se = i32::from(info[5]) - 28;
    let mut speed = sp * 10 + dc / 10;
    if speed >= 800 {
        speed -= 800;
    }
    let mut course = (dc % 10) * 100 + se;
    if course >= 400 {
        course -= 400;
    }

    let symbol = char::from(info[6]);
    let table = char::from(info[7]);

    let mtype = match (any_standard, any_custom) {
        (true, true) => "Unknown",
        (_, true) => CUSTOM_TYPES[usize::from(u8::from_str_radix(&bits, 2).unwrap_or(0))],
        _ => STANDARD_TYPES[usize::from(u8::from_str_radix(&bits, 2).unwrap_or(0))],
    };

    fields.insert("format".to_string(), json!("mic-e"));
    fields.insert("latitude".to_string(), json!(latitude));
    fields.insert("longitude".to_string(), json!(longitude));
    fields.insert("posambiguity".to_string(), json!(ambiguity));
    fields.insert("symbol".to_string(), json!(symbol.to_string()));
    fields.insert("symbol_table".to_string(), json!(table.to_string()));
    fields.insert("speed".to_string(), json!(f64::from(speed) * KNOTS_TO_KMH));
    if (1..=360).contains(&course) {
        fields.insert("course".to_string(), json!(course));
    }
    fields.insert("mbits".to_string(), json!(bits));
    fields.insert("mtype".to_string(), json!(mtype));

    let mut comment = body.get(8..).unwrap_or_default();
    // optional base-91 altitude: three characters and a closing brace
    if let Some(altitude) = comment.get(..4).filter(|a| a.ends_with('}')) {
        if let Some(value) = base91(&altitude[..3]) {
            fields.insert("altitude".to_string(), json!(f64::from(value) - 10000.0));
            comment = &comment[4..];
        }
    }
    finish_comment(comment, fields);
    Ok(())
}
