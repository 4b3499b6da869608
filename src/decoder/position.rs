use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use super::{Fields, base91, weather};

pub(super) const KNOTS_TO_KMH: f64 = 1.852;
pub(super) const FEET_TO_METRES: f64 = 0.3048;
const MILES_TO_KM: f64 = 1.609344;

static ALTITUDE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/A=(-\d{5}|\d{6})").expect("valid altitude regex"));

/// Leading `DDHHMMz`, `HHMMSSh` or `DDHHMM/` timestamp. Kept verbatim.
pub(super) fn take_timestamp<'a>(body: &'a str, fields: &mut Fields) -> Result<&'a str, String> {
    let stamp = body.get(..7).ok_or("timestamp is truncated")?;
    let (digits, kind) = stamp.split_at(6);
    if !digits.bytes().all(|b| b.is_ascii_digit()) || !matches!(kind, "z" | "h" | "/") {
        return Err(format!("invalid timestamp {:?}", stamp));
    }
    fields.insert("raw_timestamp".to_string(), json!(stamp));
    Ok(&body[7..])
}

/// Position report body starting at the coordinates.
pub(super) fn parse(body: &str, fields: &mut Fields) -> Result<(), String> {
    let comment = parse_coordinates(body, fields)?;
    let comment = if fields.get("symbol").and_then(|s| s.as_str()) == Some("_") {
        let (data, rest) = weather::parse_weather_data(comment, true);
        if !data.is_empty() {
            fields.insert("weather".to_string(), serde_json::Value::Object(data));
        }
        rest
    } else {
        parse_data_extension(comment, fields)
    };
    finish_comment(comment, fields);
    Ok(())
}

/// Uncompressed or compressed coordinates plus symbol. Sets `format` and
/// returns the remaining text.
pub(super) fn parse_coordinates<'a>(body: &'a str, fields: &mut Fields) -> Result<&'a str, String> {
    match body.bytes().next() {
        Some(b) if b.is_ascii_digit() => parse_uncompressed(body, fields),
        Some(b'/' | b'\\') | Some(b'A'..=b'Z') | Some(b'a'..=b'j') => parse_compressed(body, fields),
        _ => Err("position is neither compressed nor uncompressed".to_string()),
    }
}

fn parse_uncompressed<'a>(body: &'a str, fields: &mut Fields) -> Result<&'a str, String> {
    let head = body.get(..19).ok_or("uncompressed position is truncated")?;
    if !head.is_ascii() {
        return Err("uncompressed position has non-ASCII characters".to_string());
    }
    let (lat_text, rest) = head.split_at(8);
    let (table, rest) = rest.split_at(1);
    let (lon_text, symbol) = rest.split_at(9);

    let ambiguity = lat_text.bytes().filter(|b| *b == b' ').count();
    let latitude = parse_degrees(lat_text, 2, 'N', 'S', 90.0)?;
    let longitude = parse_degrees(lon_text, 3, 'E', 'W', 180.0)?;

    fields.insert("format".to_string(), json!("uncompressed"));
    fields.insert("latitude".to_string(), json!(latitude));
    fields.insert("longitude".to_string(), json!(longitude));
    fields.insert("posambiguity".to_string(), json!(ambiguity));
    fields.insert("symbol_table".to_string(), json!(table));
    fields.insert("symbol".to_string(), json!(symbol));
    Ok(&body[19..])
}

/// `DDMM.hhN` / `DDDMM.hhW`; ambiguity spaces read as zero.
fn parse_degrees(text: &str, degree_digits: usize, positive: char, negative: char, max: f64) -> Result<f64, String> {
    let invalid = || format!("invalid coordinate {:?}", text);
    let hemisphere = text.chars().last().ok_or_else(invalid)?;
    let number: String = text[..text.len() - 1].replace(' ', "0");
    let well_formed = number.bytes().enumerate().all(|(i, b)| {
        if i == degree_digits + 2 {
            b == b'.'
        } else {
            b.is_ascii_digit()
        }
    });
    if !well_formed || number.len() != degree_digits + 5 {
        return Err(invalid());
    }
    let degrees: f64 = number[..degree_digits].parse().map_err(|_| invalid())?;
    let minutes: f64 = number[degree_digits..].parse().map_err(|_| invalid())?;
    if minutes >= 60.0 {
        return Err(invalid());
    }
    let value = degrees + minutes / 60.0;
    if value > max {
        return Err(invalid());
    }
    match hemisphere {
        c if c == positive => Ok(value),
        c if c == negative => Ok(-value),
        _ => Err(invalid()),
    }
}

fn parse_compressed<'a>(body: &'a str, fields: &mut Fields) -> Result<&'a str, String> {
    let head = body.get(..13).ok_or("compressed position is truncated")?;
    if !head.bytes().all(|b| (32..=126).contains(&b)) {
        return Err("compressed position has non-printable characters".to_string());
    }
    let bytes = head.as_bytes();
    let lat = base91(&head[1..5]).ok_or("invalid compressed latitude")?;
    let lon = base91(&head[5..9]).ok_or("invalid compressed longitude")?;

    fields.insert("format".to_string(), json!("compressed"));
    fields.insert("latitude".to_string(), json!(90.0 - f64::from(lat) / 380926.0));
    fields.insert("longitude".to_string(), json!(-180.0 + f64::from(lon) / 190463.0));
    fields.insert("symbol_table".to_string(), json!(&head[0..1]));
    fields.insert("symbol".to_string(), json!(&head[9..10]));

    let (c, s, t) = (bytes[10], bytes[11], bytes[12]);
    if c != b' ' {
        if !(33..=123).contains(&c) || !(33..=123).contains(&s) || !(33..=123).contains(&t) {
            return Err("invalid compressed extension".to_string());
        }
        let (c, s, t) = (i32::from(c - 33), i32::from(s - 33), t - 33);
        fields.insert("gpsfixstatus".to_string(), json!((t >> 5) & 1));
        if t & 0x18 == 0x10 {
            let feet = 1.002f64.powi(c * 91 + s);
            fields.insert("altitude".to_string(), json!(feet * FEET_TO_METRES));
        } else if c <= 89 {
            fields.insert("course".to_string(), json!(c * 4));
            fields.insert("speed".to_string(), json!((1.08f64.powi(s) - 1.0) * KNOTS_TO_KMH));
        } else if c == 90 {
            fields.insert("rng".to_string(), json!(2.0 * 1.08f64.powi(s) * MILES_TO_KM));
        }
    }
    Ok(&body[13..])
}

/// Seven-byte data extension: `CSE/SPD`, `PHGphgd` or `RNGrrrr`.
pub(super) fn parse_data_extension<'a>(comment: &'a str, fields: &mut Fields) -> &'a str {
    let Some(ext) = comment.get(..7).filter(|ext| ext.is_ascii()) else {
        return comment;
    };
    let b = ext.as_bytes();
    let digits = |range: std::ops::Range<usize>| b[range].iter().all(u8::is_ascii_digit);

    if b[3] == b'/' && digits(0..3) && digits(4..7) {
        let course: i64 = ext[..3].parse().unwrap_or(0);
        let knots: f64 = ext[4..].parse().unwrap_or(0.0);
        if (1..=360).contains(&course) {
            fields.insert("course".to_string(), json!(course));
        }
        fields.insert("speed".to_string(), json!(knots * KNOTS_TO_KMH));
        return &comment[7..];
    }
    if let Some(phg) = ext.strip_prefix("PHG") {
        if phg.bytes().all(|c| c.is_ascii_alphanumeric()) {
            fields.insert("phg".to_string(), json!(phg));
            return &comment[7..];
        }
    }
    if let Some(range) = ext.strip_prefix("RNG") {
        if let Ok(miles) = range.parse::<f64>() {
            fields.insert("rng".to_string(), json!(miles * MILES_TO_KM));
            return &comment[7..];
        }
    }
    comment
}

/// Pull `/A=` altitude out of the comment and store what is left.
pub(super) fn finish_comment(comment: &str, fields: &mut Fields) {
    let mut text = comment.to_string();
    if let Some(found) = ALTITUDE.captures(comment) {
        if let Ok(feet) = found[1].parse::<f64>() {
            fields.insert("altitude".to_string(), json!(feet * FEET_TO_METRES));
        }
        if let Some(whole) = found.get(0) {
            text.replace_range(whole.range(), "");
        }
    }
    let text = text.trim();
    if !text.is_empty() {
        fields.insert("comment".to_string(), json!(text));
    }
}
