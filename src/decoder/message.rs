use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};

use super::Fields;

static RESPONSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(ack|rej)([A-Za-z0-9]{1,5})\s*$").expect("valid response regex"));
static MESSAGE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z0-9]{1,5})(\}[A-Za-z0-9]{0,2})?\s*$").expect("valid message number regex"));
static TELEMETRY_DEFINITION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(PARM|UNIT|EQNS|BITS)\.(.*)$").expect("valid telemetry definition regex"));

/// `:ADDRESSEE:text` (addressee padded to nine characters).
pub(super) fn parse_message(body: &str, fields: &mut Fields) -> Result<(), String> {
    let addressee = body.get(..9).ok_or("message addressee is truncated")?;
    let text = body
        .get(9..)
        .and_then(|rest| rest.strip_prefix(':'))
        .ok_or("message addressee is not terminated")?;
    let addressee = addressee.trim();
    if addressee.is_empty() {
        return Err("message has no addressee".to_string());
    }
    fields.insert("addresse".to_string(), json!(addressee));

    if let Some(definition) = TELEMETRY_DEFINITION.captures(text) {
        fields.insert("format".to_string(), json!("telemetry-message"));
        let values = &definition[2];
        match &definition[1] {
            "PARM" => {
                fields.insert("tPARM".to_string(), json!(split_list(values)));
            }
            "UNIT" => {
                fields.insert("tUNIT".to_string(), json!(split_list(values)));
            }
            "EQNS" => {
                fields.insert("tEQNS".to_string(), parse_equations(values)?);
            }
            _ => {
                let (bits, title) = match values.split_once(',') {
                    Some((bits, title)) => (bits, title.trim()),
                    None => (values, ""),
                };
                if bits.len() != 8 || !bits.bytes().all(|b| b == b'0' || b == b'1') {
                    return Err(format!("invalid telemetry bits {:?}", bits));
                }
                fields.insert("tBITS".to_string(), json!(bits));
                if !title.is_empty() {
                    fields.insert("title".to_string(), json!(title));
                }
            }
        }
        return Ok(());
    }

    fields.insert("format".to_string(), json!("message"));
    if let Some(response) = RESPONSE.captures(text) {
        fields.insert("response".to_string(), json!(&response[1]));
        fields.insert("msgNo".to_string(), json!(&response[2]));
        return Ok(());
    }

    let mut message_text = text;
    if let Some(number) = MESSAGE_NUMBER.captures(text) {
        fields.insert("msgNo".to_string(), json!(&number[1]));
        if let Some(whole) = number.get(0) {
            message_text = &text[..whole.start()];
        }
    }
    fields.insert("message_text".to_string(), json!(message_text.trim_end()));
    Ok(())
}

fn split_list(values: &str) -> Vec<&str> {
    values.split(',').map(str::trim).filter(|v| !v.is_empty()).collect()
}

/// Up to five `a,b,c` coefficient triples.
fn parse_equations(values: &str) -> Result<Value, String> {
    let numbers = values
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<Vec<f64>, _>>()
        .map_err(|_| format!("invalid telemetry equations {:?}", values))?;
    if numbers.is_empty() || numbers.len() % 3 != 0 || numbers.len() > 15 {
        return Err(format!("telemetry equations need triples, got {}", numbers.len()));
    }
    Ok(json!(numbers.chunks(3).map(<[f64]>::to_vec).collect::<Vec<_>>()))
}

/// `>` status text with an optional `DDHHMMz` timestamp.
pub(super) fn parse_status(body: &str, fields: &mut Fields) -> Result<(), String> {
    let mut status = body;
    if let Some(stamp) = body.get(..7).filter(|s| s.is_ascii()) {
        let (digits, kind) = stamp.split_at(6);
        if kind == "z" && digits.bytes().all(|b| b.is_ascii_digit()) {
            fields.insert("raw_timestamp".to_string(), json!(stamp));
            status = &body[7..];
        }
    }
    fields.insert("format".to_string(), json!("status"));
    fields.insert("status".to_string(), json!(status.trim()));
    Ok(())
}

/// `T#sss,a1,a2,a3,a4,a5,bbbbbbbb`
pub(super) fn parse_telemetry(body: &str, fields: &mut Fields) -> Result<(), String> {
    let parts: Vec<&str> = body.split(',').map(str::trim).collect();
    if parts.len() < 2 {
        return Err("telemetry report has no values".to_string());
    }
    let seq: i64 = parts[0]
        .parse()
        .map_err(|_| format!("invalid telemetry sequence {:?}", parts[0]))?;

    let mut values = Vec::new();
    let mut bits = None;
    for (i, part) in parts[1..].iter().enumerate() {
        if i == 5 {
            bits = Some(part.chars().take(8).collect::<String>());
            break;
        }
        values.push(
            part.parse::<f64>()
                .map_err(|_| format!("invalid telemetry value {:?}", part))?,
        );
    }

    fields.insert("format".to_string(), json!("telemetry"));
    fields.insert("seq".to_string(), json!(seq));
    fields.insert("vals".to_string(), json!(values));
    if let Some(bits) = bits {
        fields.insert("bits".to_string(), json!(bits));
    }
    Ok(())
}
