use serde_json::{Value, json};

use super::Fields;

const MPH_TO_MS: f64 = 0.44704;
const HUNDREDTHS_INCH_TO_MM: f64 = 0.254;
const INCH_TO_MM: f64 = 25.4;

struct WeatherField {
    key: u8,
    name: &'static str,
    width: usize,
    convert: fn(f64) -> Value,
}

fn whole(v: f64) -> Value {
    json!(v as i64)
}

const WEATHER_FIELDS: &[WeatherField] = &[
    WeatherField { key: b'c', name: "wind_direction", width: 3, convert: whole },
    WeatherField { key: b'S', name: "wind_speed", width: 3, convert: |v| json!(v * MPH_TO_MS) },
    WeatherField { key: b'g', name: "wind_gust", width: 3, convert: |v| json!(v * MPH_TO_MS) },
    WeatherField { key: b't', name: "temperature", width: 3, convert: |v| json!((v - 32.0) / 1.8) },
    WeatherField { key: b'r', name: "rain_1h", width: 3, convert: |v| json!(v * HUNDREDTHS_INCH_TO_MM) },
    WeatherField { key: b'p', name: "rain_24h", width: 3, convert: |v| json!(v * HUNDREDTHS_INCH_TO_MM) },
    WeatherField { key: b'P', name: "rain_since_midnight", width: 3, convert: |v| json!(v * HUNDREDTHS_INCH_TO_MM) },
    WeatherField { key: b'h', name: "humidity", width: 2, convert: |v| json!(if v == 0.0 { 100 } else { v as i64 }) },
    WeatherField { key: b'b', name: "pressure", width: 5, convert: |v| json!(v / 10.0) },
    WeatherField { key: b'l', name: "luminosity", width: 3, convert: |v| json!(v as i64 + 1000) },
    WeatherField { key: b'L', name: "luminosity", width: 3, convert: whole },
    WeatherField { key: b's', name: "snow", width: 3, convert: |v| json!(v * INCH_TO_MM) },
    WeatherField { key: b'#', name: "rain_raw", width: 3, convert: whole },
];

/// Read weather fields from the start of `text`. Returns the fields and the
/// unparsed remainder (software/unit tag and comment).
///
/// Positional reports start with `ddd/sss` wind; positionless ones with
/// `cdddsddd`. Either way the first `s` after the direction is wind speed.
pub(super) fn parse_weather_data(text: &str, positional: bool) -> (Fields, &str) {
    let mut weather = Fields::new();
    let mut rest = text;

    let leading_wind = if positional {
        rest.get(..7)
            .filter(|w| w.is_ascii() && w.as_bytes()[3] == b'/')
            .map(|w| (&w[..3], &w[4..7]))
    } else {
        rest.get(..8)
            .filter(|w| w.is_ascii() && w.starts_with('c') && w.as_bytes()[4] == b's')
            .map(|w| (&w[1..4], &w[5..8]))
    };
    if let Some((direction, speed)) = leading_wind {
        if let Ok(direction) = direction.trim().parse::<f64>() {
            weather.insert("wind_direction".to_string(), whole(direction));
        }
        if let Ok(speed) = speed.trim().parse::<f64>() {
            weather.insert("wind_speed".to_string(), json!(speed * MPH_TO_MS));
        }
        rest = &rest[if positional { 7 } else { 8 }..];
    }

    while let Some(key) = rest.bytes().next() {
        let Some(field) = WEATHER_FIELDS.iter().find(|f| f.key == key) else {
            break;
        };
        let Some(raw) = rest.get(1..1 + field.width) else {
            break;
        };
        if !raw.bytes().all(|b| b.is_ascii_digit() || matches!(b, b'.' | b' ' | b'-')) {
            break;
        }
        rest = &rest[1 + field.width..];
        // dots or spaces mean "no reading"
        if let Ok(value) = raw.trim().parse::<f64>() {
            weather.insert(field.name.to_string(), (field.convert)(value));
        }
    }

    (weather, rest)
}

/// `_MMDDhhmm` followed by weather data.
pub(super) fn parse_positionless(body: &str, fields: &mut Fields) -> Result<(), String> {
    let stamp = body.get(..8).ok_or("weather timestamp is truncated")?;
    if !stamp.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("invalid weather timestamp {:?}", stamp));
    }
    let (weather, rest) = parse_weather_data(&body[8..], false);
    if weather.is_empty() {
        return Err("weather report has no readings".to_string());
    }

    fields.insert("format".to_string(), json!("weather"));
    fields.insert("raw_timestamp".to_string(), json!(stamp));
    fields.insert("weather".to_string(), Value::Object(weather));
    let rest = rest.trim();
    if !rest.is_empty() {
        fields.insert("comment".to_string(), json!(rest));
    }
    Ok(())
}
