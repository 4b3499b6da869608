use serde_json::json;

use super::Fields;
use super::position::{finish_comment, parse_coordinates, parse_data_extension, take_timestamp};

/// `;NAME_____*DDHHMMzPOSITION` where `*` is live and `_` killed.
pub(super) fn parse_object(body: &str, fields: &mut Fields) -> Result<(), String> {
    let name = body.get(..9).ok_or("object name is truncated")?;
    let alive = match body.get(9..10) {
        Some("*") => true,
        Some("_") => false,
        _ => return Err("object has no live/killed marker".to_string()),
    };
    let rest = take_timestamp(&body[10..], fields)?;
    let comment = parse_coordinates(rest, fields)?;
    let comment = parse_data_extension(comment, fields);
    finish_comment(comment, fields);

    fields.insert("object_name".to_string(), json!(name.trim()));
    fields.insert("alive".to_string(), json!(alive));
    fields.insert("format".to_string(), json!("object"));
    Ok(())
}

/// `)NAME!POSITION`, name of 3 to 9 characters ended by `!` (live) or `_` (killed).
pub(super) fn parse_item(body: &str, fields: &mut Fields) -> Result<(), String> {
    let end = body
        .char_indices()
        .take(10)
        .find(|(i, c)| *i >= 3 && matches!(c, '!' | '_'))
        .map(|(i, _)| i)
        .ok_or("item name is not terminated")?;
    let name = &body[..end];
    let alive = body[end..].starts_with('!');

    let comment = parse_coordinates(&body[end + 1..], fields)?;
    let comment = parse_data_extension(comment, fields);
    finish_comment(comment, fields);

    fields.insert("object_name".to_string(), json!(name.trim()));
    fields.insert("alive".to_string(), json!(alive));
    fields.insert("format".to_string(), json!("item"));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_object() {
        let mut fields = Fields::new();
        parse_object("LEADER   *092345z4903.50N/07201.75W>088/036", &mut fields).unwrap();

        assert_eq!(fields["format"], json!("object"));
        assert_eq!(fields["object_name"], json!("LEADER"));
        assert_eq!(fields["alive"], json!(true));
        assert_eq!(fields["raw_timestamp"], json!("092345z"));
        assert_eq!(fields["course"], json!(88));
    }

    #[test]
    fn killed_item() {
        let mut fields = Fields::new();
        parse_item("AID #2_4903.50N/07201.75WA", &mut fields).unwrap();

        assert_eq!(fields["format"], json!("item"));
        assert_eq!(fields["object_name"], json!("AID #2"));
        assert_eq!(fields["alive"], json!(false));
        assert_eq!(fields["symbol"], json!("A"));
    }

    #[test]
    fn object_without_marker_is_refused() {
        let mut fields = Fields::new();
        assert!(parse_object("LEADER   x092345z4903.50N/07201.75W>", &mut fields).is_err());
    }
}
