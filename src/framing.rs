//! Line framing of a TNC text feed: `[<channel> <timestamp>] <packet>`.

use std::borrow::Cow;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[([0-9_\- ]*)\] (.*)$").expect("valid frame header regex"));
static ESCAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<0x([0-9A-Fa-f]{2})>").expect("valid escape regex"));

/// Highest radio channel number a TNC reports. A lone number above it is
/// read as an epoch timestamp.
pub const MAX_CHANNEL: u32 = 255;

/// Input lines that end the ingestion loop.
pub const QUIT_TOKENS: [&str; 2] = ["q", "2legit"];

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub channel: Option<u32>,
    /// Receive time from the header; `None` when absent or unreadable.
    pub timestamp: Option<DateTime<Utc>>,
    pub packet: String,
}

impl Frame {
    pub fn received_at_or(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.timestamp.unwrap_or(now)
    }
}

pub fn is_quit(line: &str) -> bool {
    let line = line.trim();
    QUIT_TOKENS.contains(&line)
}

/// Split the optional header off a line and decode `<0xHH>` escapes in the packet.
///
/// Channel and time are independent: either may be missing or unreadable
/// without affecting the other.
pub fn parse_line(line: &str) -> Frame {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(caps) = HEADER.captures(line) else {
        return Frame {
            channel: None,
            timestamp: None,
            packet: unescape(line.trim()).into_owned(),
        };
    };

    let packet = unescape(caps[2].trim()).into_owned();
    let (channel, timestamp) = parse_header(&caps[1]);
    Frame {
        channel,
        timestamp,
        packet,
    }
}

/// `<channel> <time>`, `<channel>`, `<time>` or nothing.
fn parse_header(header: &str) -> (Option<u32>, Option<DateTime<Utc>>) {
    let tokens: Vec<&str> = header.split_whitespace().collect();
    match tokens.as_slice() {
        [channel, time] => (parse_channel(channel), parse_timestamp(time)),
        [single] => match parse_channel(single) {
            Some(channel) => (Some(channel), None),
            None => (None, parse_timestamp(single)),
        },
        _ => (None, None),
    }
}

fn parse_channel(text: &str) -> Option<u32> {
    text.parse::<u32>().ok().filter(|channel| *channel <= MAX_CHANNEL)
}

/// Bare epoch seconds or `YYYYMMDD_hhmmss`, both UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if text.is_empty() {
        return None;
    }
    if text.bytes().all(|b| b.is_ascii_digit()) {
        let seconds = text.parse::<i64>().ok()?;
        return Utc.timestamp_opt(seconds, 0).single();
    }
    NaiveDateTime::parse_from_str(text, "%Y%m%d_%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Replace `<0xHH>` with the byte it names, dropping `<0x00>`.
pub fn unescape(text: &str) -> Cow<'_, str> {
    ESCAPE.replace_all(text, |caps: &Captures| match u8::from_str_radix(&caps[1], 16) {
        Ok(0) | Err(_) => String::new(),
        Ok(byte) => char::from(byte).to_string(),
    })
}
