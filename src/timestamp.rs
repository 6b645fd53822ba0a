// src/timestamp.rs
//! Best-effort parsing of feed timestamps for display ordering.
//!
//! Formats are tried in this order:
//! 1. RFC 2822            `Mon, 05 May 2025 07:00:00 +0530`
//! 2. RFC 3339            `2025-05-05T07:00:00+05:30`
//! 3. ISO-8601 naive      `2025-05-05T07:00:00`, `2025-05-05 07:00:00`
//! 4. exchange locale     `04-May-2025 07:00:00`
//! 5. exchange, no secs   `04-May-2025 07:00`
//! 6. date only           `2025-05-05`, `04-May-2025`
//!
//! Naive values carry a zero offset. Anything else sorts as
//! [`UNPARSEABLE`], i.e. after every real timestamp in newest-first order.

use std::cmp::Reverse;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use crate::entry::Entry;

pub const UNPARSEABLE: DateTime<Utc> = DateTime::<Utc>::MIN_UTC;

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%d-%b-%Y %H:%M:%S",
    "%d-%b-%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d-%b-%Y"];

pub fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(dt) = parse_well_known(s) {
        return Some(dt);
    }
    let utc = FixedOffset::east_opt(0)?;
    for fmt in NAIVE_DATETIME_FORMATS {
        if let Ok(n) = NaiveDateTime::parse_from_str(s, fmt) {
            return n.and_local_timezone(utc).single();
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0)?.and_local_timezone(utc).single();
        }
    }
    None
}

fn parse_well_known(s: &str) -> Option<DateTime<FixedOffset>> {
    let odt = OffsetDateTime::parse(s, &Rfc2822)
        .or_else(|_| OffsetDateTime::parse(s, &Rfc3339))
        .ok()?;
    let offset = FixedOffset::east_opt(odt.offset().whole_seconds())?;
    let utc = DateTime::<Utc>::from_timestamp(odt.unix_timestamp(), odt.nanosecond())?;
    Some(utc.with_timezone(&offset))
}

/// Sort key; unparseable input maps to [`UNPARSEABLE`].
pub fn sort_key(raw: &str) -> DateTime<Utc> {
    parse_timestamp(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(UNPARSEABLE)
}

/// Newest first by feed timestamp; ties keep their input order.
pub fn sort_for_display(entries: &[Entry], limit: Option<usize>) -> Vec<Entry> {
    let mut out = entries.to_vec();
    out.sort_by_cached_key(|e| Reverse(sort_key(&e.timestamp)));
    if let Some(n) = limit {
        out.truncate(n);
    }
    out
}

/// "Today at 07:00 AM", "Yesterday at 07:00 AM" or "05 May 2025 at 07:00 AM",
/// judged in the timestamp's own offset. Unparseable input comes back as is.
pub fn format_friendly(raw: &str, now: DateTime<Utc>) -> String {
    let Some(dt) = parse_timestamp(raw) else {
        return raw.to_string();
    };
    let today = now.with_timezone(dt.offset()).date_naive();
    let day = dt.date_naive();
    let clock = dt.format("%I:%M %p");
    if day == today {
        format!("Today at {clock}")
    } else if today.pred_opt() == Some(day) {
        format!("Yesterday at {clock}")
    } else {
        format!("{} at {clock}", dt.format("%d %b %Y"))
    }
}

/// An entry as served to clients: the stored fields plus `formatted_time`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayEntry {
    #[serde(flatten)]
    pub entry: Entry,
    pub formatted_time: String,
}

pub fn for_display(entries: Vec<Entry>, now: DateTime<Utc>) -> Vec<DisplayEntry> {
    entries
        .into_iter()
        .map(|entry| DisplayEntry {
            formatted_time: format_friendly(&entry.timestamp, now),
            entry,
        })
        .collect()
}
