//! Value processing: date/time bucketing and URL reformatting.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike};
use tracing::warn;

use crate::types::{FieldType, Granularity, Processing};

pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";
pub const DEFAULT_TIME_FORMAT: &str = "%H:%M:%S";
pub const DEFAULT_URL_FORMAT: &str = "{host}";

/// A token that could not be parsed with the configured format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    pub field_type: FieldType,
    pub format: String,
}

/// Apply `processing` to `token` according to `field_type`.
///
/// Returns the processed token, or the original token plus a warning when a date/time does
/// not parse.
pub fn apply(
    field_type: FieldType,
    processing: &Processing,
    token: &str,
) -> Result<String, ParseWarning> {
    match field_type {
        FieldType::Date => process_date(processing, token),
        FieldType::Time => process_time(processing, token),
        FieldType::Url => Ok(reformat_url(
            processing.url_format.as_deref().unwrap_or(DEFAULT_URL_FORMAT),
            token,
        )),
        _ => Ok(token.to_owned()),
    }
}

fn process_date(processing: &Processing, token: &str) -> Result<String, ParseWarning> {
    let format = processing.format.as_deref().unwrap_or(DEFAULT_DATE_FORMAT);
    let parsed = NaiveDateTime::parse_from_str(token, format).or_else(|_| {
        NaiveDate::parse_from_str(token, format).map(|d| d.and_time(NaiveTime::MIN))
    });
    let Ok(mut dt) = parsed else {
        return Err(ParseWarning {
            field_type: FieldType::Date,
            format: format.to_owned(),
        });
    };

    if let Some(delta) = processing.offset.and_then(offset_delta) {
        dt = dt.checked_add_signed(delta).unwrap_or(dt);
    }
    if let Some(granularity) = processing.truncate {
        dt = truncate_datetime(dt, granularity, processing.bucket);
    }
    Ok(dt.format(format).to_string())
}

fn process_time(processing: &Processing, token: &str) -> Result<String, ParseWarning> {
    let format = processing.format.as_deref().unwrap_or(DEFAULT_TIME_FORMAT);
    let Ok(mut t) = NaiveTime::parse_from_str(token, format) else {
        return Err(ParseWarning {
            field_type: FieldType::Time,
            format: format.to_owned(),
        });
    };

    if let Some(delta) = processing.offset.and_then(offset_delta) {
        t = t.overflowing_add_signed(delta).0;
    }
    if let Some(granularity) = processing.truncate {
        t = truncate_time(t, granularity, processing.bucket);
    }
    Ok(t.format(format).to_string())
}

/// `offset` seconds as a delta; `None` (value left unshifted) when out of range.
fn offset_delta(offset: i64) -> Option<TimeDelta> {
    let delta = TimeDelta::try_seconds(offset);
    if delta.is_none() {
        warn!(offset, "offset out of range; value left unshifted");
    }
    delta
}

fn bucketed(value: u32, bucket: Option<u32>) -> u32 {
    match bucket {
        Some(b) if b > 1 => value - value % b,
        _ => value,
    }
}

fn truncate_time(t: NaiveTime, granularity: Granularity, bucket: Option<u32>) -> NaiveTime {
    let (h, m, s) = (t.hour(), t.minute(), t.second());
    let (h, m, s) = match granularity {
        Granularity::Hour => (bucketed(h, bucket), 0, 0),
        Granularity::Minute => (h, bucketed(m, bucket), 0),
        Granularity::Second => (h, m, bucketed(s, bucket)),
        Granularity::Year | Granularity::Month | Granularity::Day => return t,
    };
    NaiveTime::from_hms_opt(h, m, s).unwrap_or(t)
}

fn truncate_datetime(
    dt: NaiveDateTime,
    granularity: Granularity,
    bucket: Option<u32>,
) -> NaiveDateTime {
    let date = dt.date();
    match granularity {
        Granularity::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1)
            .map(|d| d.and_time(NaiveTime::MIN))
            .unwrap_or(dt),
        Granularity::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
            .map(|d| d.and_time(NaiveTime::MIN))
            .unwrap_or(dt),
        Granularity::Day => date.and_time(NaiveTime::MIN),
        Granularity::Hour | Granularity::Minute | Granularity::Second => {
            date.and_time(truncate_time(dt.time(), granularity, bucket))
        }
    }
}

/// Components of a URL token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlParts<'a> {
    pub scheme: &'a str,
    pub host: &'a str,
    pub port: &'a str,
    pub path: &'a str,
    pub query: &'a str,
    pub fragment: &'a str,
}

/// Split a URL into its parts. Tokens without `scheme://` are read as `host[:port][/path]`.
pub fn split_url(url: &str) -> UrlParts<'_> {
    let (scheme, rest) = match url.find("://") {
        Some(idx) => (&url[..idx], &url[idx + 3..]),
        None => ("", url),
    };
    let (rest, fragment) = rest.split_once('#').unwrap_or((rest, ""));
    let (rest, query) = rest.split_once('?').unwrap_or((rest, ""));
    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };
    let authority = authority.rsplit_once('@').map_or(authority, |(_, a)| a);
    let (host, port) = match authority.rsplit_once(':') {
        Some((h, p)) if !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()) => (h, p),
        _ => (authority, ""),
    };
    UrlParts {
        scheme,
        host,
        port,
        path,
        query,
        fragment,
    }
}

/// Substitute `{scheme}`, `{host}`, `{port}`, `{path}`, `{query}` and `{fragment}`.
pub fn reformat_url(template: &str, url: &str) -> String {
    let parts = split_url(url);
    template
        .replace("{scheme}", parts.scheme)
        .replace("{host}", parts.host)
        .replace("{port}", parts.port)
        .replace("{path}", parts.path)
        .replace("{query}", parts.query)
        .replace("{fragment}", parts.fragment)
}
