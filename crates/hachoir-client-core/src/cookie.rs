//! Cookie strings as a browser page sees them.
//!
//! `write_cookie` produces what a page assigns to `document.cookie`,
//! `CookieJar` applies such assignments (and server `Set-Cookie` lines) and
//! renders the `a=1; b=2` string that `read_cookie` scans.

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Expiry used when options are saved: ten years.
pub const OPTION_COOKIE_TTL_SECONDS: i64 = 3600 * 24 * 365 * 10;

/// Last second of year 9999; later expiries are clamped to it.
const LATEST_EXPIRY_TIMESTAMP: i64 = 253_402_300_799;
/// Netscape form some servers still use: `Thu, 01-Jan-1970 00:00:00 GMT`.
const NETSCAPE_EXPIRES_FORMAT: &str = "%a, %d-%b-%Y %H:%M:%S GMT";

const GMT_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CookieLookup {
    /// Match `name=` only where a cookie pair starts.
    #[default]
    Exact,
    /// First `name=` anywhere in the string. A lookup of `raw` is satisfied
    /// by `xraw=5`; the start-index guard in this scan never rejects it.
    Legacy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieAttributes {
    /// Lifetime relative to now; `None` or zero writes a session cookie.
    pub expires_seconds: Option<i64>,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub secure: bool,
}

impl CookieAttributes {
    #[must_use]
    pub fn expiring_in(seconds: i64) -> Self {
        Self {
            expires_seconds: Some(seconds),
            ..Self::default()
        }
    }
}

#[must_use]
pub fn format_gmt(at: DateTime<Utc>) -> String {
    at.format(GMT_FORMAT).to_string()
}

/// Build a cookie assignment string. Attributes are appended only when set.
#[must_use]
pub fn write_cookie(
    name: &str,
    value: &str,
    attributes: &CookieAttributes,
    now: DateTime<Utc>,
) -> String {
    let mut cookie = format!("{name}={}", escape(value));
    if let Some(seconds) = attributes.expires_seconds.filter(|seconds| *seconds != 0) {
        cookie.push_str(";expires=");
        cookie.push_str(&format_gmt(expiry_after(now, seconds)));
    }
    if let Some(path) = attributes.path.as_deref().filter(|path| !path.is_empty()) {
        cookie.push_str(";path=");
        cookie.push_str(path);
    }
    if let Some(domain) = attributes.domain.as_deref().filter(|domain| !domain.is_empty()) {
        cookie.push_str(";domain=");
        cookie.push_str(domain);
    }
    if attributes.secure {
        cookie.push_str(";secure");
    }
    cookie
}

/// Assignment that expires `name` immediately.
#[must_use]
pub fn delete_cookie(name: &str, now: DateTime<Utc>) -> String {
    format!(
        "{name}=; expires={}",
        format_gmt(now - TimeDelta::milliseconds(1))
    )
}

/// Find `name` in a `a=1; b=2` cookie string and return its unescaped value.
#[must_use]
pub fn read_cookie(cookie_string: &str, name: &str, lookup: CookieLookup) -> Option<String> {
    match lookup {
        CookieLookup::Exact => cookie_string
            .split(';')
            .filter_map(|pair| pair.trim_start().split_once('='))
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, value)| unescape(value)),
        CookieLookup::Legacy => {
            let needle = format!("{name}=");
            let start = cookie_string.find(&needle)?;
            let value_start = start + needle.len();
            let value_end = cookie_string[value_start..]
                .find(';')
                .map_or(cookie_string.len(), |offset| value_start + offset);
            Some(unescape(&cookie_string[value_start..value_end]))
        }
    }
}

fn is_unreserved(unit: u16) -> bool {
    matches!(unit,
        0x30..=0x39 | 0x41..=0x5A | 0x61..=0x7A
        | 0x40 | 0x2A | 0x5F | 0x2B | 0x2D | 0x2E | 0x2F)
}

/// Legacy `escape`: `%XX` below U+0100, `%uXXXX` per UTF-16 unit above it.
#[must_use]
pub fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for unit in value.encode_utf16() {
        if is_unreserved(unit) {
            escaped.push(char::from(unit as u8));
        } else if unit < 0x100 {
            escaped.push_str(&format!("%{unit:02X}"));
        } else {
            escaped.push_str(&format!("%u{unit:04X}"));
        }
    }
    escaped
}

/// Inverse of [`escape`]. Malformed escapes are kept literally.
#[must_use]
pub fn unescape(value: &str) -> String {
    let units = value.encode_utf16().collect::<Vec<_>>();
    let mut decoded = Vec::with_capacity(units.len());
    let mut index = 0;
    while index < units.len() {
        if units[index] == u16::from(b'%') {
            if units.get(index + 1) == Some(&u16::from(b'u'))
                && let Some(unit) = hex_units(&units, index + 2, 4)
            {
                decoded.push(unit);
                index += 6;
                continue;
            }
            if let Some(unit) = hex_units(&units, index + 1, 2) {
                decoded.push(unit);
                index += 3;
                continue;
            }
        }
        decoded.push(units[index]);
        index += 1;
    }
    String::from_utf16_lossy(&decoded)
}

fn hex_units(units: &[u16], start: usize, count: usize) -> Option<u16> {
    let digits = units.get(start..start + count)?;
    digits.iter().try_fold(0u16, |acc, unit| {
        let digit = char::from_u32(u32::from(*unit))?.to_digit(16)?;
        Some(acc * 16 + digit as u16)
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieRecord {
    pub name: String,
    /// Value as written on the wire (escaped, possibly quoted).
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default)]
    pub secure: bool,
}

impl CookieRecord {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// Parse one cookie assignment or `Set-Cookie` line. Unknown attributes
/// are ignored; a malformed expiry leaves the cookie session-scoped.
#[must_use]
pub fn parse_cookie_assignment(line: &str, now: DateTime<Utc>) -> Option<CookieRecord> {
    let mut parts = line.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut record = CookieRecord {
        name: name.to_string(),
        value: value.trim().to_string(),
        expires_at: None,
        path: None,
        domain: None,
        secure: false,
    };
    let mut max_age = None;
    for attribute in parts {
        let (key, argument) = match attribute.split_once('=') {
            Some((key, argument)) => (key.trim(), argument.trim()),
            None => (attribute.trim(), ""),
        };
        match key.to_ascii_lowercase().as_str() {
            "expires" => {
                record.expires_at = parse_expires(argument);
            }
            "max-age" => max_age = argument.parse::<i64>().ok(),
            "path" => record.path = Some(argument.to_string()),
            "domain" => record.domain = Some(argument.to_string()),
            "secure" => record.secure = true,
            _ => {}
        }
    }
    if let Some(seconds) = max_age {
        record.expires_at = Some(expiry_after(now, seconds));
    }
    Some(record)
}

/// `now` shifted by `seconds`, clamped to the epoch and the end of year 9999.
fn expiry_after(now: DateTime<Utc>, seconds: i64) -> DateTime<Utc> {
    let earliest = DateTime::from_timestamp(0, 0).unwrap_or(DateTime::<Utc>::MIN_UTC);
    let latest =
        DateTime::from_timestamp(LATEST_EXPIRY_TIMESTAMP, 0).unwrap_or(DateTime::<Utc>::MAX_UTC);
    match TimeDelta::try_seconds(seconds).and_then(|delta| now.checked_add_signed(delta)) {
        Some(at) => at.clamp(earliest, latest),
        None if seconds < 0 => earliest,
        None => latest,
    }
}

fn parse_expires(argument: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(argument)
        .map(|at| at.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(argument, NETSCAPE_EXPIRES_FORMAT)
                .map(|at| at.and_utc())
        })
        .ok()
}

/// Ordered cookie collection with browser assignment semantics: same name
/// replaces in place, an expired assignment removes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieJar {
    records: Vec<CookieRecord>,
}

impl CookieJar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an assignment string. Returns false when it could not be parsed.
    pub fn apply(&mut self, assignment: &str, now: DateTime<Utc>) -> bool {
        match parse_cookie_assignment(assignment, now) {
            Some(record) => {
                self.insert(record, now);
                true
            }
            None => false,
        }
    }

    pub fn insert(&mut self, record: CookieRecord, now: DateTime<Utc>) {
        let expired = record.is_expired(now);
        let existing = self
            .records
            .iter()
            .position(|candidate| candidate.name == record.name);
        match (existing, expired) {
            (Some(index), true) => {
                self.records.remove(index);
            }
            (Some(index), false) => self.records[index] = record,
            (None, true) => {}
            (None, false) => self.records.push(record),
        }
    }

    pub fn purge_expired(&mut self, now: DateTime<Utc>) {
        self.records.retain(|record| !record.is_expired(now));
    }

    /// Live cookies rendered as `a=1; b=2`.
    #[must_use]
    pub fn cookie_string(&self, now: DateTime<Utc>) -> String {
        self.records
            .iter()
            .filter(|record| !record.is_expired(now))
            .map(|record| format!("{}={}", record.name, record.value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn records(&self) -> &[CookieRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
