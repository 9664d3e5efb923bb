use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use chrono_tz::Tz;

#[derive(Clone, Copy, Debug)]
enum Zone {
    Named(Tz),
    Fixed(FixedOffset),
}

/// Accepts "+02:00", "-0530", "+3".
fn parse_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    let sign = match raw.chars().next()? {
        '+' => 1,
        '-' => -1,
        _ => return None,
    };
    let digits = raw[1..].trim();
    let (hours, minutes) = match digits.split_once(':') {
        Some((h, m)) => (h.parse::<i32>().ok()?, m.parse::<i32>().ok()?),
        None if digits.len() > 2 => {
            let (h, m) = digits.split_at(digits.len() - 2);
            (h.parse::<i32>().ok()?, m.parse::<i32>().ok()?)
        }
        None => (digits.parse::<i32>().ok()?, 0),
    };
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn parse_zone(raw: &str) -> Option<Zone> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let upper = trimmed.to_uppercase();
    if let Some(rest) = upper.strip_prefix("UTC").or_else(|| upper.strip_prefix("GMT")) {
        if rest.is_empty() {
            return FixedOffset::east_opt(0).map(Zone::Fixed);
        }
        if let Some(offset) = parse_offset(rest) {
            return Some(Zone::Fixed(offset));
        }
    }
    trimmed.parse::<Tz>().ok().map(Zone::Named)
}

/// Returns the stored form of a user supplied timezone, or `None` if it is not recognised.
pub fn normalize_timezone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    parse_zone(trimmed)?;
    if trimmed.eq_ignore_ascii_case("utc") || trimmed.eq_ignore_ascii_case("gmt") {
        Some("UTC".to_string())
    } else {
        Some(trimmed.to_string())
    }
}

/// Wall-clock time in `raw_tz`; unknown zones fall back to UTC.
pub fn local_datetime(raw_tz: &str, utc_dt: DateTime<Utc>) -> NaiveDateTime {
    match parse_zone(raw_tz) {
        Some(Zone::Named(tz)) => utc_dt.with_timezone(&tz).naive_local(),
        Some(Zone::Fixed(offset)) => utc_dt.with_timezone(&offset).naive_local(),
        None => utc_dt.naive_utc(),
    }
}

pub fn format_local_time(raw_tz: &str, utc_dt: DateTime<Utc>) -> String {
    local_datetime(raw_tz, utc_dt).format("%Y-%m-%d %H:%M").to_string()
}
