use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};

/// Parse a W3C datetime as it appears in sitemaps: full RFC3339, a naive
/// datetime without zone, a bare date, year-month, or a bare year. Missing
/// parts default to the earliest instant, UTC.
pub fn parse_w3c_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    if let Ok(year) = s.parse::<i32>() {
        return Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single();
    }
    None
}

pub fn format_w3c(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Sentinel used when no sync state exists yet: early enough that every
/// change-list entry is observed on the first incremental pass.
pub fn earliest_sync_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1999, 1, 1, 0, 0, 0).unwrap()
}
