use chrono::{DateTime, NaiveDateTime, Utc};

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Parses the date formats found in `Expires` headers and cookie attributes
/// (RFC 1123, the dashed RFC 850 variant, asctime). Returns unix milliseconds.
pub fn parse_http_date(s: &str) -> Option<i64> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.timestamp_millis());
    }

    // Two-digit years first: %Y would happily read "15" as year 15
    const FORMATS: [&str; 4] = [
        "%A, %d-%b-%y %H:%M:%S GMT",
        "%a, %d-%b-%y %H:%M:%S GMT",
        "%a, %d-%b-%Y %H:%M:%S GMT",
        "%a %b %e %H:%M:%S %Y",
    ];
    FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .map(|naive| naive.and_utc().timestamp_millis())
}

/// Formats unix milliseconds as an IMF-fixdate (`Wed, 21 Oct 2015 07:28:00 GMT`).
pub fn format_http_date(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or_default()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}
