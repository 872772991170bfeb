use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

/// Current time in the canonical stored form.
pub fn now_timestamp() -> String {
    to_timestamp(&Utc::now())
}

/// Fixed-width RFC 3339 with microseconds, so stored values sort lexically.
pub fn to_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Coerce a stored timestamp into `DateTime<Utc>`.
///
/// Accepts RFC 3339 (any precision or offset) and SQLite's
/// `datetime('now')` form. Missing or unreadable values become "now" so
/// older rows still decode.
pub fn parse_timestamp(value: Option<&str>) -> DateTime<Utc> {
    let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Utc::now();
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.with_timezone(&Utc);
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .map(|naive| naive.and_utc())
        .unwrap_or_else(|_| {
            log::debug!("Unreadable timestamp '{}', using now", raw);
            Utc::now()
        })
}

/// New opaque document id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Trim and collapse an optional string to `None` when blank.
pub fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
pub fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}
