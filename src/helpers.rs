use chrono::{DateTime, NaiveDateTime, Utc};

/// Parses a backend timestamp. Values without an offset are UTC.
pub fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Some(dt.to_utc());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(ts, fmt).ok())
        .map(|naive| naive.and_utc())
}

pub fn human_time(t: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let t = match t {
        Some(t) => t,
        None => return "never".to_string(),
    };

    let d = now - t;
    let secs = d.num_seconds();

    if secs < 60 {
        "just now".to_string()
    } else if secs < 3600 {
        let m = d.num_minutes();
        if m == 1 {
            "1 minute ago".to_string()
        } else {
            format!("{} minutes ago", m)
        }
    } else if secs < 86400 {
        let h = d.num_hours();
        if h == 1 {
            "1 hour ago".to_string()
        } else {
            format!("{} hours ago", h)
        }
    } else if secs < 30 * 86400 {
        let days = d.num_days();
        if days == 1 {
            "1 day ago".to_string()
        } else {
            format!("{} days ago", days)
        }
    } else {
        t.format("%b %e, %Y").to_string()
    }
}

/// How long until the backend will serve fresh data for a load stamped
/// `as_of` with a cache lifetime of `ttl_minutes`.
pub fn remaining_cache_time(as_of: &str, ttl_minutes: i64, now: DateTime<Utc>) -> Option<String> {
    if ttl_minutes <= 0 {
        return None;
    }
    let ttl = chrono::Duration::try_minutes(ttl_minutes)?;
    let expires = parse_timestamp(as_of)?.checked_add_signed(ttl)?;
    let left = (expires - now).num_seconds();
    if left <= 0 {
        return Some("available now".to_string());
    }
    // round up to whole minutes
    let minutes = (left + 59) / 60;
    Some(if minutes == 1 {
        "1 minute".to_string()
    } else {
        format!("{} minutes", minutes)
    })
}
