use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Program wall-clock zone. Staff enter instants and users see them in this
/// zone; storage and all comparisons stay in UTC.
pub const PROGRAM_TZ: Tz = chrono_tz::Europe::Moscow;

/// Parses `ДД.ММ.ГГГГ ЧЧ:ММ` in program time. A bare date defaults to
/// 23:59 of that day, matching how deadlines are announced.
pub fn parse_program_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(trimmed, "%d.%m.%Y %H:%M")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(trimmed, "%d.%m.%Y")
                .ok()
                .and_then(|d| d.and_hms_opt(23, 59, 0))
        })?;
    to_utc(naive)
}

fn to_utc(naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    match PROGRAM_TZ.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(first, _) => Some(first.with_timezone(&Utc)),
        LocalResult::None => None,
    }
}

pub fn format_program_datetime(utc_dt: DateTime<Utc>) -> String {
    utc_dt
        .with_timezone(&PROGRAM_TZ)
        .format("%d.%m.%Y %H:%M")
        .to_string()
}
