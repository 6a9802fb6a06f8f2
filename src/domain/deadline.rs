use chrono::{DateTime, Utc};

/// Decides whether a submission made at `submitted_at` beats the deadline.
/// The boundary is inclusive and a task without a deadline accepts forever.
/// Called once when the submission row is created; the stored flag is never
/// recomputed, so later deadline edits do not rewrite history.
pub fn is_on_time(deadline: Option<DateTime<Utc>>, submitted_at: DateTime<Utc>) -> bool {
    match deadline {
        None => true,
        Some(deadline) => submitted_at <= deadline,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDateTime};

    fn instant(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    #[test]
    fn exact_deadline_is_on_time() {
        let deadline = instant("2026-03-07 20:59:00");
        assert!(is_on_time(Some(deadline), deadline));
    }

    #[test]
    fn one_microsecond_late_is_late() {
        let deadline = instant("2026-03-07 20:59:00");
        assert!(!is_on_time(Some(deadline), deadline + Duration::microseconds(1)));
    }

    #[test]
    fn earlier_submission_is_on_time() {
        let deadline = instant("2026-03-07 20:59:00");
        assert!(is_on_time(Some(deadline), deadline - Duration::days(2)));
    }

    #[test]
    fn no_deadline_is_always_on_time() {
        assert!(is_on_time(None, instant("2031-01-01 00:00:00")));
    }
}
