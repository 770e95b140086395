use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Generate a fresh access-key string.
pub fn new_key() -> String {
    Uuid::new_v4().to_string()
}

/// Expiry timestamp for a key issued at `now` lasting `days` whole days.
///
/// `None` when `days` does not fit a [`Duration`] or the sum leaves the
/// representable calendar.
pub fn expiry(now: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    now.checked_add_signed(Duration::try_days(days)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_distinct_uuids() {
        let a = new_key();
        let b = new_key();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn expiry_adds_whole_days() {
        let now = Utc::now();
        assert_eq!(expiry(now, 30).unwrap() - now, Duration::days(30));
        assert_eq!(expiry(now, 1).unwrap() - now, Duration::days(1));
    }

    #[test]
    fn out_of_range_durations_are_refused() {
        let now = Utc::now();
        // Representable as a duration but past the calendar's end.
        assert_eq!(expiry(now, 200_000_000), None);
        // Not representable as a duration at all.
        assert_eq!(expiry(now, i64::MAX), None);
    }
}
