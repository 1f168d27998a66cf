use chrono::{DateTime, Datelike, TimeZone, Utc};

pub mod plans;
pub mod subscriptions;
pub mod usage;
pub mod users;

/// Conventional two-decimal rounding for derived minute/hour figures.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// First instant of the calendar month containing `now`.
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .expect("first of month is always valid")
}

/// First instant of the calendar month preceding the one containing `now`.
/// Rolls the year when `now` is in January.
pub fn previous_month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let start = month_start(now);
    let (year, month) = if start.month() == 1 {
        (start.year() - 1, 12)
    } else {
        (start.year(), start.month() - 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .expect("first of month is always valid")
}

/// Half-open window [first of month, first of next month) for a given
/// year/month, or `None` when the month is out of range.
pub fn month_bounds(year: i32, month: u32) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    if !(1..=12).contains(&month) {
        return None;
    }
    let start = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()?;
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let end = Utc.with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0).single()?;
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn month_start_truncates_to_first() {
        let now = Utc.with_ymd_and_hms(2024, 6, 17, 13, 45, 9).unwrap();
        assert_eq!(
            month_start(now),
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn previous_month_rolls_year_in_january() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap();
        assert_eq!(
            previous_month_start(now),
            Utc.with_ymd_and_hms(2023, 12, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn month_bounds_are_half_open() {
        let (start, end) = month_bounds(2024, 12).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn month_bounds_rejects_invalid_month() {
        assert!(month_bounds(2024, 0).is_none());
        assert!(month_bounds(2024, 13).is_none());
    }

    #[test]
    fn round2_keeps_two_decimals() {
        assert_eq!(round2(120.0 / 60.0), 2.0);
        assert_eq!(round2(125.0 / 60.0), 2.08);
        assert_eq!(round2(0.0), 0.0);
    }
}
