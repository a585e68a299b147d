//! Date and time fields of the event form and the assistant's `addEvent` tool.

use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};

/// Accepts `YYYY-MM-DD` (a trailing `T...` time part is ignored), `today`,
/// `tomorrow`, a day offset like `+3`, `-1` or `+3d`, or a weekday name for
/// its next occurrence after `today`.
pub(crate) fn parse_event_date(input: &str, today: NaiveDate) -> Option<NaiveDate> {
    let text = input.trim().to_ascii_lowercase();
    match text.as_str() {
        "" => None,
        "today" => Some(today),
        "tomorrow" => today.succ_opt(),
        _ if text.starts_with(['+', '-']) => {
            let days: i64 = text.strip_suffix('d').unwrap_or(&text).parse().ok()?;
            today.checked_add_signed(Duration::try_days(days)?)
        }
        _ => {
            if let Ok(weekday) = text.parse::<Weekday>() {
                return (1..=7)
                    .filter_map(|n| today.checked_add_signed(Duration::days(n)))
                    .find(|day| day.weekday() == weekday);
            }
            let date = text.split_once('t').map_or(text.as_str(), |(date, _)| date);
            NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
        }
    }
}

/// `HH:MM` or `HH:MM:SS`, 24-hour clock.
pub(crate) fn parse_event_time(input: &str) -> Option<NaiveTime> {
    let text = input.trim();
    NaiveTime::parse_from_str(text, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M:%S"))
        .ok()
}
