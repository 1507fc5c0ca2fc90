//! Persisted key layout and calendar helpers.
//!
//! External reporting tools read these keys directly, so the exact
//! strings are part of the storage format.

use chrono::{Days, NaiveDate};

const PREFIX: &str = "ai_cost";

pub fn day_string(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

/// `ai_cost:daily:<YYYY-MM-DD>:<usage_key>:<provider>:<model>`
///
/// Only `model` may contain `:`; the usage key and provider are stripped of
/// it during normalization, so distinct tuples never share a key.
pub fn bucket_key(day: NaiveDate, usage_key: &str, provider: &str, model: &str) -> String {
    format!(
        "{PREFIX}:daily:{}:{usage_key}:{provider}:{model}",
        day_string(day)
    )
}

/// `ai_cost:index:daily:<YYYY-MM-DD>`
pub fn daily_index_key(day: NaiveDate) -> String {
    format!("{PREFIX}:index:daily:{}", day_string(day))
}

/// Longest window a reader will walk, about ten years.
pub const MAX_WINDOW_DAYS: u32 = 3660;

/// Window length actually used for a window ending at `end_day`: at least 1,
/// at most [`MAX_WINDOW_DAYS`], and never reaching before `NaiveDate::MIN`.
pub fn clamp_days(end_day: NaiveDate, days: u32) -> u32 {
    let available = end_day
        .signed_duration_since(NaiveDate::MIN)
        .num_days()
        .saturating_add(1);
    let cap = u32::try_from(available).unwrap_or(u32::MAX).min(MAX_WINDOW_DAYS);
    days.clamp(1, cap)
}

/// The calendar dates ending at (and including) `end_day`, oldest first,
/// for a window of `clamp_days(end_day, days)` days.
pub fn window_days(end_day: NaiveDate, days: u32) -> Vec<NaiveDate> {
    let days = clamp_days(end_day, days);
    let start = end_day
        .checked_sub_days(Days::new(u64::from(days - 1)))
        .unwrap_or(NaiveDate::MIN);
    start.iter_days().take(days as usize).collect()
}

/// End day of the window immediately before the one ending at `end_day`.
/// `None` when the current window already starts at `NaiveDate::MIN`.
pub fn previous_window_end(end_day: NaiveDate, days: u32) -> Option<NaiveDate> {
    end_day.checked_sub_days(Days::new(u64::from(clamp_days(end_day, days))))
}
