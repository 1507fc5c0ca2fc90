use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::warn;

use crate::cache::Cache;
use crate::error::Result;
use crate::keys::{clamp_days, daily_index_key, previous_window_end, window_days};
use crate::types::{Aggregate, AggregateBucket};

/// Totals for one rolling window of calendar days.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WindowTotals {
    pub totals: Aggregate,
    pub by_usage_key: BTreeMap<String, Aggregate>,
    /// Keyed `provider/model`.
    pub by_model: BTreeMap<String, Aggregate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowReport {
    pub start_day: NaiveDate,
    pub end_day: NaiveDate,
    pub days: u32,
    #[serde(flatten)]
    pub data: WindowTotals,
}

/// Change of one metric from the previous window to the current one.
/// `pct` is `None` when the previous value is zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Delta {
    pub current: f64,
    pub previous: f64,
    pub abs: f64,
    pub pct: Option<f64>,
}

impl Delta {
    pub fn between(current: f64, previous: f64) -> Self {
        let abs = current - previous;
        let pct = (previous > 0.0).then(|| abs / previous * 100.0);
        Self {
            current,
            previous,
            abs,
            pct,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DeltaTotals {
    pub requests: Delta,
    pub total_tokens: Delta,
    pub cost_eur: Delta,
    pub errors: Delta,
    pub avg_latency_ms: Delta,
}

impl DeltaTotals {
    pub fn between(current: &Aggregate, previous: &Aggregate) -> Self {
        Self {
            requests: Delta::between(current.requests as f64, previous.requests as f64),
            total_tokens: Delta::between(current.total_tokens as f64, previous.total_tokens as f64),
            cost_eur: Delta::between(current.cost_eur, previous.cost_eur),
            errors: Delta::between(current.errors as f64, previous.errors as f64),
            avg_latency_ms: Delta::between(current.avg_latency_ms(), previous.avg_latency_ms()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowComparison {
    pub current: WindowReport,
    pub previous: WindowReport,
    pub delta_totals: DeltaTotals,
}

/// Fold buckets into window totals. Pure field-wise addition, so the
/// result does not depend on the order of `buckets`.
pub fn fold_buckets<'a>(buckets: impl IntoIterator<Item = &'a AggregateBucket>) -> WindowTotals {
    let mut out = WindowTotals::default();
    for b in buckets {
        out.totals.accumulate(b);
        out.by_usage_key
            .entry(b.usage_key.clone())
            .or_default()
            .accumulate(b);
        out.by_model
            .entry(b.model_label())
            .or_default()
            .accumulate(b);
    }
    out
}

/// Read path. Rebuilds rolling windows from the daily indexes written by
/// [`crate::recorder::UsageRecorder`]; it never enumerates the cache.
pub struct WindowReader {
    cache: Arc<dyn Cache>,
}

impl WindowReader {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    /// Every live bucket referenced from the indexes of `days`.
    /// Missing indexes and expired buckets contribute nothing; malformed
    /// entries are logged and skipped.
    fn buckets_for(&self, days: &[NaiveDate]) -> Result<Vec<AggregateBucket>> {
        let mut buckets = Vec::new();
        for &day in days {
            let index_key = daily_index_key(day);
            let Some(raw) = self.cache.get(&index_key)? else {
                continue;
            };
            let keys: Vec<String> = match serde_json::from_str(&raw) {
                Ok(k) => k,
                Err(e) => {
                    warn!(key = %index_key, error = %e, "skipping malformed daily index");
                    continue;
                }
            };
            for key in keys {
                let Some(raw) = self.cache.get(&key)? else {
                    continue;
                };
                match serde_json::from_str::<AggregateBucket>(&raw) {
                    Ok(b) => buckets.push(b),
                    Err(e) => warn!(key = %key, error = %e, "skipping malformed bucket"),
                }
            }
        }
        Ok(buckets)
    }

    /// `days` is clamped with [`clamp_days`]; the report carries the
    /// length actually used.
    pub fn load_window(&self, end_day: NaiveDate, days: u32) -> Result<WindowReport> {
        let span = window_days(end_day, days);
        let buckets = self.buckets_for(&span)?;
        Ok(WindowReport {
            start_day: span.first().copied().unwrap_or(end_day),
            end_day,
            days: clamp_days(end_day, days),
            data: fold_buckets(&buckets),
        })
    }

    /// Current window plus the contiguous, equally long window before it.
    /// When the current window already starts at the earliest representable
    /// date, the previous window is empty: zero days ending at `NaiveDate::MIN`.
    pub fn load_with_previous_and_delta(
        &self,
        end_day: NaiveDate,
        days: u32,
    ) -> Result<WindowComparison> {
        let current = self.load_window(end_day, days)?;
        let previous = match previous_window_end(end_day, days) {
            Some(prev_end) => self.load_window(prev_end, current.days)?,
            None => WindowReport {
                start_day: NaiveDate::MIN,
                end_day: NaiveDate::MIN,
                days: 0,
                data: WindowTotals::default(),
            },
        };
        let delta_totals = DeltaTotals::between(&current.data.totals, &previous.data.totals);
        Ok(WindowComparison {
            current,
            previous,
            delta_totals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::keys::bucket_key;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn bucket(usage_key: &str, model: &str, requests: u64, cost: f64) -> AggregateBucket {
        AggregateBucket {
            requests,
            total_tokens: requests * 10,
            cost_eur: cost,
            latency_ms_sum: requests * 100,
            ..AggregateBucket::empty(d("2025-01-10"), usage_key, "openai", model)
        }
    }

    #[test]
    fn delta_pct_is_none_without_baseline() {
        let d = Delta::between(5.0, 0.0);
        assert_eq!(d.abs, 5.0);
        assert_eq!(d.pct, None);

        let d = Delta::between(3.0, 4.0);
        assert_eq!(d.abs, -1.0);
        assert!((d.pct.unwrap() + 25.0).abs() < 1e-9);
    }

    #[test]
    fn fold_groups_by_usage_key_and_model() {
        let buckets = vec![
            bucket("chat.ask", "gpt-4o", 2, 0.5),
            bucket("chat.ask", "gpt-4o-mini", 1, 0.25),
            bucket("search", "gpt-4o", 4, 1.0),
        ];
        let w = fold_buckets(&buckets);
        assert_eq!(w.totals.requests, 7);
        assert_eq!(w.by_usage_key["chat.ask"].requests, 3);
        assert_eq!(w.by_usage_key["search"].requests, 4);
        assert_eq!(w.by_model["openai/gpt-4o"].requests, 6);
        assert_eq!(w.totals.cost_eur, 1.75);
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let cache = Arc::new(MemoryCache::new());
        let day = d("2025-01-10");
        let good = bucket("chat.ask", "gpt-4o", 2, 0.5);
        let good_key = bucket_key(day, "chat.ask", "openai", "gpt-4o");
        let bad_key = bucket_key(day, "broken", "openai", "gpt-4o");
        cache
            .set(&good_key, &serde_json::to_string(&good).unwrap(), None)
            .unwrap();
        cache.set(&bad_key, "[1,2,3]", None).unwrap();
        cache
            .set(
                &daily_index_key(day),
                &serde_json::to_string(&[&good_key, &bad_key]).unwrap(),
                None,
            )
            .unwrap();
        cache
            .set(&daily_index_key(d("2025-01-09")), "garbage", None)
            .unwrap();

        let reader = WindowReader::new(cache);
        let w = reader.load_window(day, 2).unwrap();
        assert_eq!(w.start_day, d("2025-01-09"));
        assert_eq!(w.data.totals.requests, 2);
        assert_eq!(w.data.by_usage_key.len(), 1);
    }

    #[test]
    fn comparison_at_earliest_date_has_empty_previous() {
        let reader = WindowReader::new(Arc::new(MemoryCache::new()));
        let end = NaiveDate::MIN.checked_add_days(chrono::Days::new(1)).unwrap();
        let cmp = reader.load_with_previous_and_delta(end, 7).unwrap();
        assert_eq!(cmp.current.days, 2);
        assert_eq!(cmp.current.start_day, NaiveDate::MIN);
        assert_eq!(cmp.previous.days, 0);
        assert_eq!(cmp.previous.data, WindowTotals::default());
        assert_eq!(cmp.delta_totals.requests.pct, None);
    }
}
