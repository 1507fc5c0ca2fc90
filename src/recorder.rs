use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::cache::Cache;
use crate::cost::PricingResolver;
use crate::error::{Error, Result};
use crate::keys::{bucket_key, daily_index_key};
use crate::types::{AggregateBucket, UsageEvent};

/// 90 days.
pub const DEFAULT_RETENTION_SECS: u64 = 90 * 24 * 60 * 60;

/// Which calendar an event timestamp is bucketed in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayBoundary {
    #[default]
    Utc,
    Local,
}

impl DayBoundary {
    pub fn day_of(self, ts: DateTime<Utc>) -> NaiveDate {
        match self {
            DayBoundary::Utc => ts.date_naive(),
            DayBoundary::Local => ts.with_timezone(&Local).date_naive(),
        }
    }

    pub fn today(self) -> NaiveDate {
        self.day_of(Utc::now())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RecorderSettings {
    pub enabled: bool,
    /// Applied to both buckets and daily indexes.
    pub retention: Duration,
    pub day_boundary: DayBoundary,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            retention: Duration::from_secs(DEFAULT_RETENTION_SECS),
            day_boundary: DayBoundary::Utc,
        }
    }
}

/// Write path: folds each completed AI call into its daily bucket and keeps
/// the per-day index of bucket keys current.
///
/// Both updates are plain read-modify-write cycles against the cache.
/// Two concurrent `record` calls on the same bucket can interleave and one
/// increment is lost; callers needing exact counts must put an
/// atomic-increment backend behind [`Cache`] instead.
pub struct UsageRecorder {
    cache: Arc<dyn Cache>,
    pricing: Arc<dyn PricingResolver>,
    settings: RecorderSettings,
}

impl UsageRecorder {
    pub fn new(
        cache: Arc<dyn Cache>,
        pricing: Arc<dyn PricingResolver>,
        settings: RecorderSettings,
    ) -> Self {
        Self {
            cache,
            pricing,
            settings,
        }
    }

    pub fn settings(&self) -> &RecorderSettings {
        &self.settings
    }

    pub fn record(&self, event: &UsageEvent) -> Result<()> {
        if !self.settings.enabled {
            return Ok(());
        }

        let ev = event.normalized(Utc::now());
        let day = self.settings.day_boundary.day_of(ev.timestamp);
        let cost = self
            .pricing
            .calculate_eur(&ev.provider, &ev.model, &ev.usage);

        if cost.is_none() {
            debug!(provider = %ev.provider, model = %ev.model, "no pricing configured");
        }
        if !ev.ok {
            debug!(
                usage_key = %ev.usage_key,
                error_code = ev.error_code.as_deref().unwrap_or("-"),
                "recording failed call"
            );
        }

        let key = bucket_key(day, &ev.usage_key, &ev.provider, &ev.model);
        self.add_to_index(&daily_index_key(day), &key)?;

        let mut bucket = match self.cache.get(&key)? {
            Some(raw) => serde_json::from_str::<AggregateBucket>(&raw)
                .map_err(|source| Error::Corrupt {
                    key: key.clone(),
                    source,
                })?,
            None => AggregateBucket::empty(day, &ev.usage_key, &ev.provider, &ev.model),
        };
        bucket.apply(&ev, cost);
        self.cache.set(
            &key,
            &serde_json::to_string(&bucket)?,
            Some(self.settings.retention),
        )?;

        debug!(
            key = %key,
            requests = bucket.requests,
            cost = ?cost,
            "usage recorded"
        );
        Ok(())
    }

    /// Record events in order. Stops at the first hard failure.
    pub fn record_all<'a>(&self, events: impl IntoIterator<Item = &'a UsageEvent>) -> Result<usize> {
        let mut n = 0;
        for event in events {
            self.record(event)?;
            n += 1;
        }
        Ok(n)
    }

    /// Idempotent: the index only grows by keys it does not hold yet, but the
    /// entry is rewritten every time so its TTL tracks the latest activity.
    /// An unreadable index is logged and rebuilt starting from `key`.
    fn add_to_index(&self, index_key: &str, key: &str) -> Result<()> {
        let mut keys: Vec<String> = match self.cache.get(index_key)? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(key = %index_key, error = %e, "rebuilding malformed daily index");
                Vec::new()
            }),
            None => Vec::new(),
        };
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
        self.cache.set(
            index_key,
            &serde_json::to_string(&keys)?,
            Some(self.settings.retention),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::cost::ModelPricing;
    use crate::pricing::PricingTable;
    use crate::types::TokenUsage;

    fn recorder(cache: Arc<MemoryCache>, enabled: bool) -> UsageRecorder {
        let pricing = PricingTable::default().with(
            "openai",
            "gpt-4o-mini",
            ModelPricing {
                input_per_1k: 0.00015,
                output_per_1k: 0.0006,
            },
        );
        UsageRecorder::new(
            cache,
            Arc::new(pricing),
            RecorderSettings {
                enabled,
                ..RecorderSettings::default()
            },
        )
    }

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn disabled_recorder_writes_nothing() {
        let cache = Arc::new(MemoryCache::new());
        let rec = recorder(cache.clone(), false);
        let ev = UsageEvent::new("chat.ask", "openai", "gpt-4o-mini", TokenUsage::new(1, 1))
            .at(at("2025-01-10T12:00:00Z"));
        rec.record(&ev).unwrap();
        let day = "2025-01-10".parse().unwrap();
        assert_eq!(cache.get(&daily_index_key(day)).unwrap(), None);
    }

    #[test]
    fn unpriced_event_leaves_cost_untouched() {
        let cache = Arc::new(MemoryCache::new());
        let rec = recorder(cache.clone(), true);
        let ts = at("2025-01-10T08:00:00Z");
        rec.record(
            &UsageEvent::new("chat.ask", "mistral", "large", TokenUsage::new(1000, 1000)).at(ts),
        )
        .unwrap();

        let key = bucket_key(ts.date_naive(), "chat.ask", "mistral", "large");
        let bucket: AggregateBucket =
            serde_json::from_str(&cache.get(&key).unwrap().unwrap()).unwrap();
        assert_eq!(bucket.requests, 1);
        assert_eq!(bucket.total_tokens, 2000);
        assert_eq!(bucket.cost_eur, 0.0);
    }

    #[test]
    fn corrupt_bucket_is_not_overwritten() {
        let cache = Arc::new(MemoryCache::new());
        let rec = recorder(cache.clone(), true);
        let ts = at("2025-01-10T08:00:00Z");
        let key = bucket_key(ts.date_naive(), "chat.ask", "openai", "gpt-4o-mini");
        cache.set(&key, "{not json", None).unwrap();

        let err = rec
            .record(&UsageEvent::new("chat.ask", "openai", "gpt-4o-mini", TokenUsage::default()).at(ts))
            .unwrap_err();
        assert!(matches!(err, Error::Corrupt { .. }));
        assert_eq!(cache.get(&key).unwrap().as_deref(), Some("{not json"));
    }

    #[test]
    fn malformed_index_is_rebuilt() {
        let cache = Arc::new(MemoryCache::new());
        let rec = recorder(cache.clone(), true);
        let ts = at("2025-01-10T08:00:00Z");
        let index_key = daily_index_key(ts.date_naive());
        cache.set(&index_key, "garbage", None).unwrap();

        rec.record(&UsageEvent::new("search", "openai", "gpt-4o-mini", TokenUsage::new(4, 2)).at(ts))
            .unwrap();

        let key = bucket_key(ts.date_naive(), "search", "openai", "gpt-4o-mini");
        let index: Vec<String> =
            serde_json::from_str(&cache.get(&index_key).unwrap().unwrap()).unwrap();
        assert_eq!(index, vec![key.clone()]);
        let bucket: AggregateBucket =
            serde_json::from_str(&cache.get(&key).unwrap().unwrap()).unwrap();
        assert_eq!(bucket.requests, 1);
        assert_eq!(bucket.total_tokens, 6);
    }

    #[test]
    fn local_and_utc_boundaries_can_differ() {
        let ts = at("2025-01-10T23:30:00Z");
        assert_eq!(DayBoundary::Utc.day_of(ts), "2025-01-10".parse().unwrap());
        assert_eq!(
            DayBoundary::Local.day_of(ts),
            ts.with_timezone(&Local).date_naive()
        );
    }
}
