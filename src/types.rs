use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const UNKNOWN: &str = "unknown";

/// Token counts as reported by a provider. Any subset may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens: Some(input_tokens),
            output_tokens: Some(output_tokens),
            total_tokens: None,
        }
    }

    /// Fill in a missing total from input + output when both are known.
    pub fn reconciled(self) -> Self {
        let total_tokens = match (self.total_tokens, self.input_tokens, self.output_tokens) {
            (Some(t), _, _) => Some(t),
            (None, Some(i), Some(o)) => Some(i.saturating_add(o)),
            _ => None,
        };
        Self {
            total_tokens,
            ..self
        }
    }
}

fn default_ok() -> bool {
    true
}

/// One completed AI call, as handed over by the call site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    #[serde(default)]
    pub usage_key: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default)]
    pub latency_ms: i64,
    #[serde(default = "default_ok")]
    pub ok: bool,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub cache_hit: bool,
    /// Defaults to the moment the event is recorded.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A `UsageEvent` with every optional field resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    pub usage_key: String,
    pub provider: String,
    pub model: String,
    pub usage: TokenUsage,
    pub latency_ms: u64,
    pub ok: bool,
    pub error_code: Option<String>,
    pub cache_hit: bool,
    pub timestamp: DateTime<Utc>,
}

/// Usage keys and providers never carry `:`, the bucket key separator.
fn strip_separator(s: &str) -> String {
    s.replace(':', "_")
}

pub fn normalize_provider(provider: &str) -> String {
    strip_separator(&provider.trim().to_lowercase())
}

pub fn normalize_model(model: &str) -> String {
    let m = model.trim().to_lowercase();
    if m.is_empty() {
        UNKNOWN.to_string()
    } else {
        m
    }
}

pub fn normalize_usage_key(usage_key: &str) -> String {
    let k = usage_key.trim();
    if k.is_empty() {
        UNKNOWN.to_string()
    } else {
        strip_separator(k)
    }
}

impl Default for UsageEvent {
    fn default() -> Self {
        Self {
            usage_key: String::new(),
            provider: String::new(),
            model: String::new(),
            usage: TokenUsage::default(),
            latency_ms: 0,
            ok: true,
            error_code: None,
            cache_hit: false,
            timestamp: None,
        }
    }
}

impl UsageEvent {
    pub fn new(usage_key: &str, provider: &str, model: &str, usage: TokenUsage) -> Self {
        Self {
            usage_key: usage_key.to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
            usage,
            ..Self::default()
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn failed(mut self, error_code: Option<&str>) -> Self {
        self.ok = false;
        self.error_code = error_code.map(str::to_string);
        self
    }

    pub fn normalized(&self, now: DateTime<Utc>) -> NormalizedEvent {
        NormalizedEvent {
            usage_key: normalize_usage_key(&self.usage_key),
            provider: normalize_provider(&self.provider),
            model: normalize_model(&self.model),
            usage: self.usage.reconciled(),
            latency_ms: self.latency_ms.max(0) as u64,
            ok: self.ok,
            error_code: self
                .error_code
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            cache_hit: self.cache_hit,
            timestamp: self.timestamp.unwrap_or(now),
        }
    }
}

/// Daily counters for one `(day, usage_key, provider, model)` tuple.
///
/// Field names are the persisted format and must not change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateBucket {
    pub day: NaiveDate,
    pub usage_key: String,
    pub provider: String,
    pub model: String,
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost_eur: f64,
    pub errors: u64,
    pub cache_hits: u64,
    pub latency_ms_sum: u64,
}

impl AggregateBucket {
    pub fn empty(day: NaiveDate, usage_key: &str, provider: &str, model: &str) -> Self {
        Self {
            day,
            usage_key: usage_key.to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
            requests: 0,
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            cost_eur: 0.0,
            errors: 0,
            cache_hits: 0,
            latency_ms_sum: 0,
        }
    }

    /// Fold one event into the bucket. `cost` is only added when known.
    pub fn apply(&mut self, event: &NormalizedEvent, cost: Option<f64>) {
        self.requests = self.requests.saturating_add(1);
        self.latency_ms_sum = self.latency_ms_sum.saturating_add(event.latency_ms);
        if event.cache_hit {
            self.cache_hits = self.cache_hits.saturating_add(1);
        }
        if !event.ok {
            self.errors = self.errors.saturating_add(1);
        }
        if let Some(n) = event.usage.input_tokens {
            self.input_tokens = self.input_tokens.saturating_add(n);
        }
        if let Some(n) = event.usage.output_tokens {
            self.output_tokens = self.output_tokens.saturating_add(n);
        }
        if let Some(n) = event.usage.total_tokens {
            self.total_tokens = self.total_tokens.saturating_add(n);
        }
        if let Some(c) = cost {
            self.cost_eur += c;
        }
    }

    /// `provider/model` label used by the per-model breakdown.
    pub fn model_label(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

/// Window accumulator: plain field-wise sums, so folding order never matters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Aggregate {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost_eur: f64,
    pub errors: u64,
    pub cache_hits: u64,
    pub latency_ms_sum: u64,
}

impl Aggregate {
    pub fn accumulate(&mut self, bucket: &AggregateBucket) {
        self.requests = self.requests.saturating_add(bucket.requests);
        self.input_tokens = self.input_tokens.saturating_add(bucket.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(bucket.output_tokens);
        self.total_tokens = self.total_tokens.saturating_add(bucket.total_tokens);
        self.cost_eur += bucket.cost_eur;
        self.errors = self.errors.saturating_add(bucket.errors);
        self.cache_hits = self.cache_hits.saturating_add(bucket.cache_hits);
        self.latency_ms_sum = self.latency_ms_sum.saturating_add(bucket.latency_ms_sum);
    }

    pub fn merge(&mut self, other: &Aggregate) {
        self.requests = self.requests.saturating_add(other.requests);
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
        self.cost_eur += other.cost_eur;
        self.errors = self.errors.saturating_add(other.errors);
        self.cache_hits = self.cache_hits.saturating_add(other.cache_hits);
        self.latency_ms_sum = self.latency_ms_sum.saturating_add(other.latency_ms_sum);
    }

    /// Mean latency per request; 0 when there were no requests.
    pub fn avg_latency_ms(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.latency_ms_sum as f64 / self.requests as f64
        }
    }
}
