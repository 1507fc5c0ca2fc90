//! Daily AI usage and cost accounting on top of a get/set/delete/expire
//! key-value cache.
//!
//! [`recorder::UsageRecorder`] folds each completed AI call into a daily
//! bucket and appends the bucket key to that day's index.
//! [`window::WindowReader`] walks those indexes to rebuild rolling windows,
//! because the cache itself cannot list keys.

pub mod cache;
pub mod config;
pub mod cost;
pub mod error;
pub mod ingest;
pub mod keys;
pub mod pricing;
pub mod recorder;
pub mod types;
pub mod window;

pub use cache::Cache;
pub use cost::{ModelPricing, PricingResolver};
pub use error::{CacheError, Error, Result};
pub use pricing::PricingTable;
pub use recorder::{DayBoundary, RecorderSettings, UsageRecorder};
pub use types::{Aggregate, AggregateBucket, TokenUsage, UsageEvent};
pub use window::{Delta, DeltaTotals, WindowComparison, WindowReader, WindowReport};
