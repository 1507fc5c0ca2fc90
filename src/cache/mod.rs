pub mod bitcode_store;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite_store;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use directories::ProjectDirs;
use serde::Deserialize;

use crate::error::CacheError;

pub use bitcode_store::FileCache;
pub use memory::MemoryCache;
#[cfg(feature = "sqlite")]
pub use sqlite_store::SqliteCache;

/// Minimal key-value cache contract.
///
/// No key enumeration or range scan; every read path must know the exact
/// key it wants. Expired entries behave exactly like absent ones.
pub trait Cache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store `value` under `key`. `None` keeps the entry until deleted.
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Returns whether a live entry was removed.
    fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Reset the time-to-live of a live entry. Returns false if the key is absent.
    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    File,
    Memory,
    Sqlite,
}

pub(crate) fn cache_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "aicost").map(|d| d.cache_dir().to_path_buf())
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Absolute expiry in unix seconds for a relative TTL.
pub(crate) fn deadline_secs(ttl: Duration) -> i64 {
    unix_now().saturating_add(ttl.as_secs().min(i64::MAX as u64) as i64)
}

/// Open the configured backend. `path` overrides the default location for
/// file-backed stores and is ignored by the in-memory one.
pub fn open_cache(
    backend: CacheBackend,
    path: Option<PathBuf>,
) -> anyhow::Result<Arc<dyn Cache>> {
    match backend {
        CacheBackend::Memory => Ok(Arc::new(MemoryCache::new())),
        CacheBackend::File => {
            let path = match path.or_else(|| cache_dir().map(|d| d.join("cache.bin"))) {
                Some(p) => p,
                None => anyhow::bail!("no cache directory available; set cache.path"),
            };
            Ok(Arc::new(FileCache::new(path)))
        }
        #[cfg(feature = "sqlite")]
        CacheBackend::Sqlite => {
            let path = match path.or_else(|| cache_dir().map(|d| d.join("cache.db"))) {
                Some(p) => p,
                None => anyhow::bail!("no cache directory available; set cache.path"),
            };
            Ok(Arc::new(SqliteCache::open(&path)?))
        }
        #[cfg(not(feature = "sqlite"))]
        CacheBackend::Sqlite => {
            anyhow::bail!("sqlite cache backend requires building with --features sqlite")
        }
    }
}
