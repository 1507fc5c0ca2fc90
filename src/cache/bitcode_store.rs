use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::time::Duration;

use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};

use super::{deadline_secs, unix_now, Cache};
use crate::error::CacheError;

/// Whole cache in one bitcode file: `~/.cache/aicost/cache.bin` by default.
///
/// Every operation re-reads the file under an advisory lock on a sidecar
/// `.lock` file: shared for reads, exclusive for the whole
/// read-modify-write of a mutation. Handles in other threads or processes
/// opened on the same path therefore never drop each other's writes.
/// Writes land in a per-process temp file and are renamed into place.
pub struct FileCache {
    path: PathBuf,
}

#[derive(Serialize, Deserialize, Default)]
struct CacheFile {
    entries: HashMap<String, CachedValue>,
}

#[derive(Serialize, Deserialize)]
struct CachedValue {
    value: String,
    expires_at_secs: Option<i64>,
}

impl CachedValue {
    fn is_live(&self, now: i64) -> bool {
        self.expires_at_secs.map_or(true, |t| t > now)
    }
}

impl FileCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Open and lock the sidecar file. The lock is released when the
    /// returned handle is dropped.
    fn lock(&self, exclusive: bool) -> Result<File, CacheError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.path.with_extension("bin.lock"))?;
        if exclusive {
            FileExt::lock_exclusive(&file)?;
        } else {
            FileExt::lock_shared(&file)?;
        }
        Ok(file)
    }

    fn load(&self) -> Result<CacheFile, CacheError> {
        let data = match fs::read(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(CacheFile::default()),
            Err(e) => return Err(e.into()),
        };
        bitcode::deserialize(&data).map_err(|e| {
            CacheError::Encoding(format!("failed to decode {}: {e}", self.path.display()))
        })
    }

    fn store(&self, file: &CacheFile) -> Result<(), CacheError> {
        let data = bitcode::serialize(file).map_err(|e| CacheError::Encoding(e.to_string()))?;
        let tmp = self
            .path
            .with_extension(format!("bin.{}.tmp", std::process::id()));
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Load, apply `f`, and write back only if `f` reports a change.
    /// Expired entries are dropped on every write.
    fn update<T>(&self, f: impl FnOnce(&mut CacheFile, i64) -> (T, bool)) -> Result<T, CacheError> {
        let _lock = self.lock(true)?;
        let mut file = self.load()?;
        let now = unix_now();
        let (out, changed) = f(&mut file, now);
        if changed {
            file.entries.retain(|_, v| v.is_live(now));
            self.store(&file)?;
        }
        Ok(out)
    }
}

impl Cache for FileCache {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let _lock = self.lock(false)?;
        let now = unix_now();
        let file = self.load()?;
        Ok(file
            .entries
            .get(key)
            .filter(|v| v.is_live(now))
            .map(|v| v.value.clone()))
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let expires_at_secs = ttl.map(deadline_secs);
        self.update(|file, _| {
            file.entries.insert(
                key.to_string(),
                CachedValue {
                    value: value.to_string(),
                    expires_at_secs,
                },
            );
            ((), true)
        })
    }

    fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.update(|file, now| match file.entries.remove(key) {
            Some(v) => (v.is_live(now), true),
            None => (false, false),
        })
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.update(|file, now| match file.entries.get_mut(key) {
            Some(v) if v.is_live(now) => {
                v.expires_at_secs = Some(deadline_secs(ttl));
                (true, true)
            }
            _ => (false, false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.bin");

        FileCache::new(&path)
            .set("k", "v", Some(Duration::from_secs(3600)))
            .unwrap();

        let reopened = FileCache::new(&path);
        assert_eq!(reopened.get("k").unwrap().as_deref(), Some("v"));
        assert_eq!(reopened.get("missing").unwrap(), None);
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path().join("cache.bin"));
        assert_eq!(cache.get("k").unwrap(), None);
        assert!(!cache.delete("k").unwrap());
        assert!(!dir.path().join("cache.bin").exists());
    }

    #[test]
    fn separate_handles_do_not_drop_each_others_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.bin");
        let workers = 4;
        let rounds = 25;

        std::thread::scope(|s| {
            for w in 0..workers {
                let path = path.clone();
                s.spawn(move || {
                    let cache = FileCache::new(&path);
                    for i in 0..rounds {
                        let key = format!("worker-{w}");
                        let n: u32 = cache
                            .get(&key)
                            .unwrap()
                            .map_or(0, |v| v.parse().unwrap());
                        assert_eq!(n, i);
                        cache.set(&key, &(n + 1).to_string(), None).unwrap();
                    }
                });
            }
        });

        let cache = FileCache::new(&path);
        for w in 0..workers {
            assert_eq!(
                cache.get(&format!("worker-{w}")).unwrap().as_deref(),
                Some("25")
            );
        }
    }

    #[test]
    fn zero_ttl_hides_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path().join("cache.bin"));
        cache.set("k", "v", None).unwrap();
        assert!(cache.expire("k", Duration::ZERO).unwrap());
        assert_eq!(cache.get("k").unwrap(), None);
    }
}
