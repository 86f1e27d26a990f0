//! Content-addressed memoisation of translation batches.
//!
//! One JSON file per batch, keyed by the SHA-256 of the source strings
//! joined with an ETX sentinel byte. A populated cache makes re-running
//! an interrupted book free of LLM calls for everything already done.
//! Writes go through a temp file and rename; concurrent writers of the
//! same key both compute the same value, so last-rename-wins is fine.

use std::future::Future;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{Result, TranslateError};

/// String terminator byte between hashed entries
const SENTINEL: &[u8] = b"\x03";

pub struct TranslationCache {
    dir: PathBuf,
}

impl TranslationCache {
    /// Open (and create) the cache directory
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| TranslateError::Cache(format!("cannot create {}: {e}", dir.display())))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Cache key of a batch: sha256 of each source followed by ETX
    pub fn key(sources: &[String]) -> String {
        let mut hasher = Sha256::new();
        for source in sources {
            hasher.update(source.as_bytes());
            hasher.update(SENTINEL);
        }
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<Vec<String>> {
        let path = self.entry_path(key);
        let data = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<Vec<String>>(&data) {
            Ok(values) => Some(values),
            Err(e) => {
                warn!("discarding corrupt cache entry {}: {e}", path.display());
                let _ = std::fs::remove_file(&path);
                None
            }
        }
    }

    pub fn put(&self, key: &str, values: &[String]) -> Result<()> {
        let json = serde_json::to_string_pretty(values)?;
        let mut file = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| TranslateError::Cache(format!("cannot create temp file: {e}")))?;
        std::io::Write::write_all(&mut file, json.as_bytes())
            .map_err(|e| TranslateError::Cache(format!("cannot write cache entry: {e}")))?;
        file.persist(self.entry_path(key))
            .map_err(|e| TranslateError::Cache(format!("cannot persist cache entry: {e}")))?;
        Ok(())
    }

    /// Look up a batch, calling `translate` on a miss and persisting the
    /// result. Returns the translations and whether the cache hit.
    pub async fn get_or_translate<F, Fut>(
        &self,
        sources: &[String],
        translate: F,
    ) -> Result<(Vec<String>, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<String>>>,
    {
        let key = Self::key(sources);
        if let Some(values) = self.get(&key) {
            debug!("cache hit for batch of {}", sources.len());
            return Ok((values, true));
        }
        let values = translate().await?;
        self.put(&key, &values)?;
        Ok((values, false))
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}
