//! Durable storage for the access/refresh credential pair.
//!
//! DESIGN
//! ======
//! The pair is the unit of storage: readers get both tokens or neither.
//! `FileTokenStore` keeps one JSON file per API origin and replaces it by
//! writing a sibling temp file and renaming it over the target, so a crash
//! mid-write leaves the previous pair intact. An in-memory copy behind a
//! mutex serves reads; the mutex is held across the disk write so a reader
//! can never see the cache and the file disagree about which pair is current.

#[cfg(test)]
#[path = "token_store_test.rs"]
mod token_store_test;

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::ApiError;
use crate::net::types::TokenPair;

/// Process-wide credential storage.
pub trait TokenStore: Send + Sync {
    /// Current pair, if both tokens are stored.
    fn get(&self) -> Option<TokenPair>;

    /// Replace both tokens in one step.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Storage`] if the pair could not be persisted.
    fn set(&self, pair: TokenPair) -> Result<(), ApiError>;

    /// Remove both tokens. Clearing an empty store is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Storage`] if the persisted pair could not be removed.
    fn clear(&self) -> Result<(), ApiError>;

    fn access_token(&self) -> Option<String> {
        self.get().map(|p| p.access)
    }

    fn refresh_token(&self) -> Option<String> {
        self.get().map(|p| p.refresh)
    }
}

// =============================================================================
// MEMORY
// =============================================================================

/// Non-durable store; used by tests and `--ephemeral` runs.
#[derive(Default)]
pub struct MemoryTokenStore {
    pair: Mutex<Option<TokenPair>>,
}

impl MemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_pair(pair: TokenPair) -> Self {
        Self { pair: Mutex::new(Some(pair)) }
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> Option<TokenPair> {
        self.pair.lock().ok().and_then(|p| p.clone())
    }

    fn set(&self, pair: TokenPair) -> Result<(), ApiError> {
        let mut slot = self.pair.lock().map_err(|e| ApiError::Storage(e.to_string()))?;
        *slot = Some(pair);
        Ok(())
    }

    fn clear(&self) -> Result<(), ApiError> {
        let mut slot = self.pair.lock().map_err(|e| ApiError::Storage(e.to_string()))?;
        *slot = None;
        Ok(())
    }
}

// =============================================================================
// FILE
// =============================================================================

/// JSON-file store scoped to one API origin.
pub struct FileTokenStore {
    path: PathBuf,
    cache: Mutex<Option<TokenPair>>,
}

impl FileTokenStore {
    /// Open (or lazily create) the token file for `origin` under `dir`.
    ///
    /// An unreadable or half-populated file is treated as "no tokens".
    #[must_use]
    pub fn open(dir: &Path, origin: &str) -> Self {
        let path = dir.join(token_file_name(origin));
        let cache = read_pair(&path);
        tracing::debug!(path = %path.display(), present = cache.is_some(), "token store opened");
        Self { path, cache: Mutex::new(cache) }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self) -> Option<TokenPair> {
        self.cache.lock().ok().and_then(|p| p.clone())
    }

    fn set(&self, pair: TokenPair) -> Result<(), ApiError> {
        let mut cache = self.cache.lock().map_err(|e| ApiError::Storage(e.to_string()))?;
        write_pair_atomic(&self.path, &pair)?;
        *cache = Some(pair);
        Ok(())
    }

    fn clear(&self) -> Result<(), ApiError> {
        let mut cache = self.cache.lock().map_err(|e| ApiError::Storage(e.to_string()))?;
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ApiError::Storage(format!("remove {}: {e}", self.path.display()))),
        }
        *cache = None;
        Ok(())
    }
}

/// `http://127.0.0.1:8000` -> `tokens-http_127.0.0.1_8000.json`
pub(crate) fn token_file_name(origin: &str) -> String {
    let slug: String = origin
        .replace("://", "_")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    format!("tokens-{slug}.json")
}

fn read_pair(path: &Path) -> Option<TokenPair> {
    let raw = fs::read_to_string(path).ok()?;
    match serde_json::from_str::<TokenPair>(&raw) {
        Ok(pair) if !pair.access.is_empty() && !pair.refresh.is_empty() => Some(pair),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable token file");
            None
        }
    }
}

fn write_pair_atomic(path: &Path, pair: &TokenPair) -> Result<(), ApiError> {
    let storage_err = |e: std::io::Error| ApiError::Storage(format!("{}: {e}", path.display()));

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(storage_err)?;
    }
    let body = serde_json::to_vec(pair).map_err(|e| ApiError::Storage(e.to_string()))?;

    let tmp = path.with_extension("json.tmp");
    {
        let mut file = owner_only_options().open(&tmp).map_err(storage_err)?;
        file.write_all(&body).map_err(storage_err)?;
        file.sync_all().map_err(storage_err)?;
    }
    fs::rename(&tmp, path).map_err(storage_err)
}

/// Create-or-truncate options; on unix the file is readable by its owner only.
fn owner_only_options() -> fs::OpenOptions {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt as _;
        options.mode(0o600);
    }
    options
}
