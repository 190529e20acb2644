//! Persisted LLM API credential.
//!
//! The key supplied by an admin is kept in a single file so it survives
//! restarts. Presence and length are checked; the key itself is only proven
//! good by the provider accepting it.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::info;

use crate::error::ExtractError;

pub const MIN_KEY_LEN: usize = 20;

#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
    cached: Arc<RwLock<Option<String>>>,
}

impl CredentialStore {
    /// Open the store, loading any key already saved at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let cached = if path.exists() {
            let key = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read credential file: {:?}", path))?;
            Some(key.trim().to_string()).filter(|k| !k.is_empty())
        } else {
            None
        };

        Ok(Self {
            path,
            cached: Arc::new(RwLock::new(cached)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> Option<String> {
        self.cached.read().unwrap().clone()
    }

    /// Validate and persist a new key.
    pub fn save(&self, key: &str) -> Result<(), ExtractError> {
        let key = validate_key(key)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ExtractError::Validation(format!("Cannot create {:?}: {}", parent, e)))?;
        }
        std::fs::write(&self.path, key)
            .map_err(|e| ExtractError::Validation(format!("Cannot write credential: {}", e)))?;

        *self.cached.write().unwrap() = Some(key.to_string());
        info!("Saved LLM credential to {:?}", self.path);
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .with_context(|| format!("Failed to remove {:?}", self.path))?;
        }
        *self.cached.write().unwrap() = None;
        Ok(())
    }

    /// The saved key, or a validation error when absent or too short.
    pub fn require(&self) -> Result<String, ExtractError> {
        let key = self
            .get()
            .ok_or_else(|| ExtractError::Validation("No API key configured".to_string()))?;
        validate_key(&key).map(str::to_string)
    }
}

pub fn validate_key(key: &str) -> Result<&str, ExtractError> {
    let key = key.trim();
    if key.chars().count() < MIN_KEY_LEN {
        return Err(ExtractError::Validation(format!(
            "API key must be at least {} characters",
            MIN_KEY_LEN
        )));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "sk-or-v1-0123456789abcdef";

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/credential");

        let store = CredentialStore::open(&path).unwrap();
        assert!(store.get().is_none());
        store.save(KEY).unwrap();

        let reopened = CredentialStore::open(&path).unwrap();
        assert_eq!(reopened.require().unwrap(), KEY);
    }

    #[test]
    fn test_short_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path().join("credential")).unwrap();
        assert!(matches!(store.save("short"), Err(ExtractError::Validation(_))));
        assert!(matches!(store.require(), Err(ExtractError::Validation(_))));
    }

    #[test]
    fn test_clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path().join("credential")).unwrap();
        store.save(KEY).unwrap();
        store.clear().unwrap();
        assert!(!store.path().exists());
        assert!(store.get().is_none());
    }
}
