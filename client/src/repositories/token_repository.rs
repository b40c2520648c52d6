//! Persistence of the access/refresh token pair.
//!
//! The token store is the only state shared between components and between
//! runs. It holds exactly two strings and nothing else. All reads and writes
//! go through the [`TokenStore`] trait.

use crate::auth::models::TokenPair;
use crate::errors::ClientResult;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Tokens as found in storage. Either value may be missing independently.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTokens {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl StoredTokens {
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none()
    }
}

impl From<&TokenPair> for StoredTokens {
    fn from(pair: &TokenPair) -> Self {
        Self {
            access_token: Some(pair.access_token.clone()),
            refresh_token: Some(pair.refresh_token.clone()),
        }
    }
}

/// Accessor set for the persisted tokens.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> ClientResult<StoredTokens>;

    fn save(&self, tokens: &TokenPair) -> ClientResult<()>;

    fn clear(&self) -> ClientResult<()>;

    /// Current access token, treating unreadable storage as empty.
    fn access_token(&self) -> Option<String> {
        self.load().ok().and_then(|tokens| tokens.access_token)
    }
}

/// Token store kept in process memory only.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<StoredTokens>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: StoredTokens) -> Self {
        Self {
            tokens: Mutex::new(tokens),
        }
    }

    fn lock(&self) -> ClientResult<std::sync::MutexGuard<'_, StoredTokens>> {
        self.tokens
            .lock()
            .map_err(|_| anyhow::anyhow!("token store lock poisoned").into())
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> ClientResult<StoredTokens> {
        Ok(self.lock()?.clone())
    }

    fn save(&self, tokens: &TokenPair) -> ClientResult<()> {
        *self.lock()? = StoredTokens::from(tokens);
        Ok(())
    }

    fn clear(&self) -> ClientResult<()> {
        *self.lock()? = StoredTokens::default();
        Ok(())
    }
}

/// Durable token store backed by a small JSON file.
///
/// The file is re-read on every load so that changes made by another
/// process are observed. Writes go to a sibling temp file which is then
/// renamed over the target.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, tokens: &StoredTokens) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create token directory {}", parent.display())
                })?;
            }
        }

        let contents = serde_json::to_vec_pretty(tokens).context("Failed to encode tokens")?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, contents)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> ClientResult<StoredTokens> {
        let contents = match fs::read(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StoredTokens::default());
            }
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("Failed to read {}", self.path.display()))
                    .into());
            }
        };

        let tokens = serde_json::from_slice(&contents)
            .with_context(|| format!("Token file {} is corrupt", self.path.display()))?;
        Ok(tokens)
    }

    fn save(&self, tokens: &TokenPair) -> ClientResult<()> {
        self.write(&StoredTokens::from(tokens))?;
        Ok(())
    }

    fn clear(&self) -> ClientResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(anyhow::Error::new(err)
                .context(format!("Failed to remove {}", self.path.display()))
                .into()),
        }
    }
}
