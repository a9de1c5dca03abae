use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::Result;

/// What we keep between runs without asking the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalState {
    #[serde(default)]
    pub banner_urls: Vec<String>,
    #[serde(default)]
    pub voting_ended: Option<bool>,
    #[serde(default)]
    pub last_ip: Option<String>,
}

/// Small persistent key-value store backed by a JSON file.
///
/// Loaded once at construction; `reload` re-reads the file explicitly. Every write is
/// flushed straight back to disk. Without a path the store lives in memory only.
pub struct LocalStore {
    path: Option<PathBuf>,
    state: RwLock<LocalState>,
}

impl LocalStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = read_state(&path).await?;
        Ok(Self {
            path: Some(path),
            state: RwLock::new(state),
        })
    }

    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: RwLock::new(LocalState::default()),
        }
    }

    pub async fn reload(&self) -> Result<()> {
        if let Some(path) = &self.path {
            let fresh = read_state(path).await?;
            *self.state.write().await = fresh;
            info!("Reloaded local settings from {}", path.display());
        }
        Ok(())
    }

    pub async fn snapshot(&self) -> LocalState {
        self.state.read().await.clone()
    }

    pub async fn voting_ended(&self) -> Option<bool> {
        self.state.read().await.voting_ended
    }

    pub async fn set_voting_ended(&self, ended: bool) -> Result<()> {
        self.update(|state| state.voting_ended = Some(ended)).await
    }

    pub async fn last_ip(&self) -> Option<String> {
        self.state.read().await.last_ip.clone()
    }

    pub async fn set_last_ip(&self, ip: &str) -> Result<()> {
        let ip = ip.to_string();
        self.update(move |state| state.last_ip = Some(ip)).await
    }

    pub async fn banner_urls(&self) -> Vec<String> {
        self.state.read().await.banner_urls.clone()
    }

    pub async fn set_banner_urls(&self, urls: Vec<String>) -> Result<()> {
        self.update(move |state| state.banner_urls = urls).await
    }

    async fn update<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut LocalState),
    {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        change(&mut next);
        // Memory only moves once the file has.
        if let Some(path) = &self.path {
            let encoded = serde_json::to_vec_pretty(&next)?;
            tokio::fs::write(path, encoded).await?;
        }
        *state = next;
        Ok(())
    }
}

async fn read_state(path: &Path) -> Result<LocalState> {
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(state) => Ok(state),
            Err(e) => {
                // A corrupt cache is discarded, not fatal.
                warn!("Ignoring unreadable local store {}: {}", path.display(), e);
                Ok(LocalState::default())
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LocalState::default()),
        Err(e) => Err(e.into()),
    }
}
