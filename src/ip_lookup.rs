use std::sync::Arc;

use log::{debug, warn};
use serde::Deserialize;

use crate::error::Result;
use crate::local_store::LocalStore;

#[derive(Deserialize)]
struct IpResponse {
    ip: String,
}

/// Best-effort public address for annotating votes.
#[derive(Clone)]
pub struct IpResolver {
    client: reqwest::Client,
    lookup_url: String,
    store: Arc<LocalStore>,
}

impl IpResolver {
    pub fn new(client: reqwest::Client, lookup_url: String, store: Arc<LocalStore>) -> Self {
        Self {
            client,
            lookup_url,
            store,
        }
    }

    /// Cached address first, then the lookup service. Failure yields None.
    pub async fn resolve(&self) -> Option<String> {
        if let Some(ip) = self.store.last_ip().await {
            return Some(ip);
        }
        if self.lookup_url.is_empty() {
            return None;
        }

        match self.lookup().await {
            Ok(ip) => {
                if let Err(e) = self.store.set_last_ip(&ip).await {
                    warn!("Failed to cache public IP: {}", e);
                }
                Some(ip)
            }
            Err(e) => {
                warn!("Public IP lookup failed: {}", e);
                None
            }
        }
    }

    async fn lookup(&self) -> Result<String> {
        let response: IpResponse = self
            .client
            .get(&self.lookup_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!("Resolved public IP {}", response.ip);
        Ok(response.ip)
    }
}
