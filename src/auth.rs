use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};
use crate::models::Session;

/// Resolves a bearer token into the voter it belongs to.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn resolve(&self, token: &str) -> std::result::Result<Session, AuthError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Upstream answer, passed back untouched.
#[derive(Debug)]
pub struct ForwardedResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

#[derive(Deserialize)]
struct PlatformUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

/// Client for the hosted platform's auth service.
#[derive(Clone)]
pub struct PlatformAuth {
    client: reqwest::Client,
    auth_url: String,
    api_key: Option<String>,
    attempts: u32,
    retry_delay: Duration,
}

impl PlatformAuth {
    pub fn new(
        client: reqwest::Client,
        auth_url: String,
        api_key: Option<String>,
        attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            client,
            auth_url,
            api_key,
            attempts: attempts.max(1),
            retry_delay,
        }
    }

    /// Sends the credentials to the password-grant endpoint and hands back whatever it said.
    pub async fn forward_password_grant(&self, credentials: &Credentials) -> Result<ForwardedResponse> {
        let url = format!("{}/token?grant_type=password", self.auth_url);
        let mut request = self.client.post(&url).json(credentials);
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        debug!("Token endpoint answered {}", status);
        Ok(ForwardedResponse { status, body })
    }

    async fn fetch_user(&self, token: &str) -> std::result::Result<Session, FetchError> {
        let mut request = self
            .client
            .get(format!("{}/user", self.auth_url))
            .bearer_auth(token);
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key);
        }

        let response = request.send().await.map_err(|e| FetchError::Transient(e.to_string()))?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(FetchError::Rejected),
            status if status.is_server_error() => Err(FetchError::Transient(format!("status {}", status))),
            status if !status.is_success() => Err(FetchError::Rejected),
            _ => {
                let user: PlatformUser = response
                    .json()
                    .await
                    .map_err(|e| FetchError::Transient(e.to_string()))?;
                Ok(Session {
                    user_id: user.id,
                    email: user.email.unwrap_or_default(),
                })
            }
        }
    }
}

enum FetchError {
    Rejected,
    Transient(String),
}

#[async_trait]
impl Authenticator for PlatformAuth {
    async fn resolve(&self, token: &str) -> std::result::Result<Session, AuthError> {
        let mut last_error = String::new();
        for attempt in 1..=self.attempts {
            match self.fetch_user(token).await {
                Ok(session) => return Ok(session),
                Err(FetchError::Rejected) => return Err(AuthError::InvalidToken),
                Err(FetchError::Transient(reason)) => {
                    warn!("Session fetch attempt {}/{} failed: {}", attempt, self.attempts, reason);
                    last_error = reason;
                    if attempt < self.attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
        Err(AuthError::Unavailable(last_error))
    }
}
