use std::time::Duration;

use log::{info, warn};
use serde::Serialize;

use crate::backend::VotingBackend;

/// Result of the secondary `has_voted` write that follows a cast or cancel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    Synced { attempts: u32 },
    Failed { attempts: u32, reason: String },
}

impl SyncOutcome {
    pub fn is_synced(&self) -> bool {
        matches!(self, SyncOutcome::Synced { .. })
    }
}

/// Retry policy for keeping the profile flag in step with the vote table.
#[derive(Debug, Clone)]
pub struct ProfileSync {
    attempts: u32,
    delay: Duration,
}

impl ProfileSync {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    /// Never rolls back the primary write; the caller gets the outcome instead.
    pub async fn apply(
        &self,
        backend: &dyn VotingBackend,
        user_id: &str,
        has_voted: bool,
    ) -> SyncOutcome {
        let mut reason = String::new();
        for attempt in 1..=self.attempts {
            match backend.set_has_voted(user_id, has_voted).await {
                Ok(()) => {
                    if attempt > 1 {
                        info!("Profile flag for {} synced on attempt {}", user_id, attempt);
                    }
                    return SyncOutcome::Synced { attempts: attempt };
                }
                Err(e) => {
                    warn!(
                        "Profile flag sync for {} failed (attempt {}/{}): {}",
                        user_id, attempt, self.attempts, e
                    );
                    reason = e.to_string();
                    if attempt < self.attempts {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }
        SyncOutcome::Failed {
            attempts: self.attempts,
            reason,
        }
    }
}
