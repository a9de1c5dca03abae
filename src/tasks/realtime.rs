use std::sync::Arc;

use log::{error, info, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::models::Table;
use crate::voting::VotingState;

/// Keeps a `VotingState` fresh from the backend change feed.
///
/// Every notification triggers a full re-fetch of the affected collection. Dropping the
/// subscription stops the task.
pub struct RealtimeSubscription {
    handle: JoinHandle<()>,
}

impl RealtimeSubscription {
    pub fn open(voting: Arc<VotingState>) -> Self {
        // Subscribe before spawning so no change is missed between open and first poll.
        let mut changes = voting.backend().subscribe();

        let handle = tokio::spawn(async move {
            info!("Realtime subscription opened");
            loop {
                match changes.recv().await {
                    Ok(event) => {
                        let result = match event.table {
                            Table::Candidates => voting.refresh_candidates().await,
                            Table::Votes => voting.refresh_votes().await.map(|_| ()),
                        };
                        if let Err(e) = result {
                            error!("Re-fetch after {:?} {:?} failed: {}", event.table, event.kind, e);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Change feed lagged by {} events, re-fetching everything", skipped);
                        if let Err(e) = voting.refresh().await {
                            error!("Full re-fetch failed: {}", e);
                        }
                    }
                    Err(RecvError::Closed) => {
                        info!("Change feed closed, ending realtime subscription");
                        break;
                    }
                }
            }
        });

        Self { handle }
    }

    pub fn close(self) {
        self.handle.abort();
    }

    #[cfg(test)]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for RealtimeSubscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
