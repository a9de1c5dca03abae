pub mod candidates;
pub mod pages;
pub mod scoring;
pub mod tally;

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{error, info, warn};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::backend::VotingBackend;
use crate::config::Config;
use crate::error::{Error, Result, VoteRejection};
use crate::ip_lookup::IpResolver;
use crate::local_store::LocalStore;
use crate::models::{Candidate, NewVote, Session, Vote};
use crate::tasks::profile_sync::{ProfileSync, SyncOutcome};
use pages::VotePages;
use tally::{VoteTally, compute_tallies};

/// Last fetched view of the backend.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub candidates: Vec<Candidate>,
    pub votes: Vec<Vote>,
    pub tally: VoteTally,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoteSummary {
    pub tallies: BTreeMap<i64, u64>,
    pub total: u64,
    /// Candidate the signed-in voter currently backs.
    pub my_vote: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CastOutcome {
    pub vote: Vote,
    pub profile_sync: SyncOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelOutcome {
    pub candidate_id: i64,
    pub profile_sync: SyncOutcome,
}

/// In-memory, eventually consistent view of candidates and votes, plus the operations that
/// change them.
pub struct VotingState {
    backend: Arc<dyn VotingBackend>,
    config: Arc<Config>,
    local: Arc<LocalStore>,
    ip: IpResolver,
    profile_sync: ProfileSync,
    snapshot: RwLock<Snapshot>,
}

impl VotingState {
    pub fn new(
        backend: Arc<dyn VotingBackend>,
        config: Arc<Config>,
        local: Arc<LocalStore>,
        ip: IpResolver,
    ) -> Self {
        let profile_sync = ProfileSync::new(config.profile_sync_attempts, config.retry_delay);
        Self {
            backend,
            config,
            local,
            ip,
            profile_sync,
            snapshot: RwLock::new(Snapshot::default()),
        }
    }

    pub fn backend(&self) -> &Arc<dyn VotingBackend> {
        &self.backend
    }

    #[cfg(test)]
    pub async fn snapshot(&self) -> Snapshot {
        self.snapshot.read().await.clone()
    }

    pub async fn fetch_all_votes(&self) -> Result<Vec<Vote>> {
        VotePages::new(self.backend.clone(), self.config.vote_page_size)
            .collect_all()
            .await
    }

    pub async fn refresh_votes(&self) -> Result<VoteTally> {
        let votes = self.fetch_all_votes().await?;
        let tally = compute_tallies(&votes);
        info!("Loaded {} votes across {} candidates", tally.total, tally.counts.len());

        let mut snapshot = self.snapshot.write().await;
        snapshot.votes = votes;
        snapshot.tally = tally.clone();
        Ok(tally)
    }

    pub async fn refresh_candidates(&self) -> Result<()> {
        let candidates = self.backend.list_candidates().await?;
        info!("Loaded {} candidates", candidates.len());
        self.snapshot.write().await.candidates = candidates;
        Ok(())
    }

    pub async fn refresh(&self) -> Result<()> {
        self.refresh_candidates().await?;
        self.refresh_votes().await?;
        Ok(())
    }

    pub async fn summary(&self, session: Option<&Session>) -> VoteSummary {
        let snapshot = self.snapshot.read().await;
        let my_vote = session.and_then(|s| {
            snapshot
                .votes
                .iter()
                .find(|v| v.voter_id == s.user_id)
                .map(|v| v.candidate_id)
        });
        VoteSummary {
            tallies: snapshot.tally.counts.clone(),
            total: snapshot.tally.total,
            my_vote,
        }
    }

    /// The backend setting is authoritative and mirrored locally; the local value only
    /// answers when the backend can't.
    pub async fn voting_ended(&self) -> bool {
        let local = self.local.voting_ended().await;
        match self.backend.voting_ended().await {
            Ok(ended) => {
                if local != Some(ended) {
                    if let Err(e) = self.local.set_voting_ended(ended).await {
                        warn!("Failed to cache voting state locally: {}", e);
                    }
                }
                ended
            }
            Err(e) => {
                warn!("Could not read voting state from backend: {}", e);
                local.unwrap_or(false)
            }
        }
    }

    pub async fn cast_vote(
        &self,
        session: Option<&Session>,
        candidate_id: i64,
        origin: Option<String>,
    ) -> std::result::Result<CastOutcome, VoteRejection> {
        let session = session.ok_or(VoteRejection::NotAuthenticated)?;

        if self.voting_ended().await {
            return Err(VoteRejection::VotingClosed);
        }

        let known_candidate = {
            let snapshot = self.snapshot.read().await;
            if snapshot.votes.iter().any(|v| v.voter_id == session.user_id) {
                return Err(VoteRejection::AlreadyVoted);
            }
            snapshot.candidates.iter().any(|c| c.id == candidate_id)
        };

        if self.backend.find_vote_by_voter(&session.user_id).await?.is_some() {
            return Err(VoteRejection::AlreadyVoted);
        }
        if !known_candidate && self.backend.get_candidate(candidate_id).await?.is_none() {
            return Err(VoteRejection::InvalidCandidate(candidate_id));
        }

        let ip_address = match origin {
            Some(ip) => Some(ip),
            None => self.ip.resolve().await,
        };

        let new_vote = NewVote::new(session.user_id.clone(), candidate_id, ip_address);
        let vote = match self.backend.insert_vote(&new_vote).await {
            Ok(vote) => vote,
            Err(Error::Conflict(_)) => return Err(VoteRejection::AlreadyVoted),
            // Removed since our snapshot was taken.
            Err(Error::UnknownReference(_)) => {
                return Err(VoteRejection::InvalidCandidate(candidate_id));
            }
            Err(e) => {
                error!("Failed to record vote for {}: {}", session.user_id, e);
                return Err(e.into());
            }
        };
        info!(
            "Voter {} voted for candidate {} (tx {})",
            session.user_id, candidate_id, vote.transaction_id
        );

        let profile_sync = self
            .profile_sync
            .apply(self.backend.as_ref(), &session.user_id, true)
            .await;
        if !profile_sync.is_synced() {
            warn!("Vote by {} stands but its profile flag is stale", session.user_id);
        }

        if let Err(e) = self.refresh_votes().await {
            warn!("Vote recorded but re-fetch failed: {}", e);
        }

        Ok(CastOutcome { vote, profile_sync })
    }

    pub async fn cancel_vote(
        &self,
        session: Option<&Session>,
    ) -> std::result::Result<CancelOutcome, VoteRejection> {
        let session = session.ok_or(VoteRejection::NotAuthenticated)?;

        let Some(existing) = self.backend.find_vote_by_voter(&session.user_id).await? else {
            return Err(VoteRejection::NoVote);
        };

        let removed = match self.backend.delete_vote_by_voter(&session.user_id).await {
            Ok(removed) => removed,
            Err(e) => {
                error!("Failed to cancel vote for {}: {}", session.user_id, e);
                return Err(e.into());
            }
        };
        if removed == 0 {
            // Someone else got there first.
            return Err(VoteRejection::NoVote);
        }
        info!(
            "Voter {} cancelled their vote for candidate {}",
            session.user_id, existing.candidate_id
        );

        let profile_sync = self
            .profile_sync
            .apply(self.backend.as_ref(), &session.user_id, false)
            .await;
        if !profile_sync.is_synced() {
            warn!("Vote by {} cancelled but its profile flag is stale", session.user_id);
        }

        if let Err(e) = self.refresh_votes().await {
            warn!("Vote cancelled but re-fetch failed: {}", e);
        }

        Ok(CancelOutcome {
            candidate_id: existing.candidate_id,
            profile_sync,
        })
    }
}
