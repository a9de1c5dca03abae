#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::models::{Candidate, CandidateUpdate, ChangeEvent, NewCandidate, NewVote, Profile, Vote};

/// Capacity of the change feed before slow subscribers start lagging.
pub const CHANGE_FEED_CAPACITY: usize = 64;

/// Everything the voting layer needs from the hosted datastore.
///
/// Handed to each component as `Arc<dyn VotingBackend>` so tests can swap in a fake.
#[async_trait]
pub trait VotingBackend: Send + Sync {
    async fn list_candidates(&self) -> Result<Vec<Candidate>>;

    async fn get_candidate(&self, id: i64) -> Result<Option<Candidate>>;

    async fn insert_candidate(&self, candidate: &NewCandidate) -> Result<Candidate>;

    async fn update_candidate(&self, id: i64, update: CandidateUpdate) -> Result<Option<Candidate>>;

    /// Removes the candidate and its votes. Returns false when nothing matched.
    async fn delete_candidate(&self, id: i64) -> Result<bool>;

    /// One page of votes ordered by id.
    async fn fetch_votes_page(&self, offset: usize, limit: usize) -> Result<Vec<Vote>>;

    async fn find_vote_by_voter(&self, voter_id: &str) -> Result<Option<Vote>>;

    async fn insert_vote(&self, vote: &NewVote) -> Result<Vote>;

    /// Returns the number of rows removed.
    async fn delete_vote_by_voter(&self, voter_id: &str) -> Result<u64>;

    /// Emails of every voter who voted for the candidate.
    async fn voter_emails(&self, candidate_id: i64) -> Result<Vec<String>>;

    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>>;

    /// Creates the profile on first sight; never touches flags of an existing one.
    async fn ensure_profile(&self, user_id: &str, email: &str) -> Result<Profile>;

    async fn set_has_voted(&self, user_id: &str, has_voted: bool) -> Result<()>;

    async fn voting_ended(&self) -> Result<bool>;

    async fn set_voting_ended(&self, ended: bool) -> Result<()>;

    async fn banner_urls(&self) -> Result<Vec<String>>;

    async fn set_banner_urls(&self, urls: &[String]) -> Result<()>;

    /// Row-level change notifications for candidates and votes.
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;
}
