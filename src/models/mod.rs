use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: i64,
    pub name: String,
    pub genre: String,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    pub social_handle: Option<String>,
    pub bio: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewCandidate {
    pub name: String,
    pub genre: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub social_handle: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
}

// Fields left as None keep their stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub social_handle: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
}

impl CandidateUpdate {
    pub fn apply(self, candidate: &mut Candidate) {
        if let Some(name) = self.name {
            candidate.name = name;
        }
        if let Some(genre) = self.genre {
            candidate.genre = genre;
        }
        if self.image_url.is_some() {
            candidate.image_url = self.image_url;
        }
        if self.video_url.is_some() {
            candidate.video_url = self.video_url;
        }
        if self.social_handle.is_some() {
            candidate.social_handle = self.social_handle;
        }
        if self.bio.is_some() {
            candidate.bio = self.bio;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub id: i64,
    pub voter_id: String,
    pub candidate_id: i64,
    pub created_at: DateTime<Utc>,
    pub transaction_id: String,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewVote {
    pub voter_id: String,
    pub candidate_id: i64,
    pub created_at: DateTime<Utc>,
    pub transaction_id: String,
    pub ip_address: Option<String>,
}

impl NewVote {
    pub fn new(voter_id: String, candidate_id: i64, ip_address: Option<String>) -> Self {
        Self {
            voter_id,
            candidate_id,
            created_at: Utc::now(),
            transaction_id: Uuid::new_v4().to_string(),
            ip_address,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub is_admin: bool,
    pub has_voted: bool,
}

/// The signed-in voter, as resolved from a bearer token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Table {
    Candidates,
    Votes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn new(table: Table, kind: ChangeKind) -> Self {
        Self { table, kind }
    }
}
