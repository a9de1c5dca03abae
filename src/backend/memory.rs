use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;

use super::{CHANGE_FEED_CAPACITY, VotingBackend};
use crate::error::{Error, Result};
use crate::models::{
    Candidate, CandidateUpdate, ChangeEvent, ChangeKind, NewCandidate, NewVote, Profile, Table,
    Vote,
};

#[derive(Default)]
struct Tables {
    candidates: Vec<Candidate>,
    votes: Vec<Vote>,
    profiles: HashMap<String, Profile>,
    voting_ended: bool,
    banner_urls: Vec<String>,
    next_candidate_id: i64,
    next_vote_id: i64,
}

/// In-memory backend with switches for injecting failures.
pub struct MemoryBackend {
    tables: Mutex<Tables>,
    changes: Mutex<broadcast::Sender<ChangeEvent>>,
    pub page_requests: AtomicUsize,
    /// Fail the page request with this index (0-based) if set.
    pub fail_page: Mutex<Option<usize>>,
    /// Number of upcoming `set_has_voted` calls that fail.
    pub profile_failures: AtomicU32,
    pub fail_emails: AtomicBool,
    pub fail_settings: AtomicBool,
    pub fail_inserts: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            tables: Mutex::new(Tables {
                next_candidate_id: 1,
                next_vote_id: 1,
                ..Default::default()
            }),
            changes: Mutex::new(changes),
            page_requests: AtomicUsize::new(0),
            fail_page: Mutex::new(None),
            profile_failures: AtomicU32::new(0),
            fail_emails: AtomicBool::new(false),
            fail_settings: AtomicBool::new(false),
            fail_inserts: AtomicBool::new(false),
        }
    }

    pub fn add_candidate(&self, name: &str) -> Candidate {
        let mut tables = self.tables.lock().unwrap();
        let candidate = Candidate {
            id: tables.next_candidate_id,
            name: name.to_string(),
            genre: "House".to_string(),
            image_url: None,
            video_url: None,
            social_handle: None,
            bio: None,
            created_at: Utc::now(),
        };
        tables.next_candidate_id += 1;
        tables.candidates.push(candidate.clone());
        candidate
    }

    pub fn add_profile(&self, user_id: &str, email: &str, is_admin: bool) {
        let mut tables = self.tables.lock().unwrap();
        tables.profiles.insert(
            user_id.to_string(),
            Profile {
                id: user_id.to_string(),
                email: email.to_string(),
                is_admin,
                has_voted: false,
            },
        );
    }

    /// Inserts a vote without announcing it on the change feed.
    pub fn seed_vote(&self, voter_id: &str, candidate_id: i64) -> Vote {
        let mut tables = self.tables.lock().unwrap();
        Self::push_vote(&mut tables, &NewVote::new(voter_id.to_string(), candidate_id, None))
    }

    pub fn set_banners(&self, urls: &[&str]) {
        self.tables.lock().unwrap().banner_urls = urls.iter().map(|u| u.to_string()).collect();
    }

    pub fn vote_count(&self) -> usize {
        self.tables.lock().unwrap().votes.len()
    }

    pub fn profile(&self, user_id: &str) -> Option<Profile> {
        self.tables.lock().unwrap().profiles.get(user_id).cloned()
    }

    pub fn notify(&self, table: Table, kind: ChangeKind) {
        let _ = self.changes.lock().unwrap().send(ChangeEvent::new(table, kind));
    }

    /// Drops the current feed so every open receiver sees it closed.
    pub fn close_feed(&self) {
        let (fresh, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        *self.changes.lock().unwrap() = fresh;
    }

    fn push_vote(tables: &mut Tables, vote: &NewVote) -> Vote {
        let stored = Vote {
            id: tables.next_vote_id,
            voter_id: vote.voter_id.clone(),
            candidate_id: vote.candidate_id,
            created_at: vote.created_at,
            transaction_id: vote.transaction_id.clone(),
            ip_address: vote.ip_address.clone(),
        };
        tables.next_vote_id += 1;
        tables.votes.push(stored.clone());
        stored
    }
}

#[async_trait]
impl VotingBackend for MemoryBackend {
    async fn list_candidates(&self) -> Result<Vec<Candidate>> {
        Ok(self.tables.lock().unwrap().candidates.clone())
    }

    async fn get_candidate(&self, id: i64) -> Result<Option<Candidate>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.candidates.iter().find(|c| c.id == id).cloned())
    }

    async fn insert_candidate(&self, candidate: &NewCandidate) -> Result<Candidate> {
        let stored = {
            let mut tables = self.tables.lock().unwrap();
            let stored = Candidate {
                id: tables.next_candidate_id,
                name: candidate.name.clone(),
                genre: candidate.genre.clone(),
                image_url: candidate.image_url.clone(),
                video_url: candidate.video_url.clone(),
                social_handle: candidate.social_handle.clone(),
                bio: candidate.bio.clone(),
                created_at: Utc::now(),
            };
            tables.next_candidate_id += 1;
            tables.candidates.push(stored.clone());
            stored
        };
        self.notify(Table::Candidates, ChangeKind::Insert);
        Ok(stored)
    }

    async fn update_candidate(&self, id: i64, update: CandidateUpdate) -> Result<Option<Candidate>> {
        let updated = {
            let mut tables = self.tables.lock().unwrap();
            tables.candidates.iter_mut().find(|c| c.id == id).map(|c| {
                update.apply(c);
                c.clone()
            })
        };
        if updated.is_some() {
            self.notify(Table::Candidates, ChangeKind::Update);
        }
        Ok(updated)
    }

    async fn delete_candidate(&self, id: i64) -> Result<bool> {
        let (removed, dropped_votes) = {
            let mut tables = self.tables.lock().unwrap();
            let before = tables.candidates.len();
            tables.candidates.retain(|c| c.id != id);
            let votes_before = tables.votes.len();
            tables.votes.retain(|v| v.candidate_id != id);
            (tables.candidates.len() != before, votes_before - tables.votes.len())
        };
        if !removed {
            return Ok(false);
        }
        self.notify(Table::Candidates, ChangeKind::Delete);
        if dropped_votes > 0 {
            self.notify(Table::Votes, ChangeKind::Delete);
        }
        Ok(true)
    }

    async fn fetch_votes_page(&self, offset: usize, limit: usize) -> Result<Vec<Vote>> {
        let index = self.page_requests.fetch_add(1, Ordering::SeqCst);
        if *self.fail_page.lock().unwrap() == Some(index) {
            return Err(Error::Backend(format!("page {} unavailable", index)));
        }
        let tables = self.tables.lock().unwrap();
        Ok(tables.votes.iter().skip(offset).take(limit).cloned().collect())
    }

    async fn find_vote_by_voter(&self, voter_id: &str) -> Result<Option<Vote>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.votes.iter().find(|v| v.voter_id == voter_id).cloned())
    }

    async fn insert_vote(&self, vote: &NewVote) -> Result<Vote> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(Error::Backend("insert rejected".to_string()));
        }
        let stored = {
            let mut tables = self.tables.lock().unwrap();
            if !tables.candidates.iter().any(|c| c.id == vote.candidate_id) {
                return Err(Error::UnknownReference(format!("candidate {}", vote.candidate_id)));
            }
            Self::push_vote(&mut tables, vote)
        };
        self.notify(Table::Votes, ChangeKind::Insert);
        Ok(stored)
    }

    async fn delete_vote_by_voter(&self, voter_id: &str) -> Result<u64> {
        let removed = {
            let mut tables = self.tables.lock().unwrap();
            let before = tables.votes.len();
            tables.votes.retain(|v| v.voter_id != voter_id);
            (before - tables.votes.len()) as u64
        };
        if removed > 0 {
            self.notify(Table::Votes, ChangeKind::Delete);
        }
        Ok(removed)
    }

    async fn voter_emails(&self, candidate_id: i64) -> Result<Vec<String>> {
        if self.fail_emails.load(Ordering::SeqCst) {
            return Err(Error::Backend("profiles unavailable".to_string()));
        }
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .votes
            .iter()
            .filter(|v| v.candidate_id == candidate_id)
            .filter_map(|v| tables.profiles.get(&v.voter_id))
            .map(|p| p.email.clone())
            .collect())
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        Ok(self.profile(user_id))
    }

    async fn ensure_profile(&self, user_id: &str, email: &str) -> Result<Profile> {
        let mut tables = self.tables.lock().unwrap();
        let profile = tables
            .profiles
            .entry(user_id.to_string())
            .or_insert_with(|| Profile {
                id: user_id.to_string(),
                email: email.to_string(),
                is_admin: false,
                has_voted: false,
            });
        Ok(profile.clone())
    }

    async fn set_has_voted(&self, user_id: &str, has_voted: bool) -> Result<()> {
        let pending = self.profile_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.profile_failures.store(pending - 1, Ordering::SeqCst);
            return Err(Error::Backend("profile update failed".to_string()));
        }
        let mut tables = self.tables.lock().unwrap();
        match tables.profiles.get_mut(user_id) {
            Some(profile) => {
                profile.has_voted = has_voted;
                Ok(())
            }
            None => Err(Error::Backend(format!("no profile for {}", user_id))),
        }
    }

    async fn voting_ended(&self) -> Result<bool> {
        if self.fail_settings.load(Ordering::SeqCst) {
            return Err(Error::Backend("settings unavailable".to_string()));
        }
        Ok(self.tables.lock().unwrap().voting_ended)
    }

    async fn set_voting_ended(&self, ended: bool) -> Result<()> {
        self.tables.lock().unwrap().voting_ended = ended;
        Ok(())
    }

    async fn banner_urls(&self) -> Result<Vec<String>> {
        if self.fail_settings.load(Ordering::SeqCst) {
            return Err(Error::Backend("settings unavailable".to_string()));
        }
        Ok(self.tables.lock().unwrap().banner_urls.clone())
    }

    async fn set_banner_urls(&self, urls: &[String]) -> Result<()> {
        self.tables.lock().unwrap().banner_urls = urls.to_vec();
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.lock().unwrap().subscribe()
    }
}
