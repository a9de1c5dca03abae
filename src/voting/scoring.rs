//! The cosmetic "AI Score" shown next to each candidate.
//!
//! It is derived from how the candidate's voters' email addresses look: Gmail or not, and
//! whether the local part resembles a throwaway address. It is not an anti-fraud signal.
//! Scores always land in `[MIN_SCORE, MAX_SCORE]` and scoring never fails.

use std::collections::HashSet;

use lazy_static::lazy_static;
use log::warn;
use rand::{Rng, SeedableRng, rngs::StdRng};
use regex::Regex;
use serde::Serialize;

use crate::backend::VotingBackend;
use crate::models::Candidate;

pub const MIN_SCORE: u8 = 75;
pub const MAX_SCORE: u8 = 97;

const VERIFIED_WEIGHT: f64 = 0.5;
const SPAM_COMPLEMENT_WEIGHT: f64 = 0.3;
const GMAIL_WEIGHT: f64 = 0.2;
const SPAM_COMPLEMENT_FLOOR: f64 = 0.5;
const MAX_PERTURBATION: f64 = 2.0;
const VERIFIED_JITTER: f64 = 0.1;

const FALLBACK_SCORES: [u8; 5] = [82, 85, 79, 88, 84];

lazy_static! {
    static ref KEYBOARD_MASH: Regex = Regex::new(r"^[a-z0-9]{12,}$").unwrap();
    static ref LEADING_DIGITS: Regex = Regex::new(r"^[0-9]{4,}").unwrap();
    static ref ALTERNATING: Regex =
        Regex::new(r"^(?:(?:[a-z][0-9]){3,}[a-z]?|(?:[0-9][a-z]){3,}[0-9]?)$").unwrap();
    static ref DISPOSABLE: Regex =
        Regex::new(r"temp|fake|test|spam|throw|away|random|disposable").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmailClass {
    pub gmail: bool,
    pub spam_like: bool,
}

pub fn classify_email(email: &str) -> EmailClass {
    let email = email.trim().to_lowercase();
    let Some((local, domain)) = email.rsplit_once('@') else {
        return EmailClass {
            gmail: false,
            spam_like: true,
        };
    };

    let gmail = domain == "gmail.com" || domain == "googlemail.com";
    let no_vowels = !local.chars().any(|c| matches!(c, 'a' | 'e' | 'i' | 'o' | 'u'));
    let spam_like = (KEYBOARD_MASH.is_match(local) && no_vowels)
        || LEADING_DIGITS.is_match(local)
        || ALTERNATING.is_match(local)
        || DISPOSABLE.is_match(local);

    EmailClass { gmail, spam_like }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EmailStats {
    pub total: u64,
    pub verified: u64,
    pub spam_like: u64,
    pub non_gmail: u64,
}

impl EmailStats {
    pub fn from_emails<S: AsRef<str>>(emails: &[S]) -> Self {
        let mut stats = EmailStats::default();
        for email in emails {
            let class = classify_email(email.as_ref());
            stats.total += 1;
            if class.spam_like {
                stats.spam_like += 1;
            } else {
                stats.verified += 1;
            }
            if !class.gmail {
                stats.non_gmail += 1;
            }
        }
        stats
    }

    fn gmail(&self) -> u64 {
        self.total - self.non_gmail
    }

    // Same composition, same seed.
    fn rng(&self) -> StdRng {
        let mut seed = [0u8; 32];
        for (chunk, value) in seed
            .chunks_exact_mut(8)
            .zip([self.total, self.verified, self.spam_like, self.non_gmail])
        {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        StdRng::from_seed(seed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreRecord {
    pub candidate_id: i64,
    pub score: u8,
    pub verified: u64,
    pub spam_like: u64,
    pub non_gmail: u64,
    pub total_votes: u64,
}

pub fn calculate_score<S: AsRef<str>>(candidate_id: i64, emails: &[S]) -> ScoreRecord {
    let stats = EmailStats::from_emails(emails);
    if stats.total == 0 {
        return ScoreRecord {
            candidate_id,
            score: baseline_score(candidate_id),
            verified: 0,
            spam_like: 0,
            non_gmail: 0,
            total_votes: 0,
        };
    }

    let total = stats.total as f64;
    let verified_ratio = stats.verified as f64 / total;
    let spam_complement = (1.0 - stats.spam_like as f64 / total).max(SPAM_COMPLEMENT_FLOOR);
    let gmail_ratio = stats.gmail() as f64 / total;

    let raw = 100.0
        * (VERIFIED_WEIGHT * verified_ratio
            + SPAM_COMPLEMENT_WEIGHT * spam_complement
            + GMAIL_WEIGHT * gmail_ratio);
    let span = (MAX_SCORE - MIN_SCORE) as f64;
    let display = MIN_SCORE as f64 + raw * span / 100.0;

    let mut rng = stats.rng();
    let perturbation = rng.gen_range(-MAX_PERTURBATION..=MAX_PERTURBATION);
    let jitter = rng.gen_range(-VERIFIED_JITTER..=VERIFIED_JITTER);

    let score = (display + perturbation)
        .round()
        .clamp(MIN_SCORE as f64, MAX_SCORE as f64) as u8;
    let verified = ((stats.verified as f64) * (1.0 + jitter))
        .round()
        .clamp(0.0, total) as u64;

    ScoreRecord {
        candidate_id,
        score,
        verified,
        spam_like: stats.spam_like.max(1),
        non_gmail: stats.non_gmail,
        total_votes: stats.total,
    }
}

/// Stand-in score for a candidate nobody has voted for yet: 76..=85 keyed on the id.
pub fn baseline_score(candidate_id: i64) -> u8 {
    StdRng::seed_from_u64(candidate_id as u64).gen_range(76..=85)
}

pub fn fallback_score(candidate_id: i64) -> u8 {
    FALLBACK_SCORES[candidate_id.rem_euclid(FALLBACK_SCORES.len() as i64) as usize]
}

/// Nudges repeated scores by one point so neighbouring candidates rarely show the same
/// number. Records are visited in order; a score already taken moves up one, else down one.
/// When both neighbours are taken (or out of range) the tie stays.
pub fn resolve_ties(records: &mut [ScoreRecord]) {
    let mut taken: HashSet<u8> = HashSet::new();
    for record in records.iter_mut() {
        if taken.contains(&record.score) {
            let up = record.score.saturating_add(1);
            let down = record.score.saturating_sub(1);
            if up <= MAX_SCORE && !taken.contains(&up) {
                record.score = up;
            } else if down >= MIN_SCORE && !taken.contains(&down) {
                record.score = down;
            }
        }
        taken.insert(record.score);
    }
}

/// Scores every candidate, ordered by id. A failed email fetch degrades to a fallback score.
pub async fn score_candidates(
    backend: &dyn VotingBackend,
    candidates: &[Candidate],
) -> Vec<ScoreRecord> {
    let mut ids: Vec<i64> = candidates.iter().map(|c| c.id).collect();
    ids.sort_unstable();
    ids.dedup();

    let mut records = Vec::with_capacity(ids.len());
    for id in ids {
        let record = match backend.voter_emails(id).await {
            Ok(emails) => calculate_score(id, &emails),
            Err(e) => {
                warn!("Falling back to a fixed score for candidate {}: {}", id, e);
                ScoreRecord {
                    candidate_id: id,
                    score: fallback_score(id),
                    verified: 0,
                    spam_like: 0,
                    non_gmail: 0,
                    total_votes: 0,
                }
            }
        };
        records.push(record);
    }

    resolve_ties(&mut records);
    records
}
