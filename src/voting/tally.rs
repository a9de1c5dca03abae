use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::Vote;

/// Vote count per candidate, rebuilt from the full vote set on every fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VoteTally {
    pub counts: BTreeMap<i64, u64>,
    pub total: u64,
}

impl VoteTally {
    #[cfg(test)]
    pub fn count(&self, candidate_id: i64) -> u64 {
        self.counts.get(&candidate_id).copied().unwrap_or(0)
    }
}

pub fn compute_tallies(votes: &[Vote]) -> VoteTally {
    let mut counts: BTreeMap<i64, u64> = BTreeMap::new();
    for vote in votes {
        *counts.entry(vote.candidate_id).or_insert(0) += 1;
    }
    VoteTally {
        counts,
        total: votes.len() as u64,
    }
}
