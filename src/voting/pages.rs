use std::sync::Arc;

use log::debug;

use crate::backend::VotingBackend;
use crate::error::Result;
use crate::models::Vote;

/// Walks the vote table one fixed-size page at a time.
///
/// A page shorter than `page_size` ends the sequence. `restart` rewinds to the first page,
/// so the same value can be driven again after a failed or completed walk.
pub struct VotePages {
    backend: Arc<dyn VotingBackend>,
    page_size: usize,
    offset: usize,
    done: bool,
}

impl VotePages {
    pub fn new(backend: Arc<dyn VotingBackend>, page_size: usize) -> Self {
        Self {
            backend,
            page_size: page_size.max(1),
            offset: 0,
            done: false,
        }
    }

    pub async fn next_page(&mut self) -> Result<Option<Vec<Vote>>> {
        if self.done {
            return Ok(None);
        }

        let page = self.backend.fetch_votes_page(self.offset, self.page_size).await?;
        debug!("Fetched {} votes at offset {}", page.len(), self.offset);
        self.offset += page.len();
        if page.len() < self.page_size {
            self.done = true;
        }

        if page.is_empty() { Ok(None) } else { Ok(Some(page)) }
    }

    pub fn restart(&mut self) {
        self.offset = 0;
        self.done = false;
    }

    /// Every page from the start, concatenated. Any page error aborts the whole walk.
    pub async fn collect_all(&mut self) -> Result<Vec<Vote>> {
        self.restart();
        let mut votes = Vec::new();
        while let Some(page) = self.next_page().await? {
            votes.extend(page);
        }
        Ok(votes)
    }
}
