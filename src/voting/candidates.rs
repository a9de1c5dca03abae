use log::{info, warn};

use super::VotingState;
use super::scoring::{ScoreRecord, score_candidates};
use crate::error::CandidateError;
use crate::local_store::LocalState;
use crate::models::{Candidate, CandidateUpdate, NewCandidate, Session};

type Result<T> = std::result::Result<T, CandidateError>;

fn require_text(value: &str, field: &'static str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CandidateError::MissingField(field));
    }
    Ok(())
}

impl VotingState {
    pub async fn list_candidates(&self) -> Vec<Candidate> {
        self.snapshot.read().await.candidates.clone()
    }

    async fn require_admin(&self, session: Option<&Session>) -> Result<()> {
        let session = session.ok_or(CandidateError::NotAuthenticated)?;
        match self.backend.get_profile(&session.user_id).await? {
            Some(profile) if profile.is_admin => Ok(()),
            _ => Err(CandidateError::NotAdmin),
        }
    }

    async fn reload_candidates(&self) {
        if let Err(e) = self.refresh_candidates().await {
            warn!("Candidate list re-fetch failed: {}", e);
        }
    }

    pub async fn create_candidate(
        &self,
        session: Option<&Session>,
        candidate: NewCandidate,
    ) -> Result<Candidate> {
        self.require_admin(session).await?;
        require_text(&candidate.name, "name")?;
        require_text(&candidate.genre, "genre")?;

        let created = self.backend.insert_candidate(&candidate).await?;
        info!("Added candidate {} ({})", created.id, created.name);
        self.reload_candidates().await;
        Ok(created)
    }

    pub async fn update_candidate(
        &self,
        session: Option<&Session>,
        id: i64,
        update: CandidateUpdate,
    ) -> Result<Candidate> {
        self.require_admin(session).await?;
        if let Some(name) = &update.name {
            require_text(name, "name")?;
        }
        if let Some(genre) = &update.genre {
            require_text(genre, "genre")?;
        }

        let updated = self
            .backend
            .update_candidate(id, update)
            .await?
            .ok_or(CandidateError::NotFound(id))?;
        info!("Updated candidate {}", id);
        self.reload_candidates().await;
        Ok(updated)
    }

    pub async fn delete_candidate(&self, session: Option<&Session>, id: i64) -> Result<()> {
        self.require_admin(session).await?;
        if !self.backend.delete_candidate(id).await? {
            return Err(CandidateError::NotFound(id));
        }
        info!("Deleted candidate {}", id);
        self.reload_candidates().await;
        if let Err(e) = self.refresh_votes().await {
            warn!("Vote re-fetch after candidate delete failed: {}", e);
        }
        Ok(())
    }

    pub async fn set_voting_ended(&self, session: Option<&Session>, ended: bool) -> Result<()> {
        self.require_admin(session).await?;
        self.backend.set_voting_ended(ended).await?;
        if let Err(e) = self.local.set_voting_ended(ended).await {
            warn!("Failed to cache voting state locally: {}", e);
        }
        info!("Voting {}", if ended { "closed" } else { "reopened" });
        Ok(())
    }

    pub async fn set_banner_urls(&self, session: Option<&Session>, urls: Vec<String>) -> Result<()> {
        self.require_admin(session).await?;
        let urls: Vec<String> = urls
            .into_iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        self.backend.set_banner_urls(&urls).await?;
        if let Err(e) = self.local.set_banner_urls(urls.clone()).await {
            warn!("Failed to cache banners locally: {}", e);
        }
        info!("Banner list set to {} images", urls.len());
        Ok(())
    }

    /// Re-reads the local settings file, picking up edits made while running.
    pub async fn reload_local_settings(&self, session: Option<&Session>) -> Result<LocalState> {
        self.require_admin(session).await?;
        self.local.reload().await?;
        Ok(self.local.snapshot().await)
    }

    /// Banner images: configured defaults when forced, else the backend list with the local
    /// cache as fallback.
    pub async fn banner_urls(&self) -> Vec<String> {
        if self.config.use_default_banners {
            return self.config.default_banners.clone();
        }

        match self.backend.banner_urls().await {
            Ok(urls) if !urls.is_empty() => {
                if self.local.banner_urls().await != urls {
                    if let Err(e) = self.local.set_banner_urls(urls.clone()).await {
                        warn!("Failed to cache banners locally: {}", e);
                    }
                }
                urls
            }
            Ok(_) => self.config.default_banners.clone(),
            Err(e) => {
                warn!("Banner fetch failed, using cached banners: {}", e);
                let cached = self.local.banner_urls().await;
                if cached.is_empty() {
                    self.config.default_banners.clone()
                } else {
                    cached
                }
            }
        }
    }

    pub async fn scores(&self) -> Vec<ScoreRecord> {
        let candidates = self.list_candidates().await;
        score_candidates(self.backend.as_ref(), &candidates).await
    }
}
