use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tokio::sync::broadcast;

use crate::backend::{CHANGE_FEED_CAPACITY, VotingBackend};
use crate::error::{Error, Result};
use crate::models::{
    Candidate, CandidateUpdate, ChangeEvent, ChangeKind, NewCandidate, NewVote, Profile, Table,
    Vote,
};

const VOTING_ENDED_KEY: &str = "voting_ended";
const BANNER_URLS_KEY: &str = "banner_urls";

pub struct Database {
    pool: SqlitePool,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Database {
    pub async fn connect(db_url: &str, max_connections: u32) -> Result<Self> {
        // Create the database file if it doesn't exist
        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Self::init_schema(&pool).await?;
        info!("Connected to {}", db_url);

        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Ok(Self { pool, changes })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS candidates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                genre TEXT NOT NULL,
                image_url TEXT,
                video_url TEXT,
                social_handle TEXT,
                bio TEXT,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS profiles (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL,
                is_admin BOOLEAN NOT NULL DEFAULT FALSE,
                has_voted BOOLEAN NOT NULL DEFAULT FALSE
            );
            "#,
        )
        .execute(pool)
        .await?;

        // One vote per voter. The voting layer checks this first; the index is the last word.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS votes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                voter_id TEXT NOT NULL UNIQUE,
                candidate_id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                transaction_id TEXT NOT NULL,
                ip_address TEXT,
                FOREIGN KEY (candidate_id) REFERENCES candidates(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    fn notify(&self, table: Table, kind: ChangeKind) {
        // No subscribers is not an error.
        if self.changes.send(ChangeEvent::new(table, kind)).is_err() {
            debug!("No change feed subscribers for {:?} {:?}", table, kind);
        }
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => Some(row.try_get::<String, _>("value")?),
            None => None,
        })
    }

    async fn put_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn candidate_from_row(row: &SqliteRow) -> Result<Candidate> {
    Ok(Candidate {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        genre: row.try_get("genre")?,
        image_url: row.try_get("image_url")?,
        video_url: row.try_get("video_url")?,
        social_handle: row.try_get("social_handle")?,
        bio: row.try_get("bio")?,
        created_at: parse_timestamp(row, "created_at")?,
    })
}

fn vote_from_row(row: &SqliteRow) -> Result<Vote> {
    Ok(Vote {
        id: row.try_get("id")?,
        voter_id: row.try_get("voter_id")?,
        candidate_id: row.try_get("candidate_id")?,
        created_at: parse_timestamp(row, "created_at")?,
        transaction_id: row.try_get("transaction_id")?,
        ip_address: row.try_get("ip_address")?,
    })
}

fn profile_from_row(row: &SqliteRow) -> Result<Profile> {
    Ok(Profile {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        is_admin: row.try_get("is_admin")?,
        has_voted: row.try_get("has_voted")?,
    })
}

fn parse_timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let raw = row.try_get::<String, _>(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Malformed(format!("Failed to parse {}: {}", column, e)))
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

#[async_trait]
impl VotingBackend for Database {
    async fn list_candidates(&self) -> Result<Vec<Candidate>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, genre, image_url, video_url, social_handle, bio, created_at
            FROM candidates
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(candidate_from_row).collect()
    }

    async fn get_candidate(&self, id: i64) -> Result<Option<Candidate>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, genre, image_url, video_url, social_handle, bio, created_at
            FROM candidates
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(candidate_from_row).transpose()
    }

    async fn insert_candidate(&self, candidate: &NewCandidate) -> Result<Candidate> {
        let created_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO candidates (name, genre, image_url, video_url, social_handle, bio, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&candidate.name)
        .bind(&candidate.genre)
        .bind(&candidate.image_url)
        .bind(&candidate.video_url)
        .bind(&candidate.social_handle)
        .bind(&candidate.bio)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.notify(Table::Candidates, ChangeKind::Insert);

        Ok(Candidate {
            id: result.last_insert_rowid(),
            name: candidate.name.clone(),
            genre: candidate.genre.clone(),
            image_url: candidate.image_url.clone(),
            video_url: candidate.video_url.clone(),
            social_handle: candidate.social_handle.clone(),
            bio: candidate.bio.clone(),
            created_at,
        })
    }

    async fn update_candidate(&self, id: i64, update: CandidateUpdate) -> Result<Option<Candidate>> {
        let Some(mut candidate) = self.get_candidate(id).await? else {
            return Ok(None);
        };
        update.apply(&mut candidate);

        sqlx::query(
            r#"
            UPDATE candidates
            SET name = ?, genre = ?, image_url = ?, video_url = ?, social_handle = ?, bio = ?
            WHERE id = ?
            "#,
        )
        .bind(&candidate.name)
        .bind(&candidate.genre)
        .bind(&candidate.image_url)
        .bind(&candidate.video_url)
        .bind(&candidate.social_handle)
        .bind(&candidate.bio)
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.notify(Table::Candidates, ChangeKind::Update);
        Ok(Some(candidate))
    }

    async fn delete_candidate(&self, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let dropped_votes = sqlx::query("DELETE FROM votes WHERE candidate_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let removed = sqlx::query("DELETE FROM candidates WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        if removed == 0 {
            return Ok(false);
        }
        self.notify(Table::Candidates, ChangeKind::Delete);
        if dropped_votes > 0 {
            self.notify(Table::Votes, ChangeKind::Delete);
        }
        Ok(true)
    }

    async fn fetch_votes_page(&self, offset: usize, limit: usize) -> Result<Vec<Vote>> {
        let rows = sqlx::query(
            r#"
            SELECT id, voter_id, candidate_id, created_at, transaction_id, ip_address
            FROM votes
            ORDER BY id
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(vote_from_row).collect()
    }

    async fn find_vote_by_voter(&self, voter_id: &str) -> Result<Option<Vote>> {
        let row = sqlx::query(
            r#"
            SELECT id, voter_id, candidate_id, created_at, transaction_id, ip_address
            FROM votes
            WHERE voter_id = ?
            "#,
        )
        .bind(voter_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(vote_from_row).transpose()
    }

    async fn insert_vote(&self, vote: &NewVote) -> Result<Vote> {
        let result = sqlx::query(
            r#"
            INSERT INTO votes (voter_id, candidate_id, created_at, transaction_id, ip_address)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&vote.voter_id)
        .bind(vote.candidate_id)
        .bind(vote.created_at.to_rfc3339())
        .bind(&vote.transaction_id)
        .bind(&vote.ip_address)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::Conflict(format!("voter {} already has a vote", vote.voter_id))
            } else if is_foreign_key_violation(&e) {
                Error::UnknownReference(format!("candidate {}", vote.candidate_id))
            } else {
                Error::Database(e)
            }
        })?;

        self.notify(Table::Votes, ChangeKind::Insert);

        Ok(Vote {
            id: result.last_insert_rowid(),
            voter_id: vote.voter_id.clone(),
            candidate_id: vote.candidate_id,
            created_at: vote.created_at,
            transaction_id: vote.transaction_id.clone(),
            ip_address: vote.ip_address.clone(),
        })
    }

    async fn delete_vote_by_voter(&self, voter_id: &str) -> Result<u64> {
        let removed = sqlx::query("DELETE FROM votes WHERE voter_id = ?")
            .bind(voter_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if removed > 0 {
            self.notify(Table::Votes, ChangeKind::Delete);
        }
        Ok(removed)
    }

    async fn voter_emails(&self, candidate_id: i64) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT p.email
            FROM votes v
            JOIN profiles p ON p.id = v.voter_id
            WHERE v.candidate_id = ?
            "#,
        )
        .bind(candidate_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("email").map_err(Error::from))
            .collect()
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        let row = sqlx::query("SELECT id, email, is_admin, has_voted FROM profiles WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(profile_from_row).transpose()
    }

    async fn ensure_profile(&self, user_id: &str, email: &str) -> Result<Profile> {
        sqlx::query(
            r#"
            INSERT INTO profiles (id, email) VALUES (?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(email)
        .execute(&self.pool)
        .await?;

        self.get_profile(user_id)
            .await?
            .ok_or_else(|| Error::Malformed(format!("profile {} vanished after insert", user_id)))
    }

    async fn set_has_voted(&self, user_id: &str, has_voted: bool) -> Result<()> {
        let updated = sqlx::query("UPDATE profiles SET has_voted = ? WHERE id = ?")
            .bind(has_voted)
            .bind(user_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if updated == 0 {
            return Err(Error::Backend(format!("no profile for {}", user_id)));
        }
        Ok(())
    }

    async fn voting_ended(&self) -> Result<bool> {
        Ok(self.get_setting(VOTING_ENDED_KEY).await?.as_deref() == Some("true"))
    }

    async fn set_voting_ended(&self, ended: bool) -> Result<()> {
        self.put_setting(VOTING_ENDED_KEY, if ended { "true" } else { "false" })
            .await
    }

    async fn banner_urls(&self) -> Result<Vec<String>> {
        match self.get_setting(BANNER_URLS_KEY).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    async fn set_banner_urls(&self, urls: &[String]) -> Result<()> {
        let encoded = serde_json::to_string(urls)?;
        self.put_setting(BANNER_URLS_KEY, &encoded).await
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn database() -> Database {
        Database::connect("sqlite::memory:", 1).await.unwrap()
    }

    fn new_candidate(name: &str) -> NewCandidate {
        NewCandidate {
            name: name.to_string(),
            genre: "Drum & Bass".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_candidate_crud() {
        let db = database().await;
        let created = db.insert_candidate(&new_candidate("DJ Nova")).await.unwrap();

        let fetched = db.get_candidate(created.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "DJ Nova");

        let updated = db
            .update_candidate(
                created.id,
                CandidateUpdate {
                    social_handle: Some("@nova".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.social_handle.as_deref(), Some("@nova"));
        assert_eq!(updated.genre, "Drum & Bass");

        assert!(db.delete_candidate(created.id).await.unwrap());
        assert!(!db.delete_candidate(created.id).await.unwrap());
        assert!(db.list_candidates().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_vote_pages_are_ordered_and_bounded() {
        let db = database().await;
        let c = db.insert_candidate(&new_candidate("DJ Nova")).await.unwrap();
        for i in 0..5 {
            db.insert_vote(&NewVote::new(format!("voter-{}", i), c.id, None))
                .await
                .unwrap();
        }

        let first = db.fetch_votes_page(0, 2).await.unwrap();
        let last = db.fetch_votes_page(4, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].voter_id, "voter-0");
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].voter_id, "voter-4");
    }

    #[tokio::test]
    async fn test_second_vote_for_same_voter_conflicts() {
        let db = database().await;
        let c = db.insert_candidate(&new_candidate("DJ Nova")).await.unwrap();
        db.insert_vote(&NewVote::new("voter-1".to_string(), c.id, None))
            .await
            .unwrap();

        let err = db
            .insert_vote(&NewVote::new("voter-1".to_string(), c.id, None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_vote_for_missing_candidate_is_unknown_reference() {
        let db = database().await;
        let err = db
            .insert_vote(&NewVote::new("voter-1".to_string(), 404, None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownReference(_)));
        assert!(db.fetch_votes_page(0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deleting_candidate_drops_its_votes() {
        let db = database().await;
        let a = db.insert_candidate(&new_candidate("A")).await.unwrap();
        let b = db.insert_candidate(&new_candidate("B")).await.unwrap();
        db.insert_vote(&NewVote::new("v1".to_string(), a.id, None)).await.unwrap();
        db.insert_vote(&NewVote::new("v2".to_string(), b.id, None)).await.unwrap();

        db.delete_candidate(a.id).await.unwrap();

        let votes = db.fetch_votes_page(0, 10).await.unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].candidate_id, b.id);
    }

    #[tokio::test]
    async fn test_voter_emails_join_profiles() {
        let db = database().await;
        let c = db.insert_candidate(&new_candidate("DJ Nova")).await.unwrap();
        db.ensure_profile("v1", "a@gmail.com").await.unwrap();
        db.ensure_profile("v2", "b@yahoo.com").await.unwrap();
        db.insert_vote(&NewVote::new("v1".to_string(), c.id, None)).await.unwrap();
        db.insert_vote(&NewVote::new("v2".to_string(), c.id, None)).await.unwrap();

        let mut emails = db.voter_emails(c.id).await.unwrap();
        emails.sort();
        assert_eq!(emails, vec!["a@gmail.com", "b@yahoo.com"]);
    }

    #[tokio::test]
    async fn test_profile_flags() {
        let db = database().await;
        let profile = db.ensure_profile("v1", "a@gmail.com").await.unwrap();
        assert!(!profile.has_voted);
        assert!(!profile.is_admin);

        db.set_has_voted("v1", true).await.unwrap();
        // A second ensure must not reset the flag.
        let again = db.ensure_profile("v1", "a@gmail.com").await.unwrap();
        assert!(again.has_voted);

        assert!(db.set_has_voted("missing", true).await.is_err());
    }

    #[tokio::test]
    async fn test_settings_round_trip() {
        let db = database().await;
        assert!(!db.voting_ended().await.unwrap());
        assert!(db.banner_urls().await.unwrap().is_empty());

        db.set_voting_ended(true).await.unwrap();
        db.set_banner_urls(&["https://cdn.example/b1.png".to_string()])
            .await
            .unwrap();

        assert!(db.voting_ended().await.unwrap());
        assert_eq!(db.banner_urls().await.unwrap(), vec!["https://cdn.example/b1.png"]);
    }

    #[tokio::test]
    async fn test_writes_publish_change_events() {
        let db = database().await;
        let mut rx = db.subscribe();

        let c = db.insert_candidate(&new_candidate("DJ Nova")).await.unwrap();
        db.insert_vote(&NewVote::new("v1".to_string(), c.id, None)).await.unwrap();
        db.delete_vote_by_voter("v1").await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), ChangeEvent::new(Table::Candidates, ChangeKind::Insert));
        assert_eq!(rx.recv().await.unwrap(), ChangeEvent::new(Table::Votes, ChangeKind::Insert));
        assert_eq!(rx.recv().await.unwrap(), ChangeEvent::new(Table::Votes, ChangeKind::Delete));
    }
}
