use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed record: {0}")]
    Malformed(String),

    #[error("Conflicting record: {0}")]
    Conflict(String),

    #[error("Unknown reference: {0}")]
    UnknownReference(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Why a cast or cancel was refused.
#[derive(Error, Debug)]
pub enum VoteRejection {
    #[error("You must be signed in to vote")]
    NotAuthenticated,

    #[error("Voting has ended")]
    VotingClosed,

    #[error("You have already voted")]
    AlreadyVoted,

    #[error("Candidate {0} does not exist")]
    InvalidCandidate(i64),

    #[error("You have not voted yet")]
    NoVote,

    #[error(transparent)]
    Backend(#[from] Error),
}

#[derive(Error, Debug)]
pub enum CandidateError {
    #[error("You must be signed in")]
    NotAuthenticated,

    #[error("Administrator access required")]
    NotAdmin,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Candidate {0} not found")]
    NotFound(i64),

    #[error(transparent)]
    Backend(#[from] Error),
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid or expired session")]
    InvalidToken,

    #[error("Authentication service unavailable: {0}")]
    Unavailable(String),
}
