use std::convert::Infallible;
use std::sync::Arc;

use serde::Deserialize;
use warp::http::StatusCode;
use warp::Reply;
use warp::reply::Response;

use super::{App, auth_error_response, candidate_error_response, json_response};
use crate::error::CandidateError;
use crate::models::{CandidateUpdate, NewCandidate};

#[derive(Debug, Deserialize)]
pub struct VotingEndedRequest {
    pub ended: bool,
}

macro_rules! session_or_reply {
    ($app:expr, $authorization:expr) => {
        match $app.session($authorization).await {
            Ok(session) => session,
            Err(e) => return Ok(auth_error_response(&e)),
        }
    };
}

pub async fn list(authorization: Option<String>, app: Arc<App>) -> Result<Response, Infallible> {
    if session_or_reply!(app, authorization).is_none() {
        return Ok(candidate_error_response(&CandidateError::NotAuthenticated));
    }
    let candidates = app.voting.list_candidates().await;
    Ok(json_response(&candidates, StatusCode::OK))
}

pub async fn create(
    authorization: Option<String>,
    candidate: NewCandidate,
    app: Arc<App>,
) -> Result<Response, Infallible> {
    let session = session_or_reply!(app, authorization);
    match app.voting.create_candidate(session.as_ref(), candidate).await {
        Ok(created) => Ok(json_response(&created, StatusCode::CREATED)),
        Err(e) => Ok(candidate_error_response(&e)),
    }
}

pub async fn update(
    id: i64,
    authorization: Option<String>,
    update: CandidateUpdate,
    app: Arc<App>,
) -> Result<Response, Infallible> {
    let session = session_or_reply!(app, authorization);
    match app.voting.update_candidate(session.as_ref(), id, update).await {
        Ok(updated) => Ok(json_response(&updated, StatusCode::OK)),
        Err(e) => Ok(candidate_error_response(&e)),
    }
}

pub async fn delete(id: i64, authorization: Option<String>, app: Arc<App>) -> Result<Response, Infallible> {
    let session = session_or_reply!(app, authorization);
    match app.voting.delete_candidate(session.as_ref(), id).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(e) => Ok(candidate_error_response(&e)),
    }
}

pub async fn banners(app: Arc<App>) -> Result<Response, Infallible> {
    let urls = app.voting.banner_urls().await;
    Ok(json_response(&urls, StatusCode::OK))
}

pub async fn set_banners(
    authorization: Option<String>,
    urls: Vec<String>,
    app: Arc<App>,
) -> Result<Response, Infallible> {
    let session = session_or_reply!(app, authorization);
    match app.voting.set_banner_urls(session.as_ref(), urls).await {
        Ok(()) => Ok(json_response(&app.voting.banner_urls().await, StatusCode::OK)),
        Err(e) => Ok(candidate_error_response(&e)),
    }
}

pub async fn reload_settings(authorization: Option<String>, app: Arc<App>) -> Result<Response, Infallible> {
    let session = session_or_reply!(app, authorization);
    match app.voting.reload_local_settings(session.as_ref()).await {
        Ok(state) => Ok(json_response(&state, StatusCode::OK)),
        Err(e) => Ok(candidate_error_response(&e)),
    }
}

pub async fn set_voting_ended(
    authorization: Option<String>,
    request: VotingEndedRequest,
    app: Arc<App>,
) -> Result<Response, Infallible> {
    let session = session_or_reply!(app, authorization);
    match app.voting.set_voting_ended(session.as_ref(), request.ended).await {
        Ok(()) => Ok(json_response(
            &serde_json::json!({ "voting_ended": request.ended }),
            StatusCode::OK,
        )),
        Err(e) => Ok(candidate_error_response(&e)),
    }
}
