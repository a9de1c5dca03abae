use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::Deserialize;
use warp::http::StatusCode;
use warp::reply::Response;

use super::{App, auth_error_response, error_response, json_response, vote_rejection_response};

#[derive(Debug, Deserialize)]
pub struct CastRequest {
    pub candidate_id: i64,
}

/// First hop of `X-Forwarded-For`, else the socket peer.
fn origin_ip(forwarded_for: Option<String>, remote: Option<SocketAddr>) -> Option<String> {
    forwarded_for
        .as_deref()
        .and_then(|list| list.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .or_else(|| remote.map(|addr| addr.ip().to_string()))
}

pub async fn summary(authorization: Option<String>, app: Arc<App>) -> Result<Response, Infallible> {
    let session = match app.session(authorization).await {
        Ok(session) => session,
        Err(e) => return Ok(auth_error_response(&e)),
    };
    let summary = app.voting.summary(session.as_ref()).await;
    Ok(json_response(&summary, StatusCode::OK))
}

pub async fn cast(
    authorization: Option<String>,
    forwarded_for: Option<String>,
    remote: Option<SocketAddr>,
    request: CastRequest,
    app: Arc<App>,
) -> Result<Response, Infallible> {
    let session = match app.session(authorization).await {
        Ok(session) => session,
        Err(e) => return Ok(auth_error_response(&e)),
    };
    let origin = origin_ip(forwarded_for, remote);

    match app
        .voting
        .cast_vote(session.as_ref(), request.candidate_id, origin)
        .await
    {
        Ok(outcome) => Ok(json_response(&outcome, StatusCode::CREATED)),
        Err(rejection) => Ok(vote_rejection_response(&rejection)),
    }
}

pub async fn cancel(authorization: Option<String>, app: Arc<App>) -> Result<Response, Infallible> {
    let session = match app.session(authorization).await {
        Ok(session) => session,
        Err(e) => return Ok(auth_error_response(&e)),
    };

    match app.voting.cancel_vote(session.as_ref()).await {
        Ok(outcome) => Ok(json_response(&outcome, StatusCode::OK)),
        Err(rejection) => Ok(vote_rejection_response(&rejection)),
    }
}

pub async fn scores(authorization: Option<String>, app: Arc<App>) -> Result<Response, Infallible> {
    match app.session(authorization).await {
        Ok(Some(_)) => {}
        Ok(None) => return Ok(error_response(StatusCode::UNAUTHORIZED, "Not signed in")),
        Err(e) => return Ok(auth_error_response(&e)),
    }
    let scores = app.voting.scores().await;
    Ok(json_response(&scores, StatusCode::OK))
}
