mod auth_proxy;
mod candidates;
mod vote;

use std::convert::Infallible;
use std::sync::Arc;

use log::{error, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use crate::auth::{Authenticator, PlatformAuth};
use crate::error::{AuthError, CandidateError, VoteRejection};
use crate::models::Session;
use crate::voting::VotingState;

const MAX_BODY_BYTES: u64 = 16 * 1024;

/// Shared state behind every route.
pub struct App {
    pub voting: Arc<VotingState>,
    pub auth: Arc<dyn Authenticator>,
    pub platform: PlatformAuth,
}

impl App {
    /// Resolves the `Authorization: Bearer` header. A missing or rejected token is simply no
    /// session; only an unreachable auth service is an error.
    async fn session(&self, authorization: Option<String>) -> Result<Option<Session>, AuthError> {
        let Some(token) = authorization
            .as_deref()
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
        else {
            return Ok(None);
        };

        match self.auth.resolve(token).await {
            Ok(session) => {
                // Profiles mirror auth identities; create on first sight.
                if let Err(e) = self
                    .voting
                    .backend()
                    .ensure_profile(&session.user_id, &session.email)
                    .await
                {
                    warn!("Could not ensure profile for {}: {}", session.user_id, e);
                }
                Ok(Some(session))
            }
            Err(AuthError::InvalidToken) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

fn json_response<T: Serialize>(body: &T, status: StatusCode) -> Response {
    warp::reply::with_status(warp::reply::json(body), status).into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    json_response(&ErrorBody { error: message }, status)
}

fn auth_error_response(e: &AuthError) -> Response {
    error!("Session lookup failed: {}", e);
    error_response(StatusCode::SERVICE_UNAVAILABLE, &e.to_string())
}

fn vote_rejection_response(rejection: &VoteRejection) -> Response {
    let status = match rejection {
        VoteRejection::NotAuthenticated => StatusCode::UNAUTHORIZED,
        VoteRejection::VotingClosed => StatusCode::FORBIDDEN,
        VoteRejection::AlreadyVoted | VoteRejection::NoVote => StatusCode::CONFLICT,
        VoteRejection::InvalidCandidate(_) => StatusCode::BAD_REQUEST,
        VoteRejection::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, &rejection.to_string())
}

fn candidate_error_response(e: &CandidateError) -> Response {
    let status = match e {
        CandidateError::NotAuthenticated => StatusCode::UNAUTHORIZED,
        CandidateError::NotAdmin => StatusCode::FORBIDDEN,
        CandidateError::MissingField(_) => StatusCode::BAD_REQUEST,
        CandidateError::NotFound(_) => StatusCode::NOT_FOUND,
        CandidateError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, &e.to_string())
}

fn json_body<T: DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

pub fn routes(app: Arc<App>) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let with_app = warp::any().map(move || app.clone());
    let authorization = warp::header::optional::<String>("authorization");

    let token = warp::path!("api" / "auth" / "token")
        .and(warp::post())
        .and(json_body())
        .and(with_app.clone())
        .and_then(auth_proxy::token);

    let list_candidates = warp::path!("api" / "candidates")
        .and(warp::get())
        .and(authorization.clone())
        .and(with_app.clone())
        .and_then(candidates::list);

    let create_candidate = warp::path!("api" / "candidates")
        .and(warp::post())
        .and(authorization.clone())
        .and(json_body())
        .and(with_app.clone())
        .and_then(candidates::create);

    let update_candidate = warp::path!("api" / "candidates" / i64)
        .and(warp::put())
        .and(authorization.clone())
        .and(json_body())
        .and(with_app.clone())
        .and_then(candidates::update);

    let delete_candidate = warp::path!("api" / "candidates" / i64)
        .and(warp::delete())
        .and(authorization.clone())
        .and(with_app.clone())
        .and_then(candidates::delete);

    let summary = warp::path!("api" / "votes")
        .and(warp::get())
        .and(authorization.clone())
        .and(with_app.clone())
        .and_then(vote::summary);

    let cast = warp::path!("api" / "votes")
        .and(warp::post())
        .and(authorization.clone())
        .and(warp::header::optional::<String>("x-forwarded-for"))
        .and(warp::addr::remote())
        .and(json_body())
        .and(with_app.clone())
        .and_then(vote::cast);

    let cancel = warp::path!("api" / "votes")
        .and(warp::delete())
        .and(authorization.clone())
        .and(with_app.clone())
        .and_then(vote::cancel);

    let scores = warp::path!("api" / "scores")
        .and(warp::get())
        .and(authorization.clone())
        .and(with_app.clone())
        .and_then(vote::scores);

    let banners = warp::path!("api" / "banners")
        .and(warp::get())
        .and(with_app.clone())
        .and_then(candidates::banners);

    let set_banners = warp::path!("api" / "settings" / "banners")
        .and(warp::put())
        .and(authorization.clone())
        .and(json_body())
        .and(with_app.clone())
        .and_then(candidates::set_banners);

    let reload_settings = warp::path!("api" / "settings" / "reload")
        .and(warp::post())
        .and(authorization.clone())
        .and(with_app.clone())
        .and_then(candidates::reload_settings);

    let voting_ended = warp::path!("api" / "settings" / "voting-ended")
        .and(warp::put())
        .and(authorization)
        .and(json_body())
        .and(with_app)
        .and_then(candidates::set_voting_ended);

    token
        .or(list_candidates)
        .or(create_candidate)
        .or(update_candidate)
        .or(delete_candidate)
        .or(summary)
        .or(cast)
        .or(cancel)
        .or(scores)
        .or(banners)
        .or(set_banners)
        .or(reload_settings)
        .or(voting_ended)
        .recover(handle_rejection)
        .with(warp::log("dj_vote::api"))
}

async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found")
    } else if err.find::<warp::filters::body::BodyDeserializeError>().is_some() {
        (StatusCode::BAD_REQUEST, "Malformed payload")
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Payload too large")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    } else {
        error!("Unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
    };
    Ok(error_response(status, message))
}
