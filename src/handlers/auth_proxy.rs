use std::convert::Infallible;
use std::sync::Arc;

use log::error;
use warp::http::{StatusCode, header};
use warp::hyper::Body;
use warp::reply::Response;

use super::{App, error_response};
use crate::auth::Credentials;

/// POST /api/auth/token: password grant, answered with the auth service's own status and body.
pub async fn token(credentials: Credentials, app: Arc<App>) -> Result<Response, Infallible> {
    let forwarded = match app.platform.forward_password_grant(&credentials).await {
        Ok(forwarded) => forwarded,
        Err(e) => {
            error!("Token request for {} failed: {}", credentials.email, e);
            return Ok(error_response(StatusCode::BAD_GATEWAY, "Auth service unreachable"));
        }
    };

    let status = StatusCode::from_u16(forwarded.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = Response::new(Body::from(forwarded.body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    Ok(response)
}
