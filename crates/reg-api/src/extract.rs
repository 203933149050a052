//! # Actor Extraction
//!
//! Caller identity from headers set by the authenticating proxy in front
//! of the API:
//!
//! ```text
//! X-User-Id:    user-42            (required)
//! X-User-Email: ana@example.com    (required)
//! X-User-Name:  Ana Souza
//! X-User-Role:  admin              (privileged)
//! ```

use crate::handlers::ErrorResponse;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
    Json,
};
use reg_core::ActorContext;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const USER_NAME_HEADER: &str = "x-user-name";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Role value granting administrator rights
pub const ADMIN_ROLE: &str = "admin";

/// Authenticated caller
#[derive(Debug, Clone)]
pub struct Actor(pub ActorContext);

impl<S: Send + Sync> FromRequestParts<S> for Actor {
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        actor_from_headers(&parts.headers).map(Actor).ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new(
                    "missing X-User-Id or X-User-Email header",
                    401,
                )),
            )
        })
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

pub fn actor_from_headers(headers: &HeaderMap) -> Option<ActorContext> {
    let user_id = header(headers, USER_ID_HEADER)?;
    let email = header(headers, USER_EMAIL_HEADER)?;

    let mut actor = if header(headers, USER_ROLE_HEADER)
        .is_some_and(|role| role.eq_ignore_ascii_case(ADMIN_ROLE))
    {
        ActorContext::privileged(user_id, email)
    } else {
        ActorContext::user(user_id, email)
    };

    if let Some(name) = header(headers, USER_NAME_HEADER) {
        actor = actor.with_name(name);
    }
    Some(actor)
}
