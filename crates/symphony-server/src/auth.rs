//! Authenticated user extraction.
//!
//! Credentials are checked by the gateway in front of the server, which
//! forwards the user id in a trusted header. The hub only accepts upgrades
//! that carry a well-formed id.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use symphony_protocol::UserId;

use crate::handlers::AppState;
use crate::metrics;

/// The user id a request was authenticated as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser(pub UserId);

/// Why a request was not authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    /// The user id header is absent.
    Missing,
    /// The header is present but not a valid user id.
    Invalid,
}

impl AuthRejection {
    fn reason(self) -> &'static str {
        match self {
            AuthRejection::Missing => "missing",
            AuthRejection::Invalid => "invalid",
        }
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let message = match self {
            AuthRejection::Missing => "missing user id",
            AuthRejection::Invalid => "invalid user id",
        };
        (StatusCode::UNAUTHORIZED, message).into_response()
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthenticatedUser {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let result = user_from_parts(parts, &state.config.auth.user_id_header);
        if let Err(rejection) = result {
            metrics::record_auth_rejection(rejection.reason());
        }
        result.map(Self)
    }
}

fn user_from_parts(parts: &Parts, header: &str) -> Result<UserId, AuthRejection> {
    let value = parts
        .headers
        .get(header)
        .ok_or(AuthRejection::Missing)?
        .to_str()
        .map_err(|_| AuthRejection::Invalid)?;

    value.trim().parse().map_err(|_| AuthRejection::Invalid)
}
