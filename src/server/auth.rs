//! Caller identity
//!
//! Authentication happens upstream at the identity gateway, which forwards
//! the user id in a trusted header (`auth.user_header`).

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::error::ApiError;
use super::state::AppState;
use crate::types::{GuanxinError, UserId};

/// Required caller identity; rejects with 401 when the header is missing
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub UserId);

/// Optional caller identity
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<UserId>);

fn user_from_parts(parts: &Parts, state: &AppState) -> Option<UserId> {
    parts
        .headers
        .get(&state.user_header)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(UserId::new)
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        user_from_parts(parts, state)
            .map(Self)
            .ok_or(ApiError(GuanxinError::Unauthorized))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(Self(user_from_parts(parts, state)))
    }
}
