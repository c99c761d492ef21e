//! API handlers for the clan armory REST endpoints

pub mod armory;
pub mod health;
pub mod openapi;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
};

use crate::{error::AppError, models::UserId, AppState};

/// Header carrying the caller's identity, set by the authenticating gateway
pub const USER_ID_HEADER: &str = "x-user-id";

/// Extractor for the user on whose behalf the request is made
pub struct ActingUser(pub UserId);

#[async_trait]
impl FromRequestParts<AppState> for ActingUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &AppState) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::Authentication("Missing user identity header".to_string()))?;

        let user_id = value
            .trim()
            .parse::<UserId>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| AppError::Authentication("Invalid user identity header".to_string()))?;

        Ok(ActingUser(user_id))
    }
}

/// Header carrying the shared secret of internal service callers
pub const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";

/// Fail with `Authentication` unless a token is configured and presented unchanged
pub fn check_internal_token(expected: Option<&str>, presented: Option<&str>) -> Result<(), AppError> {
    match (expected, presented) {
        (Some(expected), Some(presented)) if !expected.is_empty() && expected == presented.trim() => Ok(()),
        (None, _) | (Some(""), _) => Err(AppError::Authentication(
            "Service endpoints are disabled".to_string(),
        )),
        _ => Err(AppError::Authentication("Invalid service token".to_string())),
    }
}

/// Extractor for trusted callers of the service endpoints (catalog, scheduler)
pub struct ServiceCaller;

#[async_trait]
impl FromRequestParts<AppState> for ServiceCaller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let presented = parts
            .headers
            .get(INTERNAL_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok());

        check_internal_token(state.config.server.internal_token.as_deref(), presented)?;
        Ok(ServiceCaller)
    }
}
