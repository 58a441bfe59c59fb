// region:    --- Imports
use crate::error::ApiError;
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

// endregion: --- Imports

// region:    --- Auth User

/// Caller identity resolved upstream (gateway / auth layer) and passed in
/// the `x-user-id` header. This service only needs the resolved user id;
/// token validation itself happens before requests reach us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub i64);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
            .map(AuthUser)
            .ok_or(ApiError::Unauthorized)
    }
}

// endregion: --- Auth User
