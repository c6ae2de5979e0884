use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::warn;

use crate::auth::repo_types::User;
use crate::error::AppError;
use crate::state::AppState;

/// JSON body whose rejections render as 400 `{"detail": ...}`.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// Resolves the request's token to its user.
pub struct AuthUser {
    pub user: User,
    pub token: String,
}

/// Pull the key out of `Token <key>` or `Bearer <key>`.
pub(crate) fn parse_authorization(value: &str) -> Option<&str> {
    let (scheme, key) = value.trim().split_once(' ')?;
    let key = key.trim();
    let known = scheme.eq_ignore_ascii_case("token") || scheme.eq_ignore_ascii_case("bearer");
    if !known || key.is_empty() || key.contains(' ') {
        return None;
    }
    Some(key)
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(AppError::NotAuthenticated)?;

        let key = header
            .to_str()
            .ok()
            .and_then(parse_authorization)
            .ok_or(AppError::InvalidToken)?;

        let Some(user) = state.store.find_user_by_token(key).await? else {
            warn!("unknown or revoked token");
            return Err(AppError::InvalidToken);
        };

        Ok(AuthUser {
            user,
            token: key.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_token_and_bearer_schemes() {
        assert_eq!(parse_authorization("Token abc123"), Some("abc123"));
        assert_eq!(parse_authorization("Bearer abc123"), Some("abc123"));
        assert_eq!(parse_authorization("bearer  abc123 "), Some("abc123"));
    }

    #[test]
    fn rejects_malformed_headers() {
        assert_eq!(parse_authorization("abc123"), None);
        assert_eq!(parse_authorization("Basic abc123"), None);
        assert_eq!(parse_authorization("Token "), None);
        assert_eq!(parse_authorization("Token a b"), None);
    }
}
