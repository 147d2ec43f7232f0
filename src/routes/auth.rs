use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use crate::app_state::AppState;
use crate::routes::error::ApiError;

/// Check `Authorization: Bearer <token>` against the configured token.
/// Every request passes when no token is configured.
pub fn bearer_token_valid(headers: &HeaderMap, expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return true;
    };

    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split_once(' '))
        .is_some_and(|(scheme, token)| scheme == "Bearer" && !token.is_empty() && token == expected)
}

/// Middleware guarding routes that require the API token.
pub async fn require_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !bearer_token_valid(request.headers(), state.config.api_token.as_deref()) {
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(request).await)
}
