// Caller identity extraction
//
// Authentication happens upstream; the proxy layer verifies the token and
// installs the opaque owner id in X-Owner-Id. The raw Authorization value
// rides along untouched as the caller's original token.

use axum::extract::FromRequestParts;
use axum::http::{request::Parts, StatusCode};

use scribe_core::Caller;

/// Header carrying the verified opaque owner id
pub const OWNER_HEADER: &str = "x-owner-id";

/// Extractor wrapping the opaque caller identity.
pub struct CallerIdentity(pub Caller);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CallerIdentity {
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let owner_id = parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or(StatusCode::UNAUTHORIZED)?
            .to_string();

        let mut caller = Caller::new(owner_id);
        if let Some(token) = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
        {
            caller = caller.with_token(token);
        }

        Ok(CallerIdentity(caller))
    }
}
