//! Custom extractors.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

/// Header carrying the caller's identity.
pub const USER_ID_HEADER: &str = "X-User-ID";

/// The caller identity propagated into every request message's `userID`.
///
/// Taken from the `X-User-ID` header; `anonymous` when absent. The gateway
/// does no authorization beyond carrying this value to the services.
#[derive(Debug, Clone)]
pub struct CallerId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let caller = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .unwrap_or("anonymous");

        Ok(Self(caller.to_owned()))
    }
}
