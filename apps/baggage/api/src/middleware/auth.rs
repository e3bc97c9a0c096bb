//! Bearer API-key authentication
//!
//! Keys are held as SHA-256 digests so every comparison runs over 32 bytes,
//! whatever the length of the presented key. With no keys configured every
//! well-formed request fails with `INVALID_API_KEY`.

use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};

type KeyDigest = [u8; 32];

fn digest(key: &str) -> KeyDigest {
    Sha256::digest(key.as_bytes()).into()
}

fn constant_time_eq(a: &KeyDigest, b: &KeyDigest) -> bool {
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Accepted API keys
#[derive(Clone, Default)]
pub struct ApiKeys {
    digests: Vec<KeyDigest>,
}

impl ApiKeys {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            digests: keys.into_iter().map(|k| digest(k.as_ref())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    /// Checks every configured key, without stopping at the first match
    pub fn contains(&self, candidate: &str) -> bool {
        let candidate = digest(candidate);
        self.digests
            .iter()
            .fold(false, |found, key| constant_time_eq(key, &candidate) | found)
    }

    /// Validate an `Authorization` header
    pub fn authorize(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let value = headers
            .get(header::AUTHORIZATION)
            .ok_or(ApiError::MissingApiKey)?
            .to_str()
            .map_err(|_| ApiError::InvalidAuthFormat)?;

        let mut parts = value.split(' ');
        let key = match (parts.next(), parts.next(), parts.next()) {
            (Some("Bearer"), Some(key), None) if !key.is_empty() => key,
            _ => return Err(ApiError::InvalidAuthFormat),
        };

        if self.contains(key) {
            Ok(())
        } else {
            Err(ApiError::InvalidApiKey)
        }
    }
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeys")
            .field("count", &self.digests.len())
            .finish()
    }
}

/// API-key middleware for the ingest routes
///
/// # Example
///
/// ```ignore
/// let routes = Router::new()
///     .route("/events", post(create_event))
///     .route_layer(axum::middleware::from_fn_with_state(state.clone(), require_api_key));
/// ```
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    state.api_keys.authorize(request.headers())?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(authorization: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(authorization).unwrap(),
        );
        headers
    }

    #[test]
    fn test_no_keys_rejects_everything() {
        let keys = ApiKeys::default();
        assert!(keys.is_empty());
        assert!(matches!(
            keys.authorize(&HeaderMap::new()),
            Err(ApiError::MissingApiKey)
        ));
        assert!(matches!(
            keys.authorize(&headers("Bearer anything")),
            Err(ApiError::InvalidApiKey)
        ));
    }

    #[test]
    fn test_missing_header() {
        let keys = ApiKeys::new(["secret"]);
        assert!(matches!(
            keys.authorize(&HeaderMap::new()),
            Err(ApiError::MissingApiKey)
        ));
    }

    #[test]
    fn test_wrong_scheme_or_shape() {
        let keys = ApiKeys::new(["secret"]);
        for value in ["Basic secret", "secret", "Bearer", "Bearer a b", "bearer secret"] {
            assert!(
                matches!(keys.authorize(&headers(value)), Err(ApiError::InvalidAuthFormat)),
                "{value}"
            );
        }
    }

    #[test]
    fn test_unknown_key() {
        let keys = ApiKeys::new(["secret"]);
        assert!(matches!(
            keys.authorize(&headers("Bearer secre")),
            Err(ApiError::InvalidApiKey)
        ));
    }

    #[test]
    fn test_any_configured_key_is_accepted() {
        let keys = ApiKeys::new(["first", "second"]);
        assert_eq!(keys.len(), 2);
        assert!(keys.authorize(&headers("Bearer first")).is_ok());
        assert!(keys.authorize(&headers("Bearer second")).is_ok());
        assert!(!keys.contains("third"));
    }

    #[test]
    fn test_debug_hides_keys() {
        let keys = ApiKeys::new(["secret"]);
        assert_eq!(format!("{keys:?}"), "ApiKeys { count: 1 }");
    }
}
