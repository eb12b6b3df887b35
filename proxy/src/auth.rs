//! Where a caller's API key comes from, and removing it before forwarding.

use http::HeaderMap;
use http::header::{AUTHORIZATION, HeaderName};

pub const X_API_KEY: HeaderName = HeaderName::from_static("x-api-key");

const BEARER_PREFIX: &str = "Bearer ";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeySource {
    Query,
    Header,
    Bearer,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresentedKey {
    pub value: String,
    pub source: KeySource,
}

/// Looks for the key in the `api_key` query parameter, then `X-API-Key`, then
/// an `Authorization: Bearer` header.
pub fn extract_api_key(query_key: Option<&str>, headers: &HeaderMap) -> Option<PresentedKey> {
    if let Some(value) = query_key.filter(|k| !k.is_empty()) {
        return Some(PresentedKey {
            value: value.to_string(),
            source: KeySource::Query,
        });
    }

    if let Some(value) = headers
        .get(X_API_KEY)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return Some(PresentedKey {
            value: value.to_string(),
            source: KeySource::Header,
        });
    }

    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix(BEARER_PREFIX))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|value| PresentedKey {
            value: value.to_string(),
            source: KeySource::Bearer,
        })
}

/// Drops the header that carried the proxy's own key. Any other credential
/// header belongs to the upstream and is left alone.
pub fn strip_credentials(headers: &mut HeaderMap, presented: Option<&PresentedKey>) {
    match presented.map(|key| key.source) {
        Some(KeySource::Header) => {
            headers.remove(X_API_KEY);
        }
        Some(KeySource::Bearer) => {
            headers.remove(AUTHORIZATION);
        }
        Some(KeySource::Query) | None => {}
    }
}
