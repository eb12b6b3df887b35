use crate::conflict::Conflict;
use crate::model::{CollectionId, EndpointId};
use thiserror::Error;

/// Field-level problems with a rule, key or chaos profile.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("min latency ({min}ms) cannot be greater than max latency ({max}ms)")]
    InvalidLatencyRange { min: u64, max: u64 },

    #[error("fail rate must be between 0 and 100 percent, got {0}")]
    InvalidFailRatePercent(u8),

    #[error("fail rate must be a fraction between 0 and 1, got {0}")]
    InvalidFailRateFraction(f64),

    #[error("error code {0} is outside 100..=599")]
    InvalidErrorCode(u16),

    #[error("key cannot be empty")]
    EmptyKey,
}

#[derive(Error, Debug)]
pub enum PatternError {
    #[error("URL pattern cannot be empty")]
    Empty,

    #[error("URL pattern does not compile: {0}")]
    Invalid(#[from] regex::Error),
}

/// Errors raised by the rule write path.
#[derive(Error, Debug)]
pub enum RuleError {
    #[error("collection {0} not found")]
    CollectionNotFound(CollectionId),

    #[error("endpoint {0} not found")]
    EndpointNotFound(EndpointId),

    #[error("duplicate collection id {0}")]
    DuplicateCollection(CollectionId),

    #[error("duplicate endpoint id {0}")]
    DuplicateEndpoint(EndpointId),

    #[error("endpoint id {0} is out of range, ids run from 1 to {max}", max = u64::MAX - 1)]
    EndpointIdOutOfRange(EndpointId),

    #[error("endpoint {endpoint_id} belongs to collection {actual}, not {expected}")]
    CollectionMismatch {
        endpoint_id: EndpointId,
        expected: CollectionId,
        actual: CollectionId,
    },

    #[error("invalid endpoint: {0}")]
    Invalid(#[from] ValidationError),

    #[error("invalid endpoint: {0}")]
    Pattern(#[from] PatternError),

    /// Another active endpoint in the collection matches the same URLs with
    /// the same specificity.
    #[error(
        "pattern {pattern:?} matches the same URLs as {} active endpoint(s) with equal specificity",
        .conflicts.len()
    )]
    Conflict {
        pattern: String,
        conflicts: Vec<Conflict>,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("collection {0} not found")]
    CollectionNotFound(CollectionId),

    #[error("collection {0} is inactive")]
    CollectionInactive(CollectionId),

    #[error("no active endpoint in collection {collection_id} matches {method} {url}")]
    NoMatch {
        collection_id: CollectionId,
        method: String,
        url: String,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("API key is required")]
    MissingKey,

    #[error("invalid API key")]
    InvalidKey,

    #[error("API key is inactive")]
    InactiveKey,

    #[error("API key does not grant access to collection {0}")]
    OutOfScope(CollectionId),
}

/// Problems with the key material loaded into a [`crate::keys::KeyStore`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KeyError {
    #[error("duplicate API key id {0}")]
    DuplicateId(u64),

    #[error("API key value of key {0} is already in use")]
    DuplicateKey(u64),

    #[error("key {id} is invalid: {source}")]
    Invalid { id: u64, source: ValidationError },
}
