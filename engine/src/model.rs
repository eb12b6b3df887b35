use crate::errors::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use url::Url;

pub type CollectionId = u64;
pub type EndpointId = u64;
pub type ApiKeyId = u64;
pub type ConfigKeyId = u64;

/// Highest fail rate an endpoint or config key can carry, in percent.
pub const MAX_FAIL_RATE_PERCENT: u8 = 100;

/// HTTP methods a rule can be bound to. `Any` accepts every request method,
/// including the ones without a dedicated variant (HEAD, OPTIONS, ...).
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    #[default]
    Any,
}

impl Method {
    pub fn matches(&self, method: &http::Method) -> bool {
        match self {
            Method::Any => true,
            Method::Get => method == http::Method::GET,
            Method::Post => method == http::Method::POST,
            Method::Put => method == http::Method::PUT,
            Method::Delete => method == http::Method::DELETE,
            Method::Patch => method == http::Method::PATCH,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Any => "ANY",
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Collection {
    pub id: CollectionId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub request_count: u64,
}

/// The mutable part of an endpoint, as submitted on the write path.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct EndpointSpec {
    pub name: String,
    pub url_pattern: String,
    #[serde(default)]
    pub method: Method,
    #[serde(default)]
    pub min_latency_ms: u64,
    #[serde(default)]
    pub max_latency_ms: u64,
    #[serde(default)]
    pub fail_rate_percent: u8,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl EndpointSpec {
    /// Field-level checks. Pattern compilation and conflict detection happen in
    /// the rule store.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_latency(self.min_latency_ms, self.max_latency_ms)?;
        validate_fail_rate(self.fail_rate_percent)
    }
}

/// An endpoint rule: one wildcard URL pattern plus method and chaos parameters.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Endpoint {
    pub id: EndpointId,
    pub collection_id: CollectionId,
    #[serde(flatten)]
    pub spec: EndpointSpec,
    #[serde(default)]
    pub request_count: u64,
}

/// Single-target key: every request is forwarded to `target_url` plus the
/// remainder of the inbound path and query, without pattern matching.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ConfigKey {
    pub id: ConfigKeyId,
    #[serde(default)]
    pub name: String,
    pub key: String,
    #[serde(default)]
    pub target_url: Option<Url>,
    #[serde(default)]
    pub method: Method,
    #[serde(default)]
    pub min_latency_ms: u64,
    #[serde(default)]
    pub max_latency_ms: u64,
    #[serde(default)]
    pub fail_rate_percent: u8,
    #[serde(default)]
    pub error_codes: Vec<u16>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub request_count: u64,
}

impl ConfigKey {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.key.is_empty() {
            return Err(ValidationError::EmptyKey);
        }
        validate_latency(self.min_latency_ms, self.max_latency_ms)?;
        validate_fail_rate(self.fail_rate_percent)?;
        for code in &self.error_codes {
            validate_error_code(*code)?;
        }
        Ok(())
    }
}

/// Collection-scoped API key.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ApiKey {
    pub id: ApiKeyId,
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub all_collections: bool,
    #[serde(default)]
    pub collection_ids: BTreeSet<CollectionId>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub request_count: u64,
}

impl ApiKey {
    pub fn grants(&self, collection_id: CollectionId) -> bool {
        self.all_collections || self.collection_ids.contains(&collection_id)
    }
}

pub fn validate_latency(min_latency_ms: u64, max_latency_ms: u64) -> Result<(), ValidationError> {
    if min_latency_ms > max_latency_ms {
        return Err(ValidationError::InvalidLatencyRange {
            min: min_latency_ms,
            max: max_latency_ms,
        });
    }
    Ok(())
}

pub fn validate_fail_rate(fail_rate_percent: u8) -> Result<(), ValidationError> {
    if fail_rate_percent > MAX_FAIL_RATE_PERCENT {
        return Err(ValidationError::InvalidFailRatePercent(fail_rate_percent));
    }
    Ok(())
}

pub fn validate_error_code(code: u16) -> Result<(), ValidationError> {
    if !(100..=599).contains(&code) {
        return Err(ValidationError::InvalidErrorCode(code));
    }
    Ok(())
}
