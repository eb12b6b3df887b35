use engine::conflict::Conflict;
use engine::errors::{KeyError, RuleError};
use engine::keys::KeyStore;
use engine::model::{
    ApiKey, ApiKeyId, Collection, CollectionId, ConfigKey, Endpoint, EndpointId, EndpointSpec,
};
use engine::rules::RuleStore;
use engine::usage::UsageTotals;
use serde::Deserialize;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Upstream timeout cannot be 0")]
    InvalidTimeout,

    #[error("Collection {collection_id} is invalid: {source}")]
    InvalidCollection {
        collection_id: CollectionId,
        source: RuleError,
    },

    #[error("API key {api_key_id} references unknown collection {collection_id}")]
    UnknownCollection {
        api_key_id: ApiKeyId,
        collection_id: CollectionId,
    },

    #[error("Invalid keys: {0}")]
    InvalidKeys(#[from] KeyError),
}

fn default_upstream_timeout_secs() -> u64 {
    30
}

/// Proxy configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for proxied traffic
    pub listener: Listener,
    /// Listener for health checks and the endpoint admin API
    pub admin_listener: Listener,
    /// Upper bound for receiving the upstream response head
    #[serde(default = "default_upstream_timeout_secs")]
    pub upstream_timeout_secs: u64,
    #[serde(default)]
    pub collections: Vec<CollectionConfig>,
    #[serde(default)]
    pub api_keys: Vec<ApiKey>,
    #[serde(default)]
    pub config_keys: Vec<ConfigKey>,
}

/// Everything the proxy serves from, built out of a validated [`Config`].
pub struct Seed {
    pub rules: RuleStore,
    pub keys: KeyStore,
    pub usage: UsageTotals,
    pub warnings: Vec<SeedWarning>,
}

/// A non-blocking overlap found while loading the configured endpoints.
#[derive(Clone, Debug, PartialEq)]
pub struct SeedWarning {
    pub collection_id: CollectionId,
    pub endpoint_id: EndpointId,
    pub conflict: Conflict,
}

impl Config {
    /// Validates the configuration and returns the override warnings found in
    /// the configured endpoints.
    pub fn validate(&self) -> Result<Vec<SeedWarning>, ValidationError> {
        self.seed().map(|seed| seed.warnings)
    }

    pub fn seed(&self) -> Result<Seed, ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        if self.upstream_timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }

        let rules = RuleStore::new();
        let mut endpoints = Vec::new();
        let mut warnings = Vec::new();
        for collection in &self.collections {
            let collection_id = collection.collection.id;
            let seeded = collection.endpoints();
            let outcomes = rules
                .insert_collection(collection.collection.clone(), seeded.clone())
                .map_err(|source| ValidationError::InvalidCollection {
                    collection_id,
                    source,
                })?;
            for outcome in outcomes {
                warnings.extend(outcome.warnings.into_iter().map(|conflict| SeedWarning {
                    collection_id,
                    endpoint_id: outcome.endpoint.id,
                    conflict,
                }));
            }
            endpoints.extend(seeded);
        }

        let collection_ids: HashSet<_> = self.collections.iter().map(|c| c.collection.id).collect();
        for api_key in &self.api_keys {
            if let Some(collection_id) = api_key
                .collection_ids
                .iter()
                .find(|id| !collection_ids.contains(*id))
            {
                return Err(ValidationError::UnknownCollection {
                    api_key_id: api_key.id,
                    collection_id: *collection_id,
                });
            }
        }

        let keys = KeyStore::new(self.api_keys.clone(), self.config_keys.clone())?;

        let usage = UsageTotals::seeded(
            self.collections.iter().map(|c| &c.collection),
            &endpoints,
            &self.api_keys,
            &self.config_keys,
        );

        Ok(Seed {
            rules,
            keys,
            usage,
            warnings,
        })
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// A collection with the endpoints it starts out with.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CollectionConfig {
    #[serde(flatten)]
    pub collection: Collection,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

impl CollectionConfig {
    fn endpoints(&self) -> Vec<Endpoint> {
        self.endpoints
            .iter()
            .map(|endpoint| Endpoint {
                id: endpoint.id,
                collection_id: self.collection.id,
                spec: endpoint.spec.clone(),
                request_count: endpoint.request_count,
            })
            .collect()
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct EndpointConfig {
    pub id: EndpointId,
    #[serde(flatten)]
    pub spec: EndpointSpec,
    #[serde(default)]
    pub request_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::conflict::ConflictKind;
    use engine::model::Method;

    const YAML: &str = r#"
listener:
    host: "0.0.0.0"
    port: 8080
admin_listener:
    host: "127.0.0.1"
    port: 8081
collections:
    - id: 1
      name: github
      request_count: 12
      endpoints:
        - id: 10
          name: everything
          url_pattern: "https://api.github.com/*"
          min_latency_ms: 100
          max_latency_ms: 500
          fail_rate_percent: 10
        - id: 11
          name: users
          url_pattern: "https://api.github.com/users"
          method: GET
          fail_rate_percent: 50
api_keys:
    - id: 1
      key: lp_collection
      collection_ids: [1]
config_keys:
    - id: 1
      name: stripe
      key: lp_config
      target_url: "https://api.stripe.com"
      min_latency_ms: 5000
      max_latency_ms: 5000
      fail_rate_percent: 50
      error_codes: [500, 503]
"#;

    fn parse(yaml: &str) -> Config {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_parse_valid_config() {
        let config = parse(YAML);
        assert_eq!(config.listener.port, 8080);
        assert_eq!(config.upstream_timeout_secs, 30);
        assert_eq!(config.collections[0].collection.request_count, 12);
        assert!(config.collections[0].collection.is_active);
        assert_eq!(config.collections[0].endpoints.len(), 2);
        assert_eq!(config.collections[0].endpoints[1].spec.method, Method::Get);
        assert_eq!(config.collections[0].endpoints[0].spec.method, Method::Any);
        assert_eq!(config.config_keys[0].error_codes, vec![500, 503]);

        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].endpoint_id, 11);
        assert_eq!(warnings[0].conflict.endpoint_id, 10);
        assert_eq!(warnings[0].conflict.kind, ConflictKind::Overrides);
    }

    #[test]
    fn test_seed() {
        let seed = parse(YAML).seed().unwrap();
        assert_eq!(seed.rules.snapshot(1).unwrap().rules().len(), 2);
        assert!(seed.keys.config_key("lp_config").is_some());
        assert!(seed.keys.authorize(Some("lp_collection"), 1).is_ok());

        let report = seed.usage.report();
        assert_eq!(report.collections[&1], 12);
        assert_eq!(report.endpoints[&10], 0);
    }

    #[test]
    fn test_validation_errors() {
        let base = parse(YAML);

        let mut config = base.clone();
        config.admin_listener.port = 0;
        assert!(matches!(config.validate().unwrap_err(), ValidationError::InvalidPort));

        let mut config = base.clone();
        config.upstream_timeout_secs = 0;
        assert!(matches!(config.validate().unwrap_err(), ValidationError::InvalidTimeout));

        let mut config = base.clone();
        config.collections[0].endpoints[1].spec.url_pattern = "https://api.github.com/*".into();
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::InvalidCollection {
                collection_id: 1,
                source: RuleError::Conflict { .. }
            }
        ));

        let mut config = base.clone();
        config.collections[0].endpoints[0].spec.min_latency_ms = 1000;
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::InvalidCollection {
                source: RuleError::Invalid(_),
                ..
            }
        ));

        let mut config = base.clone();
        config.collections.push(config.collections[0].clone());
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::InvalidCollection { .. }
        ));

        let mut config = base.clone();
        config.api_keys[0].collection_ids.insert(7);
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::UnknownCollection {
                api_key_id: 1,
                collection_id: 7
            }
        ));

        let mut config = base.clone();
        config.config_keys[0].key = "lp_collection".into();
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::InvalidKeys(KeyError::DuplicateKey(1))
        ));

        let mut config = base;
        config.config_keys[0].error_codes.push(700);
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::InvalidKeys(KeyError::Invalid { id: 1, .. })
        ));
    }

    #[test]
    fn test_deserialization_errors() {
        // Invalid target URL
        assert!(
            serde_yaml::from_str::<Config>(
                r#"
listener: {host: "0.0.0.0", port: 8080}
admin_listener: {host: "127.0.0.1", port: 8081}
config_keys: [{id: 1, key: lp_x, target_url: "not a url"}]
"#
            )
            .is_err()
        );

        // Unknown method
        assert!(
            serde_yaml::from_str::<Config>(
                r#"
listener: {host: "0.0.0.0", port: 8080}
admin_listener: {host: "127.0.0.1", port: 8081}
collections:
    - id: 1
      name: c
      endpoints: [{id: 1, name: e, url_pattern: "*", method: TRACE}]
"#
            )
            .is_err()
        );

        // Missing listener
        assert!(serde_yaml::from_str::<Config>("admin_listener: {host: a, port: 1}").is_err());
    }
}
