use crate::errors::{AuthError, KeyError, ValidationError};
use crate::model::{ApiKey, CollectionId, ConfigKey};
use std::collections::{HashMap, HashSet};

/// Lookup of API keys and config keys by their secret value.
#[derive(Debug, Default)]
pub struct KeyStore {
    api_keys: HashMap<String, ApiKey>,
    config_keys: HashMap<String, ConfigKey>,
}

impl KeyStore {
    /// Key values must be unique across both kinds, since both arrive through
    /// the same request slots.
    pub fn new(api_keys: Vec<ApiKey>, config_keys: Vec<ConfigKey>) -> Result<Self, KeyError> {
        let mut api_ids = HashSet::new();
        let mut by_key = HashMap::with_capacity(api_keys.len());
        for api_key in api_keys {
            if api_key.key.is_empty() {
                return Err(KeyError::Invalid {
                    id: api_key.id,
                    source: ValidationError::EmptyKey,
                });
            }
            if !api_ids.insert(api_key.id) {
                return Err(KeyError::DuplicateId(api_key.id));
            }
            if by_key.contains_key(&api_key.key) {
                return Err(KeyError::DuplicateKey(api_key.id));
            }
            by_key.insert(api_key.key.clone(), api_key);
        }

        let mut config_ids = HashSet::new();
        let mut config_by_key = HashMap::with_capacity(config_keys.len());
        for config_key in config_keys {
            config_key.validate().map_err(|source| KeyError::Invalid {
                id: config_key.id,
                source,
            })?;
            if !config_ids.insert(config_key.id) {
                return Err(KeyError::DuplicateId(config_key.id));
            }
            if by_key.contains_key(&config_key.key) || config_by_key.contains_key(&config_key.key) {
                return Err(KeyError::DuplicateKey(config_key.id));
            }
            config_by_key.insert(config_key.key.clone(), config_key);
        }

        Ok(Self {
            api_keys: by_key,
            config_keys: config_by_key,
        })
    }

    /// Checks that `key` may proxy through `collection_id`.
    pub fn authorize(
        &self,
        key: Option<&str>,
        collection_id: CollectionId,
    ) -> Result<&ApiKey, AuthError> {
        let key = key.filter(|k| !k.is_empty()).ok_or(AuthError::MissingKey)?;
        let api_key = self.api_keys.get(key).ok_or(AuthError::InvalidKey)?;
        if !api_key.is_active {
            return Err(AuthError::InactiveKey);
        }
        if !api_key.grants(collection_id) {
            return Err(AuthError::OutOfScope(collection_id));
        }
        Ok(api_key)
    }

    pub fn config_key(&self, key: &str) -> Option<&ConfigKey> {
        self.config_keys.get(key)
    }

    pub fn api_keys(&self) -> impl Iterator<Item = &ApiKey> {
        self.api_keys.values()
    }

    pub fn config_keys(&self) -> impl Iterator<Item = &ConfigKey> {
        self.config_keys.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn api_key(id: u64, key: &str, collections: &[CollectionId]) -> ApiKey {
        ApiKey {
            id,
            key: key.to_string(),
            name: String::new(),
            all_collections: false,
            collection_ids: collections.iter().copied().collect::<BTreeSet<_>>(),
            is_active: true,
            request_count: 0,
        }
    }

    fn config_key(id: u64, key: &str) -> ConfigKey {
        serde_json::from_value(serde_json::json!({"id": id, "key": key})).unwrap()
    }

    #[test]
    fn test_authorize() {
        let mut inactive = api_key(2, "lp_off", &[1]);
        inactive.is_active = false;
        let store = KeyStore::new(vec![api_key(1, "lp_one", &[1]), inactive], vec![]).unwrap();

        assert_eq!(store.authorize(Some("lp_one"), 1).unwrap().id, 1);
        assert_eq!(store.authorize(None, 1), Err(AuthError::MissingKey));
        assert_eq!(store.authorize(Some(""), 1), Err(AuthError::MissingKey));
        assert_eq!(store.authorize(Some("nope"), 1), Err(AuthError::InvalidKey));
        assert_eq!(store.authorize(Some("lp_off"), 1), Err(AuthError::InactiveKey));
        assert_eq!(store.authorize(Some("lp_one"), 2), Err(AuthError::OutOfScope(2)));
    }

    #[test]
    fn test_all_collections_key() {
        let mut key = api_key(1, "lp_all", &[]);
        key.all_collections = true;
        let store = KeyStore::new(vec![key], vec![]).unwrap();
        assert!(store.authorize(Some("lp_all"), 42).is_ok());
    }

    #[test]
    fn test_config_key_lookup() {
        let store = KeyStore::new(vec![], vec![config_key(1, "lp_cfg")]).unwrap();
        assert_eq!(store.config_key("lp_cfg").unwrap().id, 1);
        assert!(store.config_key("lp_other").is_none());
        // config keys do not authorize collections
        assert_eq!(store.authorize(Some("lp_cfg"), 1), Err(AuthError::InvalidKey));
    }

    #[test]
    fn test_rejects_duplicates() {
        assert_eq!(
            KeyStore::new(vec![api_key(1, "a", &[]), api_key(1, "b", &[])], vec![]).unwrap_err(),
            KeyError::DuplicateId(1)
        );
        assert_eq!(
            KeyStore::new(vec![api_key(1, "a", &[]), api_key(2, "a", &[])], vec![]).unwrap_err(),
            KeyError::DuplicateKey(2)
        );
        assert_eq!(
            KeyStore::new(vec![api_key(1, "a", &[])], vec![config_key(1, "a")]).unwrap_err(),
            KeyError::DuplicateKey(1)
        );
        assert!(matches!(
            KeyStore::new(vec![], vec![config_key(3, "")]).unwrap_err(),
            KeyError::Invalid { id: 3, source: ValidationError::EmptyKey }
        ));
    }
}
