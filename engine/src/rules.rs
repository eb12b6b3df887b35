//! Per-collection rule sets and the serialized write path.
//!
//! Readers clone an `Arc<RuleSet>` under a short read lock and never wait on a
//! writer that is validating. Writers to the same collection take that
//! collection's write lock, validate against the current snapshot and publish
//! a new one, so the conflict check and the swap are atomic with respect to
//! each other.

use crate::conflict::{self, Conflict};
use crate::errors::RuleError;
use crate::metrics_defs::RULE_WRITE_REJECTED;
use crate::model::{Collection, CollectionId, Endpoint, EndpointId, EndpointSpec};
use crate::pattern::Pattern;
use parking_lot::{Mutex, RwLock};
use shared::counter;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// An endpoint with its compiled pattern.
#[derive(Clone, Debug)]
pub struct Rule {
    endpoint: Endpoint,
    pattern: Pattern,
}

impl Rule {
    pub fn new(endpoint: Endpoint) -> Result<Self, RuleError> {
        endpoint.spec.validate()?;
        let pattern = Pattern::compile(&endpoint.spec.url_pattern)?;
        Ok(Self { endpoint, pattern })
    }

    pub fn id(&self) -> EndpointId {
        self.endpoint.id
    }

    pub fn is_active(&self) -> bool {
        self.endpoint.spec.is_active
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }
}

/// Immutable view of one collection and its rules, ordered by endpoint id.
#[derive(Clone, Debug)]
pub struct RuleSet {
    collection: Collection,
    rules: Vec<Arc<Rule>>,
}

impl RuleSet {
    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn rules(&self) -> &[Arc<Rule>] {
        &self.rules
    }

    pub fn get(&self, endpoint_id: EndpointId) -> Option<&Arc<Rule>> {
        self.position(endpoint_id).map(|i| &self.rules[i])
    }

    fn position(&self, endpoint_id: EndpointId) -> Option<usize> {
        self.rules
            .binary_search_by_key(&endpoint_id, |rule| rule.id())
            .ok()
    }

    fn conflicts(&self, candidate: &Rule) -> Vec<Conflict> {
        conflict::validate(
            candidate.pattern(),
            self.rules.iter().map(Arc::as_ref),
            Some(candidate.id()),
        )
    }

    fn with_rule(&self, rule: Rule) -> Self {
        let mut rules = self.rules.clone();
        match rules.binary_search_by_key(&rule.id(), |r| r.id()) {
            Ok(i) => rules[i] = Arc::new(rule),
            Err(i) => rules.insert(i, Arc::new(rule)),
        }
        Self {
            collection: self.collection.clone(),
            rules,
        }
    }

    fn without_rule(&self, index: usize) -> Self {
        let mut rules = self.rules.clone();
        rules.remove(index);
        Self {
            collection: self.collection.clone(),
            rules,
        }
    }
}

/// Result of an accepted write: the stored endpoint plus non-blocking overlaps.
#[derive(Clone, Debug)]
pub struct WriteOutcome {
    pub endpoint: Endpoint,
    pub warnings: Vec<Conflict>,
}

struct CollectionSlot {
    snapshot: RwLock<Arc<RuleSet>>,
    write_lock: Mutex<()>,
}

impl CollectionSlot {
    fn load(&self) -> Arc<RuleSet> {
        self.snapshot.read().clone()
    }

    fn publish(&self, rule_set: RuleSet) {
        *self.snapshot.write() = Arc::new(rule_set);
    }
}

/// In-memory home of every collection's rules.
pub struct RuleStore {
    collections: RwLock<HashMap<CollectionId, Arc<CollectionSlot>>>,
    next_endpoint_id: AtomicU64,
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            next_endpoint_id: AtomicU64::new(1),
        }
    }

    /// Adds a collection with its existing endpoints. Each endpoint goes
    /// through the same validation as a regular create, in the given order.
    pub fn insert_collection(
        &self,
        collection: Collection,
        endpoints: Vec<Endpoint>,
    ) -> Result<Vec<WriteOutcome>, RuleError> {
        let collection_id = collection.id;
        for endpoint in &endpoints {
            if endpoint.id == 0 {
                return Err(RuleError::EndpointIdOutOfRange(endpoint.id));
            }
            if endpoint.collection_id != collection_id {
                return Err(RuleError::CollectionMismatch {
                    endpoint_id: endpoint.id,
                    expected: collection_id,
                    actual: endpoint.collection_id,
                });
            }
            if self.locate(endpoint.id).is_some() {
                return Err(RuleError::DuplicateEndpoint(endpoint.id));
            }
        }

        let mut rule_set = RuleSet {
            collection,
            rules: Vec::with_capacity(endpoints.len()),
        };
        let mut outcomes = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            if rule_set.get(endpoint.id).is_some() {
                return Err(RuleError::DuplicateEndpoint(endpoint.id));
            }
            let (next, outcome) = Self::apply(&rule_set, Rule::new(endpoint)?)?;
            rule_set = next;
            outcomes.push(outcome);
        }

        let max_id = rule_set.rules.iter().map(|rule| rule.id()).max().unwrap_or(0);
        // Ids handed out later continue after the seed.
        let next_id = max_id
            .checked_add(1)
            .ok_or(RuleError::EndpointIdOutOfRange(max_id))?;

        let mut collections = self.collections.write();
        if collections.contains_key(&collection_id) {
            return Err(RuleError::DuplicateCollection(collection_id));
        }
        collections.insert(
            collection_id,
            Arc::new(CollectionSlot {
                snapshot: RwLock::new(Arc::new(rule_set)),
                write_lock: Mutex::new(()),
            }),
        );
        self.next_endpoint_id.fetch_max(next_id, Ordering::Relaxed);

        Ok(outcomes)
    }

    /// Current snapshot of a collection, taken once per request.
    pub fn snapshot(&self, collection_id: CollectionId) -> Option<Arc<RuleSet>> {
        self.slot(collection_id).map(|slot| slot.load())
    }

    pub fn collection_ids(&self) -> Vec<CollectionId> {
        let mut ids: Vec<_> = self.collections.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn set_collection_active(
        &self,
        collection_id: CollectionId,
        is_active: bool,
    ) -> Result<Collection, RuleError> {
        let slot = self
            .slot(collection_id)
            .ok_or(RuleError::CollectionNotFound(collection_id))?;
        let _guard = slot.write_lock.lock();

        let current = slot.load();
        let mut next = (*current).clone();
        next.collection.is_active = is_active;
        let collection = next.collection.clone();
        slot.publish(next);

        tracing::info!(collection_id, is_active, "collection toggled");
        Ok(collection)
    }

    pub fn create_endpoint(
        &self,
        collection_id: CollectionId,
        spec: EndpointSpec,
    ) -> Result<WriteOutcome, RuleError> {
        let slot = self
            .slot(collection_id)
            .ok_or(RuleError::CollectionNotFound(collection_id))?;

        // Field validation before an id is handed out.
        spec.validate()?;
        Pattern::compile(&spec.url_pattern)?;

        let _guard = slot.write_lock.lock();
        let id = self
            .next_endpoint_id
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| id.checked_add(1))
            .map_err(RuleError::EndpointIdOutOfRange)?;
        let rule = Rule::new(Endpoint {
            id,
            collection_id,
            spec,
            request_count: 0,
        })?;

        let (next, outcome) = Self::apply(&slot.load(), rule)?;
        slot.publish(next);

        tracing::info!(
            collection_id,
            endpoint_id = id,
            url_pattern = %outcome.endpoint.spec.url_pattern,
            warnings = outcome.warnings.len(),
            "endpoint created"
        );
        Ok(outcome)
    }

    pub fn update_endpoint(
        &self,
        endpoint_id: EndpointId,
        spec: EndpointSpec,
    ) -> Result<WriteOutcome, RuleError> {
        self.modify_endpoint(endpoint_id, |endpoint| endpoint.spec = spec)
    }

    pub fn set_endpoint_active(
        &self,
        endpoint_id: EndpointId,
        is_active: bool,
    ) -> Result<WriteOutcome, RuleError> {
        self.modify_endpoint(endpoint_id, |endpoint| endpoint.spec.is_active = is_active)
    }

    pub fn delete_endpoint(&self, endpoint_id: EndpointId) -> Result<Endpoint, RuleError> {
        let slot = self
            .locate(endpoint_id)
            .ok_or(RuleError::EndpointNotFound(endpoint_id))?;
        let _guard = slot.write_lock.lock();

        let current = slot.load();
        // Re-check under the lock: a concurrent delete may have won.
        let index = current
            .position(endpoint_id)
            .ok_or(RuleError::EndpointNotFound(endpoint_id))?;
        let removed = current.rules[index].endpoint().clone();
        slot.publish(current.without_rule(index));

        tracing::info!(
            collection_id = removed.collection_id,
            endpoint_id,
            "endpoint deleted"
        );
        Ok(removed)
    }

    fn modify_endpoint<F>(
        &self,
        endpoint_id: EndpointId,
        edit: F,
    ) -> Result<WriteOutcome, RuleError>
    where
        F: FnOnce(&mut Endpoint),
    {
        let slot = self
            .locate(endpoint_id)
            .ok_or(RuleError::EndpointNotFound(endpoint_id))?;
        let _guard = slot.write_lock.lock();

        let current = slot.load();
        let mut endpoint = current
            .get(endpoint_id)
            .ok_or(RuleError::EndpointNotFound(endpoint_id))?
            .endpoint()
            .clone();
        edit(&mut endpoint);

        let (next, outcome) = Self::apply(&current, Rule::new(endpoint)?)?;
        slot.publish(next);

        tracing::info!(
            collection_id = outcome.endpoint.collection_id,
            endpoint_id,
            is_active = outcome.endpoint.spec.is_active,
            warnings = outcome.warnings.len(),
            "endpoint updated"
        );
        Ok(outcome)
    }

    /// Validates `rule` against `current` and returns the rule set that
    /// contains it. Exact conflicts only block active rules.
    fn apply(current: &RuleSet, rule: Rule) -> Result<(RuleSet, WriteOutcome), RuleError> {
        let conflicts = current.conflicts(&rule);

        if rule.is_active() && conflicts.iter().any(Conflict::is_blocking) {
            counter!(RULE_WRITE_REJECTED).increment(1);
            tracing::debug!(
                collection_id = current.collection.id,
                url_pattern = %rule.pattern(),
                "endpoint write rejected by exact conflict"
            );
            return Err(RuleError::Conflict {
                pattern: rule.pattern().as_str().to_string(),
                conflicts: conflicts.into_iter().filter(Conflict::is_blocking).collect(),
            });
        }

        let endpoint = rule.endpoint().clone();
        let next = current.with_rule(rule);
        Ok((
            next,
            WriteOutcome {
                endpoint,
                warnings: conflicts,
            },
        ))
    }

    fn slot(&self, collection_id: CollectionId) -> Option<Arc<CollectionSlot>> {
        self.collections.read().get(&collection_id).cloned()
    }

    /// Finds the collection holding `endpoint_id`. Endpoints never move between
    /// collections, so callers only need to re-check presence under the lock.
    fn locate(&self, endpoint_id: EndpointId) -> Option<Arc<CollectionSlot>> {
        self.collections
            .read()
            .values()
            .find(|slot| slot.load().get(endpoint_id).is_some())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ConflictKind;
    use crate::errors::ValidationError;
    use crate::model::Method;
    use std::sync::Barrier;

    fn collection(id: CollectionId) -> Collection {
        Collection {
            id,
            name: format!("collection-{id}"),
            description: None,
            is_active: true,
            request_count: 0,
        }
    }

    fn spec(name: &str, url_pattern: &str) -> EndpointSpec {
        EndpointSpec {
            name: name.to_string(),
            url_pattern: url_pattern.to_string(),
            method: Method::Any,
            min_latency_ms: 0,
            max_latency_ms: 100,
            fail_rate_percent: 0,
            is_active: true,
        }
    }

    fn endpoint(id: EndpointId, collection_id: CollectionId, url_pattern: &str) -> Endpoint {
        Endpoint {
            id,
            collection_id,
            spec: spec(&format!("endpoint-{id}"), url_pattern),
            request_count: 0,
        }
    }

    fn store_with_collection() -> RuleStore {
        let store = RuleStore::new();
        store.insert_collection(collection(1), vec![]).unwrap();
        store
    }

    #[test]
    fn test_exact_conflict_rejected() {
        let store = store_with_collection();
        store.create_endpoint(1, spec("all", "https://api.com/*")).unwrap();

        let err = store
            .create_endpoint(1, spec("all again", "https://api.com/*"))
            .unwrap_err();
        match err {
            RuleError::Conflict { pattern, conflicts } => {
                assert_eq!(pattern, "https://api.com/*");
                assert_eq!(conflicts.len(), 1);
                assert_eq!(conflicts[0].kind, ConflictKind::Exact);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.snapshot(1).unwrap().rules().len(), 1);
    }

    #[test]
    fn test_overrides_are_warnings() {
        let store = store_with_collection();
        store.create_endpoint(1, spec("all", "https://api.com/*")).unwrap();

        let outcome = store
            .create_endpoint(1, spec("users", "https://api.com/users"))
            .unwrap();
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].kind, ConflictKind::Overrides);
        assert_eq!(store.snapshot(1).unwrap().rules().len(), 2);
    }

    #[test]
    fn test_same_pattern_in_other_collection_is_fine() {
        let store = store_with_collection();
        store.insert_collection(collection(2), vec![]).unwrap();
        store.create_endpoint(1, spec("a", "https://api.com/*")).unwrap();
        assert!(store.create_endpoint(2, spec("b", "https://api.com/*")).is_ok());
    }

    #[test]
    fn test_inactive_rules_do_not_conflict() {
        let store = store_with_collection();
        let first = store.create_endpoint(1, spec("a", "https://api.com/*")).unwrap();

        let mut inactive = spec("b", "https://api.com/*");
        inactive.is_active = false;
        let second = store.create_endpoint(1, inactive).unwrap();
        assert_eq!(second.warnings.len(), 1);

        // activating the duplicate is blocked
        assert!(matches!(
            store.set_endpoint_active(second.endpoint.id, true),
            Err(RuleError::Conflict { .. })
        ));

        // until the original is deactivated
        store.set_endpoint_active(first.endpoint.id, false).unwrap();
        let activated = store.set_endpoint_active(second.endpoint.id, true).unwrap();
        assert!(activated.endpoint.spec.is_active);
    }

    #[test]
    fn test_update_excludes_itself() {
        let store = store_with_collection();
        let created = store.create_endpoint(1, spec("a", "https://api.com/*")).unwrap();

        let mut edited = spec("a", "https://api.com/*");
        edited.fail_rate_percent = 50;
        let outcome = store.update_endpoint(created.endpoint.id, edited).unwrap();
        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.endpoint.spec.fail_rate_percent, 50);

        let snapshot = store.snapshot(1).unwrap();
        assert_eq!(snapshot.rules().len(), 1);
        assert_eq!(snapshot.rules()[0].endpoint().spec.fail_rate_percent, 50);
    }

    #[test]
    fn test_update_into_conflict_rejected() {
        let store = store_with_collection();
        store.create_endpoint(1, spec("a", "https://api.com/*")).unwrap();
        let other = store.create_endpoint(1, spec("b", "https://web.com/*")).unwrap();

        assert!(matches!(
            store.update_endpoint(other.endpoint.id, spec("b", "https://api.com/*")),
            Err(RuleError::Conflict { .. })
        ));
        let snapshot = store.snapshot(1).unwrap();
        assert_eq!(
            snapshot.get(other.endpoint.id).unwrap().pattern().as_str(),
            "https://web.com/*"
        );
    }

    #[test]
    fn test_invalid_fields_rejected() {
        let store = store_with_collection();

        let mut bad_latency = spec("a", "https://api.com/*");
        bad_latency.min_latency_ms = 500;
        assert!(matches!(
            store.create_endpoint(1, bad_latency),
            Err(RuleError::Invalid(ValidationError::InvalidLatencyRange { min: 500, max: 100 }))
        ));

        let mut bad_rate = spec("a", "https://api.com/*");
        bad_rate.fail_rate_percent = 150;
        assert!(matches!(
            store.create_endpoint(1, bad_rate),
            Err(RuleError::Invalid(ValidationError::InvalidFailRatePercent(150)))
        ));

        assert!(matches!(
            store.create_endpoint(1, spec("a", "")),
            Err(RuleError::Pattern(_))
        ));

        assert!(matches!(
            store.create_endpoint(9, spec("a", "*")),
            Err(RuleError::CollectionNotFound(9))
        ));
    }

    #[test]
    fn test_delete_endpoint() {
        let store = store_with_collection();
        let created = store.create_endpoint(1, spec("a", "https://api.com/*")).unwrap();

        let removed = store.delete_endpoint(created.endpoint.id).unwrap();
        assert_eq!(removed.id, created.endpoint.id);
        assert!(store.snapshot(1).unwrap().rules().is_empty());
        assert!(matches!(
            store.delete_endpoint(created.endpoint.id),
            Err(RuleError::EndpointNotFound(_))
        ));

        // the pattern is free again
        assert!(store.create_endpoint(1, spec("b", "https://api.com/*")).is_ok());
    }

    #[test]
    fn test_insert_collection_validates_seed() {
        let store = RuleStore::new();
        let err = store
            .insert_collection(
                collection(1),
                vec![
                    endpoint(1, 1, "https://api.com/*"),
                    endpoint(2, 1, "https://api.com/*"),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, RuleError::Conflict { .. }));
        assert!(store.snapshot(1).is_none());

        let outcomes = store
            .insert_collection(
                collection(1),
                vec![
                    endpoint(4, 1, "https://api.com/users"),
                    endpoint(2, 1, "https://api.com/*"),
                ],
            )
            .unwrap();
        assert_eq!(outcomes[1].warnings[0].kind, ConflictKind::Overridden);

        // rules are kept in id order, and new ids continue after the seed
        let ids: Vec<_> = store.snapshot(1).unwrap().rules().iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec![2, 4]);
        let created = store.create_endpoint(1, spec("c", "https://c.com/*")).unwrap();
        assert_eq!(created.endpoint.id, 5);

        assert!(matches!(
            store.insert_collection(collection(1), vec![]),
            Err(RuleError::DuplicateCollection(1))
        ));
        assert!(matches!(
            store.insert_collection(collection(2), vec![endpoint(4, 2, "*")]),
            Err(RuleError::DuplicateEndpoint(4))
        ));
        assert!(matches!(
            store.insert_collection(collection(3), vec![endpoint(9, 1, "*")]),
            Err(RuleError::CollectionMismatch { .. })
        ));
    }

    #[test]
    fn test_insert_collection_rejects_out_of_range_ids() {
        let store = RuleStore::new();
        assert!(matches!(
            store.insert_collection(collection(1), vec![endpoint(0, 1, "https://a.com/*")]),
            Err(RuleError::EndpointIdOutOfRange(0))
        ));
        assert!(matches!(
            store.insert_collection(collection(1), vec![endpoint(u64::MAX, 1, "https://a.com/*")]),
            Err(RuleError::EndpointIdOutOfRange(u64::MAX))
        ));
        assert!(store.snapshot(1).is_none());

        // the last id is handed out once, then the id space is exhausted
        store
            .insert_collection(
                collection(1),
                vec![endpoint(u64::MAX - 2, 1, "https://a.com/*")],
            )
            .unwrap();
        let created = store.create_endpoint(1, spec("b", "https://b.com/*")).unwrap();
        assert_eq!(created.endpoint.id, u64::MAX - 1);
        assert!(matches!(
            store.create_endpoint(1, spec("c", "https://c.com/*")),
            Err(RuleError::EndpointIdOutOfRange(u64::MAX))
        ));
        assert_eq!(store.snapshot(1).unwrap().rules().len(), 2);
    }

    #[test]
    fn test_snapshot_is_stable_across_writes() {
        let store = store_with_collection();
        store.create_endpoint(1, spec("a", "https://api.com/*")).unwrap();

        let before = store.snapshot(1).unwrap();
        store.create_endpoint(1, spec("b", "https://web.com/*")).unwrap();
        store.set_collection_active(1, false).unwrap();

        assert_eq!(before.rules().len(), 1);
        assert!(before.collection().is_active);
        let after = store.snapshot(1).unwrap();
        assert_eq!(after.rules().len(), 2);
        assert!(!after.collection().is_active);
    }

    #[test]
    fn test_concurrent_exact_creates_only_one_wins() {
        for _ in 0..20 {
            let store = Arc::new(store_with_collection());
            let barrier = Arc::new(Barrier::new(2));

            let handles: Vec<_> = (0..2)
                .map(|i| {
                    let store = store.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        store.create_endpoint(1, spec(&format!("racer-{i}"), "https://api.com/*"))
                    })
                })
                .collect();

            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
            assert_eq!(store.snapshot(1).unwrap().rules().len(), 1);
        }
    }
}
