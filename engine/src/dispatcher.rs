use crate::errors::DispatchError;
use crate::metrics_defs::{DISPATCH_NO_MATCH, DISPATCH_TIE};
use crate::model::CollectionId;
use crate::rules::{Rule, RuleStore};
use shared::counter;
use std::sync::Arc;

/// Picks the rule that governs a request.
///
/// The most specific matching rule wins. On a tie the lowest endpoint id wins,
/// which the write path normally prevents; the tie is logged and counted.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<RuleStore>,
}

impl Dispatcher {
    pub fn new(store: Arc<RuleStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<RuleStore> {
        &self.store
    }

    pub fn resolve(
        &self,
        collection_id: CollectionId,
        url: &str,
        method: &http::Method,
    ) -> Result<Arc<Rule>, DispatchError> {
        let snapshot = self
            .store
            .snapshot(collection_id)
            .ok_or(DispatchError::CollectionNotFound(collection_id))?;

        if !snapshot.collection().is_active {
            return Err(DispatchError::CollectionInactive(collection_id));
        }

        let mut best: Option<&Arc<Rule>> = None;
        let mut tied = false;
        // Rules are ordered by id, so the first rule seen at a given
        // specificity is also the lowest id.
        for rule in snapshot.rules() {
            if !rule.is_active()
                || !rule.endpoint().spec.method.matches(method)
                || !rule.pattern().matches(url)
            {
                continue;
            }
            let specificity = rule.pattern().specificity();
            match best {
                Some(current) if specificity < current.pattern().specificity() => {}
                Some(current) if specificity == current.pattern().specificity() => {
                    tied = true;
                }
                _ => {
                    best = Some(rule);
                    tied = false;
                }
            }
        }

        match best {
            Some(rule) => {
                if tied {
                    counter!(DISPATCH_TIE).increment(1);
                    tracing::warn!(
                        collection_id,
                        endpoint_id = rule.id(),
                        url_pattern = %rule.pattern(),
                        url,
                        "several endpoints match with equal specificity, using the lowest id"
                    );
                }
                Ok(rule.clone())
            }
            None => {
                counter!(DISPATCH_NO_MATCH).increment(1);
                Err(DispatchError::NoMatch {
                    collection_id,
                    method: method.to_string(),
                    url: url.to_string(),
                })
            }
        }
    }
}
