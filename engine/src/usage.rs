//! Request counting.
//!
//! Hits are sent over an unbounded channel to a single worker task, so
//! recording never blocks the request path. Totals are eventually consistent.

use crate::model::{
    ApiKey, ApiKeyId, Collection, CollectionId, ConfigKey, ConfigKeyId, Endpoint, EndpointId,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot};

/// One request that reached the injector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UsageHit {
    pub collection_id: Option<CollectionId>,
    pub endpoint_id: Option<EndpointId>,
    pub api_key_id: Option<ApiKeyId>,
    pub config_key_id: Option<ConfigKeyId>,
}

impl UsageHit {
    pub fn endpoint(
        collection_id: CollectionId,
        endpoint_id: EndpointId,
        api_key_id: ApiKeyId,
    ) -> Self {
        Self {
            collection_id: Some(collection_id),
            endpoint_id: Some(endpoint_id),
            api_key_id: Some(api_key_id),
            config_key_id: None,
        }
    }

    pub fn config_key(config_key_id: ConfigKeyId) -> Self {
        Self {
            config_key_id: Some(config_key_id),
            ..Self::default()
        }
    }
}

pub trait UsageSink: Send + Sync {
    fn record(&self, hit: UsageHit);
}

#[derive(Debug, Default)]
pub struct UsageTotals {
    collections: HashMap<CollectionId, u64>,
    endpoints: HashMap<EndpointId, u64>,
    api_keys: HashMap<ApiKeyId, u64>,
    config_keys: HashMap<ConfigKeyId, u64>,
    api_key_last_used: HashMap<ApiKeyId, SystemTime>,
}

impl UsageTotals {
    /// Starts every counter at the configured `request_count`.
    pub fn seeded<'a>(
        collections: impl IntoIterator<Item = &'a Collection>,
        endpoints: impl IntoIterator<Item = &'a Endpoint>,
        api_keys: impl IntoIterator<Item = &'a ApiKey>,
        config_keys: impl IntoIterator<Item = &'a ConfigKey>,
    ) -> Self {
        Self {
            collections: collections.into_iter().map(|c| (c.id, c.request_count)).collect(),
            endpoints: endpoints.into_iter().map(|e| (e.id, e.request_count)).collect(),
            api_keys: api_keys.into_iter().map(|k| (k.id, k.request_count)).collect(),
            config_keys: config_keys.into_iter().map(|k| (k.id, k.request_count)).collect(),
            api_key_last_used: HashMap::new(),
        }
    }

    pub fn apply(&mut self, hit: &UsageHit, at: SystemTime) {
        if let Some(id) = hit.collection_id {
            *self.collections.entry(id).or_default() += 1;
        }
        if let Some(id) = hit.endpoint_id {
            *self.endpoints.entry(id).or_default() += 1;
        }
        if let Some(id) = hit.api_key_id {
            *self.api_keys.entry(id).or_default() += 1;
            self.api_key_last_used.insert(id, at);
        }
        if let Some(id) = hit.config_key_id {
            *self.config_keys.entry(id).or_default() += 1;
        }
    }

    pub fn report(&self) -> UsageReport {
        UsageReport {
            collections: self.collections.iter().map(|(k, v)| (*k, *v)).collect(),
            endpoints: self.endpoints.iter().map(|(k, v)| (*k, *v)).collect(),
            api_keys: self
                .api_keys
                .iter()
                .map(|(id, count)| {
                    let last_used_at = self
                        .api_key_last_used
                        .get(id)
                        .and_then(|at| at.duration_since(UNIX_EPOCH).ok())
                        .map(|d| d.as_secs());
                    (
                        *id,
                        ApiKeyUsage {
                            request_count: *count,
                            last_used_at,
                        },
                    )
                })
                .collect(),
            config_keys: self.config_keys.iter().map(|(k, v)| (*k, *v)).collect(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ApiKeyUsage {
    pub request_count: u64,
    /// Unix seconds.
    pub last_used_at: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct UsageReport {
    pub collections: BTreeMap<CollectionId, u64>,
    pub endpoints: BTreeMap<EndpointId, u64>,
    pub api_keys: BTreeMap<ApiKeyId, ApiKeyUsage>,
    pub config_keys: BTreeMap<ConfigKeyId, u64>,
}

#[derive(Debug)]
enum Command {
    Record(UsageHit, SystemTime),
    // Replies once every hit sent before it has been applied.
    Flush(oneshot::Sender<()>),
}

struct UsageInner {
    totals: Arc<RwLock<UsageTotals>>,
    tx: mpsc::UnboundedSender<Command>,
    #[allow(dead_code)]
    handle: tokio::task::JoinHandle<()>,
}

/// In-memory [`UsageSink`] backed by a worker task. Must be created inside a
/// tokio runtime.
#[derive(Clone)]
pub struct UsageCounter {
    inner: Arc<UsageInner>,
}

impl UsageCounter {
    pub fn new(totals: UsageTotals) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
        let totals = Arc::new(RwLock::new(totals));

        let worker_totals = totals.clone();
        let handle = tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    Command::Record(hit, at) => worker_totals.write().apply(&hit, at),
                    Command::Flush(reply) => {
                        let _ = reply.send(());
                    }
                }
            }
            tracing::debug!("usage worker stopped");
        });

        Self {
            inner: Arc::new(UsageInner { totals, tx, handle }),
        }
    }

    pub fn report(&self) -> UsageReport {
        self.inner.totals.read().report()
    }

    /// Waits until every hit recorded so far is reflected in [`Self::report`].
    pub async fn flush(&self) {
        let (reply, done) = oneshot::channel();
        if self.inner.tx.send(Command::Flush(reply)).is_ok() {
            let _ = done.await;
        }
    }
}

impl UsageSink for UsageCounter {
    fn record(&self, hit: UsageHit) {
        if self
            .inner
            .tx
            .send(Command::Record(hit, SystemTime::now()))
            .is_err()
        {
            tracing::warn!(?hit, "usage worker is gone, dropping hit");
        }
    }
}
