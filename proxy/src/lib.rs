mod admin_service;
pub mod auth;
pub mod config;
pub mod errors;
mod forwarder;
mod metrics_defs;
mod proxy_service;
#[cfg(test)]
mod testutils;
mod utils;

use admin_service::AdminService;
use engine::dispatcher::Dispatcher;
use engine::injector::Injector;
use engine::random::MutexRng;
use engine::usage::UsageCounter;
use errors::ProxyError;
use forwarder::Forwarder;
use hyper_util::service::TowerToHyperService;
use proxy_service::{ProxyService, cors_layer};
use shared::http::run_http_service;
use shared::metrics_defs::describe_all;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;

/// Seeds the rule and key stores from `config` and serves the proxy and admin
/// listeners until one of them fails.
pub async fn run(config: config::Config) -> Result<(), ProxyError> {
    let seed = config.seed()?;
    for warning in &seed.warnings {
        tracing::warn!(
            collection_id = warning.collection_id,
            endpoint_id = warning.endpoint_id,
            conflicting_endpoint_id = warning.conflict.endpoint_id,
            "endpoint {}",
            warning.conflict
        );
    }

    describe_all(metrics_defs::ALL_METRICS);
    describe_all(engine::metrics_defs::ALL_METRICS);

    let rules = Arc::new(seed.rules);
    let usage = UsageCounter::new(seed.usage);
    let forwarder = Forwarder::new(Duration::from_secs(config.upstream_timeout_secs))?;

    let proxy = ProxyService::new(
        Dispatcher::new(rules.clone()),
        Arc::new(seed.keys),
        Injector::new(Arc::new(MutexRng::from_entropy())),
        Arc::new(usage.clone()),
        forwarder,
    );
    let proxy = TowerToHyperService::new(ServiceBuilder::new().layer(cors_layer()).service(proxy));
    let admin = AdminService::new(rules, usage);

    tracing::info!(
        collections = config.collections.len(),
        api_keys = config.api_keys.len(),
        config_keys = config.config_keys.len(),
        "rules loaded"
    );

    tokio::try_join!(
        run_http_service(&config.listener.host, config.listener.port, proxy),
        run_http_service(
            &config.admin_listener.host,
            config.admin_listener.port,
            admin
        ),
    )?;
    Ok(())
}
