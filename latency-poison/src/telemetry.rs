use crate::config::{CommonConfig, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    #[error("invalid logging.level: {0}")]
    InvalidLogLevel(#[from] tracing_subscriber::filter::ParseError),
    #[error("invalid logging.sentry_dsn: {0}")]
    InvalidSentryDsn(String),
    #[error("could not set up statsd exporter: {0}")]
    Metrics(String),
    #[error("could not install tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Keeps the Sentry client alive; events are flushed when it is dropped.
pub struct TelemetryGuard {
    _sentry: Option<sentry::ClientInitGuard>,
}

pub fn init(config: &CommonConfig) -> Result<TelemetryGuard, TelemetryError> {
    let sentry = config
        .logging
        .sentry_dsn
        .as_deref()
        .map(init_sentry)
        .transpose()?;

    tracing_subscriber::registry()
        .with(env_filter(&config.logging)?)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry::integrations::tracing::layer())
        .try_init()?;

    if let Some(metrics) = &config.metrics {
        init_statsd(metrics)?;
    }

    Ok(TelemetryGuard { _sentry: sentry })
}

fn env_filter(logging: &LoggingConfig) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let level = logging.level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL).trim();
    Ok(EnvFilter::try_new(level)?)
}

fn init_sentry(dsn: &str) -> Result<sentry::ClientInitGuard, TelemetryError> {
    let dsn = dsn
        .parse::<sentry::types::Dsn>()
        .map_err(|e| TelemetryError::InvalidSentryDsn(e.to_string()))?;

    Ok(sentry::init(sentry::ClientOptions {
        dsn: Some(dsn),
        release: sentry::release_name!(),
        ..Default::default()
    }))
}

fn init_statsd(config: &MetricsConfig) -> Result<(), TelemetryError> {
    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some(&config.prefix))
        .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| TelemetryError::Metrics(e.to_string()))
}
