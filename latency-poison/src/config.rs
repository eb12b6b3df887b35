use proxy::config::Config as ProxyConfig;
use serde::Deserialize;
use std::fs::File;

fn default_statsd_prefix() -> String {
    "latency_poison".to_string()
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
    #[serde(default = "default_statsd_prefix")]
    pub prefix: String,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `EnvFilter` directives. `RUST_LOG` takes precedence when set.
    pub level: Option<String>,
    pub sentry_dsn: Option<String>,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    pub proxy: ProxyConfig,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    #[test]
    fn full_config() {
        let yaml = r#"
            logging:
                level: "info,proxy=debug"
                sentry_dsn: "https://public@sentry.example.com/1"
            metrics:
                statsd_host: 127.0.0.1
                statsd_port: 8125
            proxy:
                listener:
                    host: 0.0.0.0
                    port: 8080
                admin_listener:
                    host: 127.0.0.1
                    port: 8081
                collections:
                    - id: 1
                      name: github
                      endpoints:
                          - id: 1
                            name: everything
                            url_pattern: "https://api.github.com/*"
                            min_latency_ms: 100
                            max_latency_ms: 500
                api_keys:
                    - id: 1
                      key: lp_collection
                      collection_ids: [1]
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");

        assert_eq!(config.common.logging.level.as_deref(), Some("info,proxy=debug"));
        let metrics = config.common.metrics.expect("metrics config");
        assert_eq!(metrics.statsd_port, 8125);
        assert_eq!(metrics.prefix, "latency_poison");

        assert_eq!(config.proxy.listener.port, 8080);
        assert_eq!(config.proxy.collections[0].endpoints.len(), 1);
        assert!(config.proxy.validate().expect("valid config").is_empty());
    }

    #[test]
    fn minimal_config() {
        let yaml = r#"
            proxy:
                listener: {host: 0.0.0.0, port: 8080}
                admin_listener: {host: 127.0.0.1, port: 8081}
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");
        assert_eq!(config.common, CommonConfig::default());
        assert!(config.proxy.collections.is_empty());
    }

    #[test]
    fn config_errors() {
        let missing = Config::from_file(std::path::Path::new("/nonexistent/latency-poison.yaml"));
        assert!(matches!(missing, Err(ConfigError::LoadError(_))));

        let tmp = write_tmp_file("logging: {level: info}\n");
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::ParseError(_))
        ));
    }
}
