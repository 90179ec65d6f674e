// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Environment-driven configuration for the pipeline.

use crate::errors::StartupError;
use std::env;

/// Default cap on distinct metric names per application.
pub const DEFAULT_METRIC_LIMIT: i64 = 100;
/// Default number of rejection reports per (app, metric) combination.
pub const DEFAULT_REJECT_MESSAGE_LIMIT: u32 = 1;
/// Well-known in-cluster rejection endpoint, used when limiting is enabled
/// but no endpoint is configured.
pub const DEFAULT_LOGSHUTTLE_URL: &str = "http://logshuttle.logmetrics-system.svc.cluster.local";
/// Default `kubernetes.pod_name` label attached to rejection reports.
pub const DEFAULT_REJECT_POD_LABEL: &str = "logmetrics/agent";
/// Default port the syslog intake binds to.
pub const DEFAULT_LISTEN_PORT: u16 = 1514;
/// Default bound on sink writes, store connection acquisition, and report posts.
pub const DEFAULT_SEND_TIMEOUT_SECS: u64 = 5;

/// Outcome applied when the cardinality store is unreachable or errors.
///
/// The default is `Admit`: availability of metrics reporting is valued over
/// strict limit enforcement. Stricter deployments can flip this to `Reject`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardErrorPolicy {
    Admit,
    Reject,
}

/// Which time-series sink variant to forward admitted events to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkKind {
    /// Line-oriented `put` protocol over a raw TCP connection.
    OpenTsdb,
    /// Batched line-protocol posts keyed by a database name.
    Influx,
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the syslog record source binds to.
    pub listen_port: u16,
    /// host:port of the time-series transport (OpenTSDB variant).
    pub sink_addr: String,
    /// Which sink variant to use.
    pub sink_kind: SinkKind,
    /// Base URL of the Influx-style sink (Influx variant only).
    pub influx_url: Option<String>,
    /// Database name batches are keyed by (Influx variant only).
    pub influx_database: String,
    /// Connection string for the cardinality store.
    pub database_url: Option<String>,
    /// Whether the per-application unique metric limit is enforced.
    pub metric_limit_enabled: bool,
    /// Cap on distinct metric names per application.
    pub metric_limit: i64,
    /// Rejection-report endpoint base URL.
    pub logshuttle_url: Option<String>,
    /// Max rejection reports per (app, metric) combination.
    pub reject_message_limit: u32,
    /// `kubernetes.pod_name` label carried in rejection reports.
    pub reject_pod_label: String,
    /// Outcome applied on cardinality store errors.
    pub on_guard_error: GuardErrorPolicy,
    /// Echo formatted sink lines and guard decisions to the diagnostic log.
    pub debug: bool,
    /// Bound, in seconds, on sink writes and outbound HTTP posts.
    pub send_timeout: u64,
    /// Log level (e.g., trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_LISTEN_PORT,
            sink_addr: String::new(),
            sink_kind: SinkKind::OpenTsdb,
            influx_url: None,
            influx_database: "metrics".to_string(),
            database_url: None,
            metric_limit_enabled: false,
            metric_limit: DEFAULT_METRIC_LIMIT,
            logshuttle_url: None,
            reject_message_limit: DEFAULT_REJECT_MESSAGE_LIMIT,
            reject_pod_label: DEFAULT_REJECT_POD_LABEL.to_string(),
            on_guard_error: GuardErrorPolicy::Admit,
            debug: false,
            send_timeout: DEFAULT_SEND_TIMEOUT_SECS,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Create configuration from environment variables.
    pub fn from_env() -> Result<Self, StartupError> {
        let listen_port = env::var("PORT")
            .ok()
            .and_then(|port| port.parse::<u16>().ok())
            .unwrap_or(DEFAULT_LISTEN_PORT);
        let sink_addr = env::var("OPENTSDB_IP").unwrap_or_default();
        let sink_kind = match env::var("METRICS_SINK").map(|val| val.to_lowercase()) {
            Ok(ref kind) if kind == "influxdb" => SinkKind::Influx,
            _ => SinkKind::OpenTsdb,
        };
        let influx_url = env::var("INFLUX_URL").ok();
        let influx_database =
            env::var("INFLUX_DATABASE").unwrap_or_else(|_| "metrics".to_string());
        let database_url = env::var("DATABASE_URL").ok();
        let metric_limit_enabled = env::var("ENABLE_UNIQUE_METRIC_LIMIT")
            .map(|val| val.to_lowercase() == "true")
            .unwrap_or(false);
        // Default applies when unset or unparsable.
        let metric_limit = env::var("UNIQUE_METRIC_LIMIT")
            .ok()
            .and_then(|limit| limit.parse::<i64>().ok())
            .unwrap_or(DEFAULT_METRIC_LIMIT);
        let logshuttle_url = match env::var("LOGSHUTTLE_URL") {
            Ok(url) if !url.trim().is_empty() => Some(url),
            _ if metric_limit_enabled => Some(DEFAULT_LOGSHUTTLE_URL.to_string()),
            _ => None,
        };
        let reject_message_limit = env::var("REJECT_MESSAGE_LIMIT")
            .ok()
            .and_then(|limit| limit.parse::<u32>().ok())
            .unwrap_or(DEFAULT_REJECT_MESSAGE_LIMIT);
        let reject_pod_label =
            env::var("REJECT_POD_LABEL").unwrap_or_else(|_| DEFAULT_REJECT_POD_LABEL.to_string());
        let on_guard_error = match env::var("ON_GUARD_ERROR").map(|val| val.to_lowercase()) {
            Ok(ref policy) if policy == "reject" => GuardErrorPolicy::Reject,
            _ => GuardErrorPolicy::Admit,
        };
        let debug = env::var("DEBUG")
            .map(|val| val.to_lowercase() == "true")
            .unwrap_or(false);
        let send_timeout = env::var("SEND_TIMEOUT")
            .ok()
            .and_then(|secs| secs.parse::<u64>().ok())
            .unwrap_or(DEFAULT_SEND_TIMEOUT_SECS);
        let log_level = env::var("LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or_else(|_| "info".to_string());

        let config = Self {
            listen_port,
            sink_addr,
            sink_kind,
            influx_url,
            influx_database,
            database_url,
            metric_limit_enabled,
            metric_limit,
            logshuttle_url,
            reject_message_limit,
            reject_pod_label,
            on_guard_error,
            debug,
            send_timeout,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), StartupError> {
        if self.listen_port == 0 {
            return Err(StartupError::InvalidConfig(
                "listen port must be greater than 0".to_string(),
            ));
        }

        match self.sink_kind {
            SinkKind::OpenTsdb => {
                if self.sink_addr.trim().is_empty() {
                    return Err(StartupError::InvalidConfig(
                        "OPENTSDB_IP must be set for the OpenTSDB sink".to_string(),
                    ));
                }
            }
            SinkKind::Influx => {
                if self.influx_url.as_deref().map_or(true, |url| url.trim().is_empty()) {
                    return Err(StartupError::InvalidConfig(
                        "INFLUX_URL must be set for the InfluxDB sink".to_string(),
                    ));
                }
            }
        }

        if self.metric_limit_enabled && self.database_url.is_none() {
            return Err(StartupError::InvalidConfig(
                "DATABASE_URL must be set when ENABLE_UNIQUE_METRIC_LIMIT is true".to_string(),
            ));
        }

        if self.metric_limit < 0 {
            return Err(StartupError::InvalidConfig(
                "unique metric limit cannot be negative".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(StartupError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            sink_addr: "tsdb.example.com:4242".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn test_default_config_limits() {
        let config = Config::default();
        assert_eq!(config.metric_limit, 100);
        assert_eq!(config.reject_message_limit, 1);
        assert_eq!(config.on_guard_error, GuardErrorPolicy::Admit);
        assert!(!config.metric_limit_enabled);
    }

    #[test]
    fn test_validate_accepts_valid_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_port() {
        let config = Config {
            listen_port: 0,
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_sink_address() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_influx_url_for_influx_sink() {
        let config = Config {
            sink_kind: SinkKind::Influx,
            influx_url: None,
            ..valid_config()
        };
        assert!(config.validate().is_err());

        let config = Config {
            sink_kind: SinkKind::Influx,
            influx_url: Some("http://influx.example.com:8086".to_string()),
            sink_addr: String::new(),
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_requires_store_url_when_limiting() {
        let config = Config {
            metric_limit_enabled: true,
            database_url: None,
            ..valid_config()
        };
        assert!(config.validate().is_err());

        let config = Config {
            metric_limit_enabled: true,
            database_url: Some("postgres://localhost/metrics".to_string()),
            ..valid_config()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_log_level() {
        let config = Config {
            log_level: "verbose".to_string(),
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }
}
