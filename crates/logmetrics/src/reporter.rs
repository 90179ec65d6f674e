// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Rate-limited reporting of rejected metrics to a log-aggregation endpoint.
//!
//! When the cardinality guard rejects an event, the owning application gets
//! a structured notification in its own log stream so its developers can
//! see why the metric never reached a dashboard. Reports are rate-limited
//! per (app, kind+metric) for the lifetime of the process, and delivery is
//! at-most-once: transport failures are logged and dropped.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error};

use crate::errors::{ParseError, StartupError};
use crate::metric::MetricKind;

/// Path suffix appended to the configured endpoint base URL.
const LOG_EVENTS_PATH: &str = "/log-events";

#[derive(Debug, Serialize)]
struct RejectionEvent {
    log: String,
    stream: &'static str,
    time: DateTime<Utc>,
    kubernetes: KubernetesSource,
    topic: String,
}

#[derive(Debug, Serialize)]
struct KubernetesSource {
    pod_name: String,
    container_name: String,
}

/// Posts rejection notifications, at most `report_limit` per distinct
/// (app, kind+metric) combination.
///
/// The counter map is owned exclusively by this reporter and lives for the
/// process lifetime; it is bounded in practice by the cardinality limit
/// plus churn. A parallelized pipeline must move it behind a lock or into
/// a shared store.
pub struct RejectionReporter {
    client: reqwest::Client,
    endpoint: String,
    pod_label: String,
    report_limit: u32,
    sent: HashMap<(String, String), u32>,
}

impl RejectionReporter {
    pub fn new(
        base_url: &str,
        pod_label: String,
        report_limit: u32,
        send_timeout: Duration,
    ) -> Result<Self, StartupError> {
        let client = reqwest::Client::builder().timeout(send_timeout).build()?;
        let endpoint = format!("{}{LOG_EVENTS_PATH}", base_url.trim_end_matches('/'));
        Ok(RejectionReporter {
            client,
            endpoint,
            pod_label,
            report_limit,
            sent: HashMap::new(),
        })
    }

    /// Counts the invocation and reports whether it is still under the
    /// limit. The count advances whether or not a report goes out, so the
    /// first N invocations report and the rest drop silently.
    fn should_report(&mut self, app: &str, metric: &str, kind: MetricKind) -> bool {
        let key = (app.to_string(), format!("{kind}{metric}"));
        let count = self.sent.entry(key).or_insert(0);
        let under_limit = *count < self.report_limit;
        *count += 1;
        under_limit
    }

    /// Builds and posts one rejection notification, subject to the rate
    /// limit. Never returns an error: per-event failures are logged and
    /// the pipeline moves on.
    pub async fn maybe_report(&mut self, app: &str, metric: &str, kind: MetricKind) {
        // Keep downstream log scrapers from reading the reported text as a
        // fresh metric annotation.
        let metric = metric.replace('#', "_");

        if !self.should_report(app, &metric, kind) {
            debug!("reject message limit reached for {app}: [{kind}] {metric}");
            return;
        }

        let Some((app_name, app_space)) = app.split_once('-') else {
            error!(
                "cannot report rejection: {}",
                ParseError::MalformedAppId(app.to_string())
            );
            return;
        };

        let event = RejectionEvent {
            log: format!("Unique metrics limit exceeded. Metric discarded: [{kind}] {metric}"),
            stream: "stdout",
            time: Utc::now(),
            kubernetes: KubernetesSource {
                pod_name: self.pod_label.clone(),
                container_name: app_name.to_string(),
            },
            topic: app_space.to_string(),
        };

        match self.client.post(&self.endpoint).json(&event).send().await {
            Ok(resp) if !resp.status().is_success() => {
                error!(
                    "{}: rejection endpoint refused report for {app}",
                    resp.status()
                );
            }
            Ok(_) => {}
            Err(err) => error!("unable to send rejection report for {app}: {err}"),
        }
    }
}
