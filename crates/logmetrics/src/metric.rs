// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Extraction of structured metric events from free-form log messages.
//!
//! Applications embed metrics in their log output as
//! `measure#name=value`, `count#name=value`, or `sample#name=value`
//! annotations, optionally accompanied by ` tag#key=value` annotations
//! elsewhere in the same message. The [`Extractor`] recovers these with
//! pattern matching only; it holds no state and has no side effects.

use std::fmt;

use regex::Regex;
use tracing::warn;

/// Messages carrying this substring are synthetic client traffic and are
/// discarded without producing any events.
const SYNTHETIC_TRAFFIC_SENTINEL: &str = "v-user-client-metrics";

/// Unit suffixes only rescale the value when the message carries this
/// marker; it guards against unit-like runs in unrelated text.
const UNIT_CONVERSION_MARKER: &str = "[metrics]";

/// The three recognized metric kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Measure,
    Count,
    Sample,
}

impl MetricKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Measure => "measure",
            MetricKind::Count => "count",
            MetricKind::Sample => "sample",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One metric annotation recovered from a message, before the record's
/// application identifier and processing timestamp are attached.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtractedMetric {
    pub kind: MetricKind,
    pub name: String,
    /// Decimal string exactly as captured from the source text.
    pub raw_value: String,
    /// Non-whitespace run immediately following the value; may be empty.
    pub unit: String,
    /// Normalized value: unit-converted when applicable, rendered as the
    /// shortest decimal string that round-trips the f64 value.
    pub value: String,
}

/// Everything recovered from one message: the metric annotations plus the
/// ordered tag list collected from all ` tag#k=v` annotations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Extraction {
    pub metrics: Vec<ExtractedMetric>,
    pub tags: Vec<(String, String)>,
}

/// A fully-assembled metric event, ready for serialization.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricEvent {
    pub kind: MetricKind,
    pub name: String,
    pub raw_value: String,
    pub unit: String,
    pub value: String,
    /// Source application identifier (the record's hostname field).
    pub app: String,
    /// Resolved tag mapping: first-seen key order, last-seen value.
    pub tags: Vec<(String, String)>,
    /// Wall-clock time the event was processed, not parsed from the log.
    pub timestamp_ms: i64,
}

impl MetricEvent {
    #[must_use]
    pub fn assemble(
        metric: ExtractedMetric,
        app: &str,
        tags: Vec<(String, String)>,
        timestamp_ms: i64,
    ) -> Self {
        MetricEvent {
            kind: metric.kind,
            name: metric.name,
            raw_value: metric.raw_value,
            unit: metric.unit,
            value: metric.value,
            app: app.to_string(),
            tags,
            timestamp_ms,
        }
    }
}

/// Stateless regex-based extractor for metric and tag annotations.
pub struct Extractor {
    metric_re: Regex,
    tag_re: Regex,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor {
    #[must_use]
    pub fn new() -> Self {
        #[allow(clippy::expect_used)]
        let metric_re = Regex::new(r"(measure|count|sample)#(\S*)=([0-9.]+)(\S*)")
            .expect("hard-coded metric pattern is valid");
        #[allow(clippy::expect_used)]
        let tag_re = Regex::new(r" tag#(\S*)=(\S*)").expect("hard-coded tag pattern is valid");
        Extractor { metric_re, tag_re }
    }

    /// Extracts all metric annotations and tags present in `message`.
    ///
    /// Returns an empty extraction for messages flagged as synthetic
    /// traffic. Pure function of its input.
    #[must_use]
    pub fn extract(&self, message: &str) -> Extraction {
        if message.contains(SYNTHETIC_TRAFFIC_SENTINEL) {
            return Extraction::default();
        }

        let convert_units = message.contains(UNIT_CONVERSION_MARKER);

        let metrics = self
            .metric_re
            .captures_iter(message)
            .map(|caps| {
                let kind = match &caps[1] {
                    "measure" => MetricKind::Measure,
                    "count" => MetricKind::Count,
                    _ => MetricKind::Sample,
                };
                let raw_value = caps[3].to_string();
                let unit = caps[4].to_string();
                let value = normalize_value(&raw_value, &unit, convert_units);
                ExtractedMetric {
                    kind,
                    name: caps[2].to_string(),
                    raw_value,
                    unit,
                    value,
                }
            })
            .collect();

        let tags = self
            .tag_re
            .captures_iter(message)
            .map(|caps| (caps[1].to_string(), caps[2].to_string()))
            .collect();

        Extraction { metrics, tags }
    }
}

/// Binary multiplier for a recognized unit suffix.
fn unit_multiplier(unit: &str) -> Option<f64> {
    match unit {
        "KB" => Some(1024.0),
        "MB" => Some(1_048_576.0),
        "GB" => Some(1_073_741_824.0),
        _ => None,
    }
}

/// Renders the (possibly unit-converted) value as the shortest decimal
/// string that round-trips the f64, no scientific notation.
///
/// A numeric parse failure is non-fatal: it is logged and the captured raw
/// string passes through unchanged.
#[must_use]
pub fn normalize_value(raw: &str, unit: &str, convert_units: bool) -> String {
    let parsed = match raw.parse::<f64>() {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!("unparsable metric value {raw:?}: {err}");
            return raw.to_string();
        }
    };

    match unit_multiplier(unit) {
        Some(multiplier) if convert_units => format!("{}", parsed * multiplier),
        _ => format!("{parsed}"),
    }
}

/// Resolves an ordered tag list into the mapping used at serialization
/// time: a key keeps its first-seen position but its last-seen value.
#[must_use]
pub fn resolve_tags(tags: &[(String, String)]) -> Vec<(String, String)> {
    let mut resolved: Vec<(String, String)> = Vec::with_capacity(tags.len());
    for (key, value) in tags {
        match resolved.iter_mut().find(|(seen, _)| seen == key) {
            Some(entry) => entry.1 = value.clone(),
            None => resolved.push((key.clone(), value.clone())),
        }
    }
    resolved
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_single_measure() {
        let extraction = Extractor::new().extract("GET /works measure#foo=10");
        assert_eq!(extraction.metrics.len(), 1);
        let metric = &extraction.metrics[0];
        assert_eq!(metric.kind, MetricKind::Measure);
        assert_eq!(metric.name, "foo");
        assert_eq!(metric.raw_value, "10");
        assert_eq!(metric.value, "10");
        assert!(metric.unit.is_empty());
    }

    #[test]
    fn test_extract_multiple_kinds() {
        let extraction = Extractor::new()
            .extract("count#requests=1 sample#queue_depth=17 measure#latency=3.5");
        let kinds: Vec<MetricKind> = extraction.metrics.iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds,
            vec![MetricKind::Count, MetricKind::Sample, MetricKind::Measure]
        );
    }

    #[test]
    fn test_extract_collects_tags_in_order() {
        let extraction =
            Extractor::new().extract("measure#x=1 tag#region=us tag#zone=a tag#region=eu");
        assert_eq!(
            extraction.tags,
            vec![
                ("region".to_string(), "us".to_string()),
                ("zone".to_string(), "a".to_string()),
                ("region".to_string(), "eu".to_string()),
            ]
        );
    }

    #[test]
    fn test_resolve_tags_last_write_wins() {
        let tags = vec![
            ("a".to_string(), "1".to_string()),
            ("a".to_string(), "2".to_string()),
        ];
        assert_eq!(resolve_tags(&tags), vec![("a".to_string(), "2".to_string())]);
    }

    #[test]
    fn test_resolve_tags_keeps_first_seen_position() {
        let tags = vec![
            ("region".to_string(), "us".to_string()),
            ("zone".to_string(), "a".to_string()),
            ("region".to_string(), "eu".to_string()),
        ];
        assert_eq!(
            resolve_tags(&tags),
            vec![
                ("region".to_string(), "eu".to_string()),
                ("zone".to_string(), "a".to_string()),
            ]
        );
    }

    #[test]
    fn test_synthetic_traffic_is_discarded() {
        let extraction =
            Extractor::new().extract("v-user-client-metrics measure#foo=10 tag#a=b");
        assert!(extraction.metrics.is_empty());
        assert!(extraction.tags.is_empty());
    }

    #[test]
    fn test_unit_conversion_requires_marker() {
        let extractor = Extractor::new();

        let converted = extractor.extract("[metrics] measure#mem=10MB");
        assert_eq!(converted.metrics[0].value, "10485760");
        assert_eq!(converted.metrics[0].raw_value, "10");
        assert_eq!(converted.metrics[0].unit, "MB");

        let unconverted = extractor.extract("measure#mem=10MB");
        assert_eq!(unconverted.metrics[0].value, "10");
        assert_eq!(unconverted.metrics[0].unit, "MB");
    }

    #[test]
    fn test_unit_multipliers_are_binary() {
        assert_eq!(normalize_value("1", "KB", true), "1024");
        assert_eq!(normalize_value("1", "MB", true), "1048576");
        assert_eq!(normalize_value("1", "GB", true), "1073741824");
    }

    #[test]
    fn test_fractional_conversion_has_no_forced_zeros() {
        assert_eq!(normalize_value("0.5", "MB", true), "524288");
        assert_eq!(normalize_value("0.1", "KB", true), "102.4");
    }

    #[test]
    fn test_unrecognized_unit_leaves_value_unchanged() {
        assert_eq!(normalize_value("250", "ms", true), "250");
        assert_eq!(normalize_value("250", "", true), "250");
    }

    #[test]
    fn test_value_is_rendered_minimally() {
        assert_eq!(normalize_value("10.50", "", false), "10.5");
        assert_eq!(normalize_value("3.0", "", false), "3");
    }

    #[test]
    fn test_unparsable_value_falls_back_to_raw() {
        assert_eq!(normalize_value("1.2.3", "MB", true), "1.2.3");
        assert_eq!(normalize_value("...", "", false), "...");
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_unparsable_value_is_logged_not_fatal() {
        let extraction = Extractor::new().extract("[metrics] count#broken=1.2.3 measure#ok=1");
        assert_eq!(extraction.metrics.len(), 2);
        assert!(logs_contain("unparsable metric value"));
    }

    #[test]
    fn test_extract_value_with_trailing_unit_run() {
        let extraction = Extractor::new().extract("measure#response_time=250ms tag#region=us");
        let metric = &extraction.metrics[0];
        assert_eq!(metric.name, "response_time");
        assert_eq!(metric.raw_value, "250");
        assert_eq!(metric.unit, "ms");
        assert_eq!(metric.value, "250");
    }

    #[test]
    fn test_message_without_annotations() {
        let extraction = Extractor::new().extract("plain application output");
        assert!(extraction.metrics.is_empty());
        assert!(extraction.tags.is_empty());
    }
}
