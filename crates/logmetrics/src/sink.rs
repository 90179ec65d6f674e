// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Serialization and delivery of admitted metric events.
//!
//! Two sink variants are supported. The default writes one `put` line per
//! event to an already-open TCP connection (the OpenTSDB telnet-style
//! protocol). The alternate batches all of a record's points into a single
//! line-protocol request keyed by a configured database and posts it from a
//! spawned task so the pipeline worker never blocks on sink I/O.
//!
//! Delivery is at-most-once with no confirmation: write and post failures
//! are logged and otherwise dropped, and callers must not assume retries.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::errors::StartupError;
use crate::metric::MetricEvent;

/// Formats one event as a sink wire line:
/// `put <kind>.<name> <timestamp_ms> <value> app=<app>[ <k>=<v> ...]\n`.
///
/// Deterministic: identical inputs produce byte-identical lines.
#[must_use]
pub fn format_put_line(event: &MetricEvent) -> String {
    let mut line = format!(
        "put {}.{} {} {} app={}",
        event.kind, event.name, event.timestamp_ms, event.value, event.app
    );
    for (key, value) in &event.tags {
        line.push(' ');
        line.push_str(key);
        line.push('=');
        line.push_str(value);
    }
    line.push('\n');
    line
}

/// Line-oriented TCP sink. One `put` line per event, fire-and-forget.
pub struct TsdbSink {
    stream: TcpStream,
    write_timeout: Duration,
    debug_echo: bool,
}

impl TsdbSink {
    /// Opens the transport connection. Failure here is fatal to startup.
    pub async fn connect(
        addr: &str,
        write_timeout: Duration,
        debug_echo: bool,
    ) -> Result<Self, StartupError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| StartupError::SinkConnect {
                addr: addr.to_string(),
                source,
            })?;
        Ok(TsdbSink {
            stream,
            write_timeout,
            debug_echo,
        })
    }

    /// Writes one event to the sink. Errors and timeouts are logged, never
    /// surfaced; each line is self-timestamped so a dropped write loses
    /// only that point.
    pub async fn send(&mut self, event: &MetricEvent) {
        let line = format_put_line(event);
        if self.debug_echo {
            debug!("{}", line.trim_end());
        }
        match timeout(self.write_timeout, self.stream.write_all(line.as_bytes())).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!("failed to write metric line to sink: {err}"),
            Err(_) => error!(
                "timed out writing metric line to sink after {:?}",
                self.write_timeout
            ),
        }
    }
}

/// Builds one line-protocol point: `<kind>.<name>,app=<app>[,k=v] value=<v> <ts>`.
///
/// Fails when the normalized value does not parse as a number; the caller
/// skips the point rather than aborting the batch.
pub fn line_protocol_point(event: &MetricEvent) -> Result<String, std::num::ParseFloatError> {
    let value: f64 = event.value.parse()?;
    let mut point = format!(
        "{}.{},app={}",
        escape_tag(event.kind.as_str()),
        escape_tag(&event.name),
        escape_tag(&event.app)
    );
    for (key, tag_value) in &event.tags {
        point.push(',');
        point.push_str(&escape_tag(key));
        point.push('=');
        point.push_str(&escape_tag(tag_value));
    }
    point.push_str(&format!(" value={value} {}", event.timestamp_ms));
    Ok(point)
}

/// Escapes the characters line protocol reserves in identifiers and tags.
fn escape_tag(raw: &str) -> String {
    raw.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}

/// Batched HTTP sink keyed by a configured database name.
#[derive(Clone)]
pub struct InfluxSink {
    client: reqwest::Client,
    write_url: String,
    debug_echo: bool,
}

impl InfluxSink {
    pub fn new(
        base_url: &str,
        database: &str,
        send_timeout: Duration,
        debug_echo: bool,
    ) -> Result<Self, StartupError> {
        let client = reqwest::Client::builder().timeout(send_timeout).build()?;
        let write_url = format!(
            "{}/write?db={}&precision=ms",
            base_url.trim_end_matches('/'),
            database
        );
        Ok(InfluxSink {
            client,
            write_url,
            debug_echo,
        })
    }

    /// Posts all of a record's points as one batch from a spawned task.
    ///
    /// Points that fail to build are skipped with a diagnostic; the batch
    /// itself is posted at-most-once with no retry.
    pub fn send_batch(&self, events: &[MetricEvent]) {
        let mut body = String::new();
        for event in events {
            match line_protocol_point(event) {
                Ok(point) => {
                    if self.debug_echo {
                        debug!("{point}");
                    }
                    body.push_str(&point);
                    body.push('\n');
                }
                Err(err) => warn!(
                    "skipping point {}.{}: unparsable value {:?}: {err}",
                    event.kind, event.name, event.value
                ),
            }
        }
        if body.is_empty() {
            return;
        }

        let client = self.client.clone();
        let url = self.write_url.clone();
        tokio::spawn(async move {
            match client.post(&url).body(body).send().await {
                Ok(resp) if !resp.status().is_success() => {
                    error!("{}: sink rejected metric batch", resp.status());
                }
                Ok(_) => {}
                Err(err) => error!("failed to post metric batch: {err}"),
            }
        });
    }
}

/// Dispatch over the configured sink variant.
pub enum Sink {
    Tsdb(TsdbSink),
    Influx(InfluxSink),
}

impl Sink {
    /// Delivers all admitted events extracted from one record.
    pub async fn send_all(&mut self, events: &[MetricEvent]) {
        match self {
            Sink::Tsdb(sink) => {
                for event in events {
                    sink.send(event).await;
                }
            }
            Sink::Influx(sink) => sink.send_batch(events),
        }
    }
}
