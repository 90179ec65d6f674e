// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The pipeline worker: one long-lived task consuming records in order.
//!
//! Per-record processing is sequential: extraction, then one guard check
//! per event, then delivery of the admitted events and reporting of the
//! rejected ones. No error from one record may stop the worker; every
//! failure is absorbed at the point of occurrence and converted into a
//! diagnostic plus a safe default. The loop ends when the record source
//! closes or a shutdown command arrives.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::cardinality::{CardinalityGuard, GuardDecision};
use crate::intake::LogRecord;
use crate::metric::{resolve_tags, Extractor, MetricEvent};
use crate::reporter::RejectionReporter;
use crate::sink::Sink;

#[derive(Debug)]
pub enum PipelineCommand {
    Process(LogRecord),
    Flush(oneshot::Sender<PipelineStats>),
    Shutdown,
}

/// Running totals, exposed through [`PipelineHandle::flush`]. Because the
/// command channel is ordered, a flush also acts as a completion barrier
/// for every record sent before it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub records: u64,
    pub forwarded: u64,
    pub rejected: u64,
}

#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::UnboundedSender<PipelineCommand>,
}

impl PipelineHandle {
    pub fn process(
        &self,
        record: LogRecord,
    ) -> Result<(), mpsc::error::SendError<PipelineCommand>> {
        self.tx.send(PipelineCommand::Process(record))
    }

    pub async fn flush(&self) -> Result<PipelineStats, String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(PipelineCommand::Flush(response_tx))
            .map_err(|e| format!("Failed to send flush command: {}", e))?;

        response_rx
            .await
            .map_err(|e| format!("Failed to receive flush response: {}", e))
    }

    pub fn shutdown(&self) -> Result<(), mpsc::error::SendError<PipelineCommand>> {
        self.tx.send(PipelineCommand::Shutdown)
    }
}

/// Owns the extractor, the optional guard and reporter, and the sink.
pub struct PipelineService {
    rx: mpsc::UnboundedReceiver<PipelineCommand>,
    extractor: Extractor,
    guard: Option<CardinalityGuard>,
    sink: Sink,
    reporter: Option<RejectionReporter>,
    stats: PipelineStats,
}

impl PipelineService {
    #[must_use]
    pub fn new(
        sink: Sink,
        guard: Option<CardinalityGuard>,
        reporter: Option<RejectionReporter>,
    ) -> (Self, PipelineHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = PipelineService {
            rx,
            extractor: Extractor::new(),
            guard,
            sink,
            reporter,
            stats: PipelineStats::default(),
        };
        (service, PipelineHandle { tx })
    }

    pub async fn run(mut self) {
        debug!("pipeline worker started");

        while let Some(command) = self.rx.recv().await {
            match command {
                PipelineCommand::Process(record) => self.process_record(record).await,

                PipelineCommand::Flush(response_tx) => {
                    if response_tx.send(self.stats).is_err() {
                        error!("failed to send flush response - receiver dropped");
                    }
                }

                PipelineCommand::Shutdown => {
                    debug!("pipeline worker shutting down");
                    break;
                }
            }
        }

        debug!("pipeline worker stopped");
    }

    /// Processes one record to completion: no mid-record cancellation, no
    /// error propagation past this frame.
    async fn process_record(&mut self, record: LogRecord) {
        self.stats.records += 1;

        let extraction = self.extractor.extract(&record.message);
        if extraction.metrics.is_empty() {
            return;
        }

        let tags = resolve_tags(&extraction.tags);
        let timestamp_ms = epoch_millis();

        let mut admitted = Vec::with_capacity(extraction.metrics.len());
        for metric in extraction.metrics {
            let decision = match &self.guard {
                Some(guard) => guard.check(&record.hostname, &metric.name).await,
                None => GuardDecision::Admit,
            };

            match decision {
                GuardDecision::Admit => {
                    admitted.push(MetricEvent::assemble(
                        metric,
                        &record.hostname,
                        tags.clone(),
                        timestamp_ms,
                    ));
                }
                GuardDecision::Reject => {
                    self.stats.rejected += 1;
                    if let Some(reporter) = &mut self.reporter {
                        reporter
                            .maybe_report(&record.hostname, &metric.name, metric.kind)
                            .await;
                    }
                }
            }
        }

        if !admitted.is_empty() {
            self.stats.forwarded += admitted.len() as u64;
            self.sink.send_all(&admitted).await;
        }
    }
}

/// Wall-clock milliseconds since the epoch; the processing timestamp
/// attached to every event.
fn epoch_millis() -> i64 {
    std::time::UNIX_EPOCH
        .elapsed()
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}
