// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # logmetrics
//!
//! Extraction, cardinality limiting, and forwarding of application metrics
//! embedded in log streams.
//!
//! Applications annotate their log output with `measure#`, `count#`, and
//! `sample#` markers; this crate recovers those annotations, optionally
//! enforces a per-application cap on distinct metric names against a
//! persistent registry, forwards admitted events to a line-oriented
//! time-series sink, and reports rejected events (rate-limited) back to the
//! owning application's log stream.
//!
//! ## Pipeline
//!
//! ```text
//!   syslog record ──> Extractor ──> CardinalityGuard ──┬─ Admit ──> Sink
//!                                                      └─ Reject ─> RejectionReporter
//! ```
//!
//! Delivery in both outbound directions is at-most-once with no
//! confirmation; the guard fails open by default so metric reporting stays
//! available when the registry is not.

#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]

/// Per-application cardinality limiting against a persistent registry
pub mod cardinality;

/// Environment-driven configuration
pub mod config;

/// Error types for per-event and startup failures
pub mod errors;

/// TCP intake for newline-framed RFC 5424 records
pub mod intake;

/// Extraction of metric events from free-form log messages
pub mod metric;

/// The sequential record-processing worker
pub mod pipeline;

/// Rate-limited rejection reporting
pub mod reporter;

/// Wire formatting and delivery to the time-series sink
pub mod sink;
