// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the log metrics pipeline.

use crate::cardinality::CardinalityStoreError;

/// Per-event failures. These are logged and the offending event or record is
/// skipped; they never stop the pipeline worker.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("record is missing a hostname field")]
    MissingHostname,

    #[error("application identifier {0:?} has no name/space separator")]
    MalformedAppId(String),
}

/// Fatal initialization failures. Any of these at startup terminates the
/// process; there is no startup retry.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to connect to time-series sink at {addr}: {source}")]
    SinkConnect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Failed to open cardinality store: {0}")]
    Store(#[from] CardinalityStoreError),

    #[error("Failed to bind intake listener on port {port}: {source}")]
    IntakeBind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}
