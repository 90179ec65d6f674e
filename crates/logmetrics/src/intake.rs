// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! TCP intake for newline-framed RFC 5424 records.
//!
//! The transport is deliberately thin: it recovers the hostname (the
//! application identifier) and the free-text message from each frame and
//! hands them to the pipeline one record at a time. Malformed frames and
//! frames without a hostname are skipped with a diagnostic; they must never
//! take the worker down.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::errors::{ParseError, StartupError};
use crate::pipeline::PipelineHandle;

/// One inbound record: the application identifier and the raw message the
/// extractor will scan.
#[derive(Clone, Debug, PartialEq)]
pub struct LogRecord {
    pub hostname: String,
    pub message: String,
}

/// Parses one RFC 5424 frame into a [`LogRecord`].
///
/// Header layout: `<PRI>VERSION TIMESTAMP HOSTNAME APP-NAME PROCID MSGID`
/// followed by structured data and the message. Only the hostname and the
/// message are kept; structured-data elements are stripped, not parsed.
pub fn parse_frame(frame: &str) -> Result<LogRecord, ParseError> {
    let frame = frame.trim_end_matches('\r');
    let (_pri, rest) = frame
        .strip_prefix('<')
        .and_then(|tail| tail.split_once('>'))
        .ok_or_else(|| ParseError::MalformedFrame("missing priority".to_string()))?;

    let mut fields = rest.splitn(7, ' ');
    let _version = fields
        .next()
        .ok_or_else(|| ParseError::MalformedFrame("missing version".to_string()))?;
    let _timestamp = fields
        .next()
        .ok_or_else(|| ParseError::MalformedFrame("missing timestamp".to_string()))?;
    let hostname = fields.next().ok_or(ParseError::MissingHostname)?;
    let _app_name = fields.next();
    let _procid = fields.next();
    let _msgid = fields.next();
    let tail = fields.next().unwrap_or("");

    if hostname.is_empty() || hostname == "-" {
        return Err(ParseError::MissingHostname);
    }

    let message = strip_structured_data(tail)
        .trim_start_matches('\u{feff}')
        .to_string();

    Ok(LogRecord {
        hostname: hostname.to_string(),
        message,
    })
}

/// Drops the structured-data section (`-` or one or more `[...]` elements)
/// from the frame tail, leaving the free-text message.
fn strip_structured_data(tail: &str) -> &str {
    if let Some(rest) = tail.strip_prefix('-') {
        return rest.strip_prefix(' ').unwrap_or(rest);
    }
    let mut rest = tail;
    while rest.starts_with('[') {
        match rest.find(']') {
            Some(end) => rest = &rest[end + 1..],
            None => return "",
        }
    }
    rest.strip_prefix(' ').unwrap_or(rest)
}

/// Accepts intake connections and feeds parsed records to the pipeline.
pub struct SyslogIntake {
    listener: TcpListener,
    pipeline: PipelineHandle,
    cancel_token: CancellationToken,
}

impl SyslogIntake {
    /// Binds the intake listener. Failure here is fatal to startup.
    pub async fn bind(
        port: u16,
        pipeline: PipelineHandle,
        cancel_token: CancellationToken,
    ) -> Result<Self, StartupError> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|source| StartupError::IntakeBind { port, source })?;
        Ok(SyslogIntake {
            listener,
            pipeline,
            cancel_token,
        })
    }

    /// Accept loop; runs until cancelled. Each connection gets its own
    /// reader task so one stalled sender cannot block the others.
    pub async fn spin(self) {
        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("intake connection from {peer}");
                        let pipeline = self.pipeline.clone();
                        let cancel_token = self.cancel_token.clone();
                        tokio::spawn(read_records(stream, pipeline, cancel_token));
                    }
                    Err(err) => error!("failed to accept intake connection: {err}"),
                },
            }
        }
        debug!("intake listener stopped");
    }
}

async fn read_records(
    stream: TcpStream,
    pipeline: PipelineHandle,
    cancel_token: CancellationToken,
) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(frame)) => match parse_frame(&frame) {
                    Ok(record) => {
                        // A closed pipeline means shutdown is in progress.
                        if pipeline.process(record).is_err() {
                            break;
                        }
                    }
                    Err(err) => debug!("skipping record: {err}"),
                },
                Ok(None) => break,
                Err(err) => {
                    error!("intake read error: {err}");
                    break;
                }
            },
        }
    }
}
