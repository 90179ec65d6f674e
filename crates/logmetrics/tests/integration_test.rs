// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use async_trait::async_trait;
use mockito::{Matcher, Server};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};

use logmetrics::cardinality::{CardinalityGuard, MetricRegistry};
use logmetrics::config::GuardErrorPolicy;
use logmetrics::intake::LogRecord;
use logmetrics::pipeline::PipelineService;
use logmetrics::reporter::RejectionReporter;
use logmetrics::sink::{InfluxSink, Sink, TsdbSink};

/// A registry with no prior registrations that accepts writes; with a
/// limit of zero it drives every new metric to rejection.
struct EmptyRegistry;

#[async_trait]
impl MetricRegistry for EmptyRegistry {
    async fn metric_exists(&self, _app: &str, _metric: &str) -> Result<bool, sqlx::Error> {
        Ok(false)
    }

    async fn metric_count(&self, _app: &str) -> Result<i64, sqlx::Error> {
        Ok(0)
    }

    async fn register_metric(&self, _app: &str, _metric: &str) -> Result<(), sqlx::Error> {
        Ok(())
    }
}

#[tokio::test]
async fn pipeline_forwards_put_line_with_limiting_disabled() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("unable to bind sink listener");
    let sink_addr = listener.local_addr().expect("no local addr").to_string();

    let sink = TsdbSink::connect(&sink_addr, Duration::from_secs(1), false)
        .await
        .expect("unable to connect sink");

    let (service, handle) = PipelineService::new(Sink::Tsdb(sink), None, None);
    tokio::spawn(service.run());

    handle
        .process(LogRecord {
            hostname: "myapp-prod".to_string(),
            message: "measure#response_time=250ms tag#region=us".to_string(),
        })
        .expect("unable to enqueue record");

    let stats = handle.flush().await.expect("flush failed");
    assert_eq!(stats.forwarded, 1);
    assert_eq!(stats.rejected, 0);

    let (mut conn, _) = listener.accept().await.expect("sink never connected");
    let mut buf = vec![0u8; 256];
    let read = conn.read(&mut buf).await.expect("unable to read put line");
    let line = String::from_utf8(buf[..read].to_vec()).expect("line is not utf-8");

    let expected = regex::Regex::new(
        r"^put measure\.response_time \d+ 250 app=myapp-prod region=us\n$",
    )
    .expect("valid pattern");
    assert!(expected.is_match(&line), "unexpected wire line: {line:?}");

    handle.shutdown().expect("unable to shut down pipeline");
}

#[tokio::test]
async fn rejection_is_reported_once_with_space_topic() {
    let mut mock_server = Server::new_async().await;

    let mock = mock_server
        .mock("POST", "/log-events")
        .match_header("content-type", "application/json")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "log": "Unique metrics limit exceeded. Metric discarded: [measure] response_time",
            "stream": "stdout",
            "topic": "prod",
            "kubernetes": {
                "pod_name": "logmetrics/agent",
                "container_name": "myapp",
            },
        })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    // The sink should stay silent; point the pipeline at a local listener
    // so an unexpected forward would still succeed and show up in stats.
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("unable to bind sink listener");
    let sink_addr = listener.local_addr().expect("no local addr").to_string();
    let sink = TsdbSink::connect(&sink_addr, Duration::from_secs(1), false)
        .await
        .expect("unable to connect sink");

    let guard = CardinalityGuard::new(
        Box::new(EmptyRegistry),
        0,
        GuardErrorPolicy::Admit,
        Duration::from_secs(1),
    );
    let reporter = RejectionReporter::new(
        &mock_server.url(),
        "logmetrics/agent".to_string(),
        1,
        Duration::from_secs(1),
    )
    .expect("unable to build reporter");

    let (service, handle) = PipelineService::new(Sink::Tsdb(sink), Some(guard), Some(reporter));
    tokio::spawn(service.run());

    let record = LogRecord {
        hostname: "myapp-prod".to_string(),
        message: "measure#response_time=250ms tag#region=us".to_string(),
    };

    // Two rejections for the same (app, kind, metric): only the first may
    // produce an outbound report.
    handle.process(record.clone()).expect("unable to enqueue");
    handle.process(record).expect("unable to enqueue");

    let stats = handle.flush().await.expect("flush failed");
    assert_eq!(stats.forwarded, 0);
    assert_eq!(stats.rejected, 2);

    mock.assert_async().await;
    handle.shutdown().expect("unable to shut down pipeline");
}

#[tokio::test]
async fn influx_batch_skips_unparsable_points() {
    let mut mock_server = Server::new_async().await;

    // Full-body match: exactly one point, the unparsable one skipped.
    let mock = mock_server
        .mock("POST", "/write")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("db".into(), "metrics".into()),
            Matcher::UrlEncoded("precision".into(), "ms".into()),
        ]))
        .match_body(Matcher::Regex(
            r"^measure\.heap_size,app=myapp-prod value=1048576 \d+\n$".to_string(),
        ))
        .with_status(204)
        .expect(1)
        .create_async()
        .await;

    let sink = InfluxSink::new(
        &mock_server.url(),
        "metrics",
        Duration::from_secs(1),
        false,
    )
    .expect("unable to build sink");

    let (service, handle) = PipelineService::new(Sink::Influx(sink), None, None);
    tokio::spawn(service.run());

    handle
        .process(LogRecord {
            hostname: "myapp-prod".to_string(),
            message: "[metrics] measure#heap_size=1MB count#broken=1.2.3".to_string(),
        })
        .expect("unable to enqueue record");

    let stats = handle.flush().await.expect("flush failed");
    assert_eq!(stats.forwarded, 2);

    // The batch is posted from a spawned task; poll until it lands.
    let wait = async {
        while !mock.matched_async().await {
            sleep(Duration::from_millis(50)).await;
        }
    };
    timeout(Duration::from_secs(2), wait)
        .await
        .expect("timed out before the sink received the batch");

    mock.assert_async().await;
    handle.shutdown().expect("unable to shut down pipeline");
}
