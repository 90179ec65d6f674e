// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::process;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use logmetrics::{
    cardinality::{CardinalityGuard, CardinalityStore},
    config::{Config, SinkKind},
    intake::SyslogIntake,
    pipeline::PipelineService,
    reporter::RejectionReporter,
    sink::{InfluxSink, Sink, TsdbSink},
};

#[tokio::main]
pub async fn main() {
    let debug_requested = env::var("DEBUG")
        .map(|val| val.to_lowercase() == "true")
        .unwrap_or(false);
    let log_level = if debug_requested {
        "debug".to_string()
    } else {
        env::var("LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or("info".to_string())
    };

    let env_filter = format!("h2=off,hyper=off,rustls=off,sqlx=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!("Error creating config on agent startup: {err}");
            process::exit(1);
        }
    };

    let send_timeout = Duration::from_secs(config.send_timeout);

    // Startup failures below are fatal: there is no retry, the process
    // logs and exits.
    let sink = match config.sink_kind {
        SinkKind::OpenTsdb => {
            match TsdbSink::connect(&config.sink_addr, send_timeout, config.debug).await {
                Ok(sink) => {
                    info!("connected to time-series sink at {}", config.sink_addr);
                    Sink::Tsdb(sink)
                }
                Err(err) => {
                    error!("{err}");
                    process::exit(1);
                }
            }
        }
        SinkKind::Influx => {
            let base_url = config.influx_url.as_deref().unwrap_or_default();
            match InfluxSink::new(base_url, &config.influx_database, send_timeout, config.debug) {
                Ok(sink) => {
                    info!("posting metric batches to {base_url}");
                    Sink::Influx(sink)
                }
                Err(err) => {
                    error!("{err}");
                    process::exit(1);
                }
            }
        }
    };

    let guard = if config.metric_limit_enabled {
        let database_url = config.database_url.as_deref().unwrap_or_default();
        match CardinalityStore::connect(database_url, send_timeout).await {
            Ok(store) => {
                info!(
                    "unique metric limit enabled: {} per application",
                    config.metric_limit
                );
                Some(CardinalityGuard::new(
                    Box::new(store),
                    config.metric_limit,
                    config.on_guard_error,
                    send_timeout,
                ))
            }
            Err(err) => {
                error!("Error establishing cardinality store connection: {err}");
                process::exit(1);
            }
        }
    } else {
        None
    };

    let reporter = match &config.logshuttle_url {
        Some(url) => {
            match RejectionReporter::new(
                url,
                config.reject_pod_label.clone(),
                config.reject_message_limit,
                send_timeout,
            ) {
                Ok(reporter) => Some(reporter),
                Err(err) => {
                    error!("{err}");
                    process::exit(1);
                }
            }
        }
        None => None,
    };

    let (pipeline, pipeline_handle) = PipelineService::new(sink, guard, reporter);
    let worker = tokio::spawn(pipeline.run());

    let cancel_token = CancellationToken::new();
    let intake = match SyslogIntake::bind(
        config.listen_port,
        pipeline_handle.clone(),
        cancel_token.clone(),
    )
    .await
    {
        Ok(intake) => intake,
        Err(err) => {
            error!("{err}");
            process::exit(1);
        }
    };
    info!("intake listening on port {}", config.listen_port);
    tokio::spawn(intake.spin());

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(err) => error!("failed to listen for shutdown signal: {err}"),
    }

    cancel_token.cancel();
    if pipeline_handle.shutdown().is_err() {
        debug!("pipeline worker already stopped");
    }
    if let Err(err) = worker.await {
        error!("pipeline worker task failed: {err}");
    }
}
