// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-application cardinality limiting backed by a persistent registry.
//!
//! Each application may register at most a configured number of distinct
//! metric names. Registered names stay admitted indefinitely; the registry
//! rows are never updated or physically removed by this pipeline (the
//! `deleted` flag is managed externally).
//!
//! The guard fails open by default: when the registry is unreachable the
//! pipeline keeps forwarding rather than enforcing the limit. The policy is
//! explicit and can be flipped per deployment via [`GuardErrorPolicy`].

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::time::timeout;
use tracing::{debug, error};

use crate::config::GuardErrorPolicy;

/// Upper bound on pooled store connections.
const MAX_STORE_CONNECTIONS: u32 = 20;

/// Errors from opening or migrating the cardinality store. Both are fatal
/// at startup; query-time errors are not represented here because they are
/// absorbed by the guard's error policy.
#[derive(Debug, thiserror::Error)]
pub enum CardinalityStoreError {
    #[error("failed to open connection pool: {0}")]
    SetupFailed(sqlx::Error),

    #[error("failed to run migrations: {0}")]
    MigrationFailed(#[from] sqlx::migrate::MigrateError),
}

/// The persistent registry consulted by the guard.
///
/// Abstracted behind a trait so the guard's decision logic can be exercised
/// without a live database.
#[async_trait]
pub trait MetricRegistry: Send + Sync {
    /// Whether a non-deleted record exists for (app, metric).
    async fn metric_exists(&self, app: &str, metric: &str) -> Result<bool, sqlx::Error>;

    /// Number of non-deleted records for `app`.
    async fn metric_count(&self, app: &str) -> Result<i64, sqlx::Error>;

    /// Registers (app, metric). A uniqueness conflict is not an error: it
    /// means a concurrent racer registered the same name first, and both
    /// admissions stand.
    async fn register_metric(&self, app: &str, metric: &str) -> Result<(), sqlx::Error>;
}

/// Postgres-backed [`MetricRegistry`].
pub struct CardinalityStore {
    pool: PgPool,
}

impl CardinalityStore {
    /// Opens the pool and runs the embedded migrations.
    ///
    /// The registry table and its partial unique index are created if missing;
    /// a migration failure is fatal to startup.
    pub async fn connect(
        database_url: &str,
        acquire_timeout: Duration,
    ) -> Result<Self, CardinalityStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_STORE_CONNECTIONS)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await
            .map_err(CardinalityStoreError::SetupFailed)?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(CardinalityStore { pool })
    }
}

#[async_trait]
impl MetricRegistry for CardinalityStore {
    async fn metric_exists(&self, app: &str, metric: &str) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM app_metrics WHERE app = $1 AND metric = $2 AND NOT deleted)",
        )
        .bind(app)
        .bind(metric)
        .fetch_one(&self.pool)
        .await
    }

    async fn metric_count(&self, app: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM app_metrics WHERE app = $1 AND NOT deleted",
        )
        .bind(app)
        .fetch_one(&self.pool)
        .await
    }

    async fn register_metric(&self, app: &str, metric: &str) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO app_metrics (app, metric) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(app)
            .bind(metric)
            .execute(&self.pool)
            .await
            .map(|_| ())
    }
}

/// The guard's binary decision on whether an event may be forwarded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardDecision {
    Admit,
    Reject,
}

/// Decides whether a metric may be forwarded for an application.
///
/// Every registry call is bounded by `query_timeout` so one slow record
/// cannot starve the queue; a timeout is treated the same as a query error.
pub struct CardinalityGuard {
    registry: Box<dyn MetricRegistry>,
    limit: i64,
    on_error: GuardErrorPolicy,
    query_timeout: Duration,
}

impl CardinalityGuard {
    #[must_use]
    pub fn new(
        registry: Box<dyn MetricRegistry>,
        limit: i64,
        on_error: GuardErrorPolicy,
        query_timeout: Duration,
    ) -> Self {
        CardinalityGuard {
            registry,
            limit,
            on_error,
            query_timeout,
        }
    }

    /// Checks (and, under the limit, registers) one metric name.
    ///
    /// Previously registered names are always admitted regardless of the
    /// current count. Registration failures are logged but do not demote
    /// the admission.
    pub async fn check(&self, app: &str, metric: &str) -> GuardDecision {
        let Some(known) = self
            .bounded(self.registry.metric_exists(app, metric), "lookup", app)
            .await
        else {
            return self.error_outcome();
        };
        if known {
            return GuardDecision::Admit;
        }

        let Some(count) = self
            .bounded(self.registry.metric_count(app), "count", app)
            .await
        else {
            return self.error_outcome();
        };

        if count < self.limit {
            // A failed registration never demotes the admission.
            self.bounded(self.registry.register_metric(app, metric), "insert", app)
                .await;
            debug!("admitted new metric {metric} for {app} ({count} registered)");
            return GuardDecision::Admit;
        }

        debug!("rejected metric {metric} for {app}: unique metric limit reached");
        GuardDecision::Reject
    }

    async fn bounded<T>(
        &self,
        query: impl Future<Output = Result<T, sqlx::Error>>,
        what: &str,
        app: &str,
    ) -> Option<T> {
        match timeout(self.query_timeout, query).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(err)) => {
                error!("cardinality {what} failed for {app}: {err}");
                None
            }
            Err(_) => {
                error!(
                    "cardinality {what} timed out for {app} after {:?}",
                    self.query_timeout
                );
                None
            }
        }
    }

    fn error_outcome(&self) -> GuardDecision {
        match self.on_error {
            GuardErrorPolicy::Admit => GuardDecision::Admit,
            GuardErrorPolicy::Reject => GuardDecision::Reject,
        }
    }
}
