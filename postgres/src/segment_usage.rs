//! Segment usage by active change requests, read from `PostgreSQL`.
//!
//! Every query joins `change_request_events` to `change_requests`, excludes
//! terminal states and non-strategy actions in SQL, and hands the rows to the
//! aggregation in `unleash_cr_core::usage`. Nothing is cached.

use sqlx::postgres::PgPool;
use std::collections::HashMap;
use unleash_cr_core::error::{ReadModelError, Result};
use unleash_cr_core::model::{
    ChangeRequestStrategy, PendingStrategyEvent, PersistedSegmentUsage, SegmentUsage,
};
use unleash_cr_core::payload::{STRATEGY_ACTIONS, SegmentId, StrategyChange};
use unleash_cr_core::read_model::{ChangeRequestSegmentUsageReadModel, ReadModelFuture};
use unleash_cr_core::state::ChangeRequestState;
use unleash_cr_core::usage;

const PENDING_EVENTS: &str = "
    SELECT e.change_request_id, cr.title, cr.state, cr.project, cr.environment,
           e.feature, e.action, e.payload
    FROM change_request_events e
    JOIN change_requests cr ON cr.id = e.change_request_id
    WHERE cr.state <> ALL($1)
      AND e.action = ANY($2)";

const SEGMENT_FILTER: &str = "
      AND (e.payload -> 'segments' @> to_jsonb($3::bigint)
           OR e.payload -> 'segments' @> to_jsonb($4::text))";

#[derive(sqlx::FromRow)]
struct PendingEventRow {
    change_request_id: i64,
    title: Option<String>,
    state: String,
    project: String,
    environment: String,
    feature: String,
    action: String,
    payload: serde_json::Value,
}

impl From<PendingEventRow> for PendingStrategyEvent {
    fn from(row: PendingEventRow) -> Self {
        Self {
            change_request_id: row.change_request_id,
            change_request_title: row.title,
            state: row.state,
            project: row.project,
            environment: row.environment,
            feature: row.feature,
            change: StrategyChange::interpret(&row.action, &row.payload),
        }
    }
}

#[derive(sqlx::FromRow)]
struct PersistedUsageRow {
    segment_id: i64,
    feature_name: String,
    project_name: String,
}

/// PostgreSQL-backed [`ChangeRequestSegmentUsageReadModel`].
///
/// # Example
///
/// ```ignore
/// let usage = PostgresSegmentUsageReadModel::new(pool);
/// if usage.is_segment_used_in_active_change_requests(segment_id).await? {
///     // refuse to delete
/// }
/// ```
#[derive(Clone)]
pub struct PostgresSegmentUsageReadModel {
    pool: PgPool,
}

impl PostgresSegmentUsageReadModel {
    /// Create a read model over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Strategy events of non-terminal change requests, in log order.
    ///
    /// With `segment_id`, only events whose payload lists that segment (as a
    /// number or a numeric string) are returned.
    ///
    /// # Errors
    ///
    /// Returns [`ReadModelError::Database`] if the query fails.
    pub async fn pending_strategy_events(
        &self,
        segment_id: Option<SegmentId>,
    ) -> Result<Vec<PendingStrategyEvent>> {
        let terminal = ChangeRequestState::terminal_names();
        let actions = STRATEGY_ACTIONS.to_vec();

        let rows: Vec<PendingEventRow> = match segment_id {
            Some(segment_id) => {
                let sql = format!("{PENDING_EVENTS}{SEGMENT_FILTER} ORDER BY e.id");
                sqlx::query_as(&sql)
                    .bind(terminal)
                    .bind(actions)
                    .bind(segment_id)
                    .bind(segment_id.to_string())
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let sql = format!("{PENDING_EVENTS} ORDER BY e.id");
                sqlx::query_as(&sql)
                    .bind(terminal)
                    .bind(actions)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| ReadModelError::Database(format!("Failed to load change request events: {e}")))?;

        tracing::debug!(segment_id, rows = rows.len(), "Loaded pending strategy events");
        Ok(rows.into_iter().map(PendingStrategyEvent::from).collect())
    }

    /// Strategy–segment links on features that are not archived.
    ///
    /// # Errors
    ///
    /// Returns [`ReadModelError::Database`] if the query fails.
    pub async fn persisted_segment_usage(&self) -> Result<Vec<PersistedSegmentUsage>> {
        let rows: Vec<PersistedUsageRow> = sqlx::query_as(
            "SELECT fss.segment_id, fs.feature_name, fs.project_name
             FROM feature_strategy_segment fss
             JOIN feature_strategies fs ON fs.id = fss.feature_strategy_id
             JOIN features f ON f.name = fs.feature_name
             WHERE f.archived_at IS NULL",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ReadModelError::Database(format!("Failed to load segment usage: {e}")))?;

        Ok(rows
            .into_iter()
            .map(|row| PersistedSegmentUsage {
                segment_id: row.segment_id,
                feature_name: row.feature_name,
                project_name: row.project_name,
            })
            .collect())
    }
}

impl ChangeRequestSegmentUsageReadModel for PostgresSegmentUsageReadModel {
    fn is_segment_used_in_active_change_requests(
        &self,
        segment_id: SegmentId,
    ) -> ReadModelFuture<'_, bool> {
        Box::pin(async move {
            let events = self.pending_strategy_events(Some(segment_id)).await?;
            Ok(usage::any_references_segment(&events, segment_id))
        })
    }

    fn get_strategies_used_in_active_change_requests(
        &self,
        segment_id: SegmentId,
    ) -> ReadModelFuture<'_, Vec<ChangeRequestStrategy>> {
        Box::pin(async move {
            let events = self.pending_strategy_events(Some(segment_id)).await?;
            let strategies = usage::strategies_for_segment(&events, segment_id);
            tracing::debug!(segment_id, strategies = strategies.len(), "Strategies in active change requests");
            Ok(strategies)
        })
    }

    fn get_segment_usage(&self) -> ReadModelFuture<'_, HashMap<SegmentId, SegmentUsage>> {
        Box::pin(async move {
            let events = self.pending_strategy_events(None).await?;
            let persisted = self.persisted_segment_usage().await?;
            Ok(usage::segment_usage_counts(&events, &persisted))
        })
    }
}
