//! Persisted strategies by segment.

use sqlx::postgres::PgPool;
use unleash_cr_core::error::{ReadModelError, Result};
use unleash_cr_core::model::SegmentStrategy;
use unleash_cr_core::payload::SegmentId;
use unleash_cr_core::read_model::{ReadModelFuture, SegmentStrategyReader};

#[derive(sqlx::FromRow)]
struct StrategyRow {
    id: String,
    project_name: String,
    feature_name: String,
    strategy_name: String,
    environment: String,
}

/// PostgreSQL-backed [`SegmentStrategyReader`].
#[derive(Clone)]
pub struct PostgresSegmentStrategyReader {
    pool: PgPool,
}

impl PostgresSegmentStrategyReader {
    /// Create a reader over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn strategies_by_segment(&self, segment_id: SegmentId) -> Result<Vec<SegmentStrategy>> {
        let rows: Vec<StrategyRow> = sqlx::query_as(
            "SELECT fs.id, fs.project_name, fs.feature_name, fs.strategy_name, fs.environment
             FROM feature_strategy_segment fss
             JOIN feature_strategies fs ON fs.id = fss.feature_strategy_id
             JOIN features f ON f.name = fs.feature_name
             WHERE fss.segment_id = $1 AND f.archived_at IS NULL
             ORDER BY fs.created_at, fs.id",
        )
        .bind(segment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ReadModelError::Database(format!("Failed to load strategies by segment: {e}")))?;

        Ok(rows
            .into_iter()
            .map(|row| SegmentStrategy {
                id: row.id,
                project_id: row.project_name,
                feature_name: row.feature_name,
                strategy_name: row.strategy_name,
                environment: row.environment,
            })
            .collect())
    }
}

impl SegmentStrategyReader for PostgresSegmentStrategyReader {
    fn get_strategies_by_segment(
        &self,
        segment_id: SegmentId,
    ) -> ReadModelFuture<'_, Vec<SegmentStrategy>> {
        Box::pin(self.strategies_by_segment(segment_id))
    }
}
