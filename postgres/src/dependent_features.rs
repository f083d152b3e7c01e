//! Parent/child feature dependencies stored in `dependent_features`.

use sqlx::postgres::PgPool;
use sqlx::types::Json;
use unleash_cr_core::error::{ReadModelError, Result};
use unleash_cr_core::model::DependentFeature;
use unleash_cr_core::read_model::{DependentFeaturesStore, ReadModelFuture};

#[derive(sqlx::FromRow)]
struct DependencyRow {
    parent: String,
    child: String,
    enabled: bool,
    variants: Json<Vec<String>>,
}

impl From<DependencyRow> for DependentFeature {
    fn from(row: DependencyRow) -> Self {
        Self {
            parent: row.parent,
            child: row.child,
            enabled: row.enabled,
            variants: row.variants.0,
        }
    }
}

/// PostgreSQL-backed [`DependentFeaturesStore`].
///
/// # Schema
///
/// ```sql
/// CREATE TABLE dependent_features (
///     parent TEXT NOT NULL,
///     child TEXT NOT NULL,
///     enabled BOOLEAN NOT NULL DEFAULT true,
///     variants JSONB NOT NULL DEFAULT '[]'::jsonb,
///     PRIMARY KEY (parent, child)
/// );
/// ```
#[derive(Clone)]
pub struct PostgresDependentFeaturesStore {
    pool: PgPool,
}

impl PostgresDependentFeaturesStore {
    /// Create a store over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn upsert_dependency(&self, dependency: DependentFeature) -> Result<()> {
        sqlx::query(
            "INSERT INTO dependent_features (parent, child, enabled, variants)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (parent, child) DO UPDATE
             SET enabled = EXCLUDED.enabled, variants = EXCLUDED.variants",
        )
        .bind(&dependency.parent)
        .bind(&dependency.child)
        .bind(dependency.enabled)
        .bind(Json(&dependency.variants))
        .execute(&self.pool)
        .await
        .map_err(|e| ReadModelError::Database(format!("Failed to upsert dependency: {e}")))?;

        tracing::debug!(parent = %dependency.parent, child = %dependency.child, "Upserted feature dependency");
        Ok(())
    }

    async fn dependencies_where(&self, column: Column, feature: &str) -> Result<Vec<DependentFeature>> {
        let sql = format!(
            "SELECT parent, child, enabled, variants FROM dependent_features
             WHERE {} = $1 ORDER BY parent, child",
            column.as_str()
        );

        let rows: Vec<DependencyRow> = sqlx::query_as(&sql)
            .bind(feature)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ReadModelError::Database(format!("Failed to load dependencies: {e}")))?;

        Ok(rows.into_iter().map(DependentFeature::from).collect())
    }
}

#[derive(Clone, Copy)]
enum Column {
    Parent,
    Child,
}

impl Column {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Parent => "parent",
            Self::Child => "child",
        }
    }
}

impl DependentFeaturesStore for PostgresDependentFeaturesStore {
    fn upsert(&self, dependency: DependentFeature) -> ReadModelFuture<'_, ()> {
        Box::pin(self.upsert_dependency(dependency))
    }

    fn get_children<'a>(&'a self, parent: &'a str) -> ReadModelFuture<'a, Vec<DependentFeature>> {
        Box::pin(self.dependencies_where(Column::Parent, parent))
    }

    fn get_parents<'a>(&'a self, child: &'a str) -> ReadModelFuture<'a, Vec<DependentFeature>> {
        Box::pin(self.dependencies_where(Column::Child, child))
    }

    fn delete<'a>(&'a self, parent: &'a str, child: &'a str) -> ReadModelFuture<'a, ()> {
        Box::pin(async move {
            sqlx::query("DELETE FROM dependent_features WHERE parent = $1 AND child = $2")
                .bind(parent)
                .bind(child)
                .execute(&self.pool)
                .await
                .map_err(|e| ReadModelError::Database(format!("Failed to delete dependency: {e}")))?;
            Ok(())
        })
    }

    fn delete_all<'a>(&'a self, children: &'a [String]) -> ReadModelFuture<'a, ()> {
        Box::pin(async move {
            if children.is_empty() {
                return Ok(());
            }
            sqlx::query("DELETE FROM dependent_features WHERE child = ANY($1)")
                .bind(children)
                .execute(&self.pool)
                .await
                .map_err(|e| ReadModelError::Database(format!("Failed to delete dependencies: {e}")))?;
            Ok(())
        })
    }

    fn has_dependencies<'a>(&'a self, feature: &'a str) -> ReadModelFuture<'a, bool> {
        Box::pin(async move {
            let (exists,): (bool,) = sqlx::query_as(
                "SELECT EXISTS(
                    SELECT 1 FROM dependent_features WHERE parent = $1 OR child = $1
                )",
            )
            .bind(feature)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| ReadModelError::Database(format!("Failed to check dependencies: {e}")))?;
            Ok(exists)
        })
    }
}
