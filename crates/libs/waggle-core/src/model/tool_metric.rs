//! Tool usage metrics.
//!
//! One row per tool invocation, written fire-and-forget from the dispatch
//! layer. The aggregate snapshot backs `resource://tooling/metrics`.

use crate::Result;
use crate::ctx::Ctx;
use crate::model::ModelManager;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct ToolMetricForCreate {
    pub project_id: Option<i64>,
    pub agent_id: Option<i64>,
    pub tool_name: String,
    pub status: String,
    pub error_code: Option<String>,
    pub duration_ms: i64,
}

/// Aggregate row for one tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolMetricSnapshot {
    pub tool_name: String,
    pub calls: i64,
    pub errors: i64,
    pub avg_duration_ms: f64,
}

pub struct ToolMetricBmc;

impl ToolMetricBmc {
    pub async fn create(_ctx: &Ctx, mm: &ModelManager, metric: ToolMetricForCreate) -> Result<()> {
        let db = mm.db();
        let stmt = db
            .prepare(
                r#"
            INSERT INTO tool_metrics (project_id, agent_id, tool_name, status, error_code, duration_ms)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            )
            .await?;
        stmt.execute((
            metric.project_id,
            metric.agent_id,
            metric.tool_name.as_str(),
            metric.status.as_str(),
            metric.error_code,
            metric.duration_ms,
        ))
        .await?;
        Ok(())
    }

    /// Per-tool aggregates, most-called first.
    pub async fn snapshot(_ctx: &Ctx, mm: &ModelManager) -> Result<Vec<ToolMetricSnapshot>> {
        let db = mm.db();
        let stmt = db
            .prepare(
                r#"
            SELECT tool_name,
                   COUNT(*),
                   SUM(CASE WHEN status != 'ok' THEN 1 ELSE 0 END),
                   AVG(duration_ms)
            FROM tool_metrics
            GROUP BY tool_name
            ORDER BY COUNT(*) DESC
            "#,
            )
            .await?;
        let mut rows = stmt.query(()).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(ToolMetricSnapshot {
                tool_name: row.get(0)?,
                calls: row.get(1)?,
                errors: row.get(2)?,
                avg_duration_ms: row.get::<f64>(3).unwrap_or(0.0),
            });
        }
        Ok(out)
    }
}
