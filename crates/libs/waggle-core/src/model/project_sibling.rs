//! Project sibling suggestions.
//!
//! An undirected relationship between two distinct projects that look
//! related, scored in [0,1] with a rationale. Pairs are canonicalized with
//! the smaller project id first; two projects with the same `human_key`
//! are the same project and never pair.

use crate::Result;
use crate::ctx::Ctx;
use crate::model::ModelManager;
use crate::model::agent::AgentBmc;
use crate::model::project::{Project, ProjectBmc};
use crate::store;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSiblingSuggestion {
    pub id: i64,
    pub project_a_id: i64,
    pub project_b_id: i64,
    pub score: f64,
    pub rationale: String,
    /// suggested | confirmed | dismissed
    pub status: String,
    pub evaluated_ts: NaiveDateTime,
}

/// Pairs scoring below this are not worth surfacing.
pub const MIN_SUGGESTION_SCORE: f64 = 0.6;

/// Order a pair canonically, smaller id first.
///
/// # Errors
/// Identical ids are a caller bug surfaced as invalid input.
pub fn canonical_pair(a: i64, b: i64) -> Result<(i64, i64)> {
    if a == b {
        return Err(crate::Error::InvalidInput(
            "project pair must reference distinct projects".into(),
        ));
    }
    Ok(if a < b { (a, b) } else { (b, a) })
}

fn path_tokens(human_key: &str) -> BTreeSet<String> {
    human_key
        .split(['/', '\\', '-', '_', '.', ' '])
        .map(str::to_lowercase)
        .filter(|t| t.len() >= 3)
        .collect()
}

/// Heuristic similarity between two projects: Jaccard overlap of their
/// human-key path tokens, nudged up by shared agent names.
pub fn heuristic_similarity(
    a: &Project,
    b: &Project,
    agents_a: &[String],
    agents_b: &[String],
) -> (f64, String) {
    let tokens_a = path_tokens(&a.human_key);
    let tokens_b = path_tokens(&b.human_key);
    let intersection = tokens_a.intersection(&tokens_b).count() as f64;
    let union = tokens_a.union(&tokens_b).count() as f64;
    let token_score = if union > 0.0 { intersection / union } else { 0.0 };

    let set_a: BTreeSet<&String> = agents_a.iter().collect();
    let shared_agents = agents_b.iter().filter(|name| set_a.contains(name)).count();
    let agent_bonus = (shared_agents as f64 * 0.15).min(0.3);

    let score = (token_score * 0.7 + agent_bonus).clamp(0.0, 1.0);
    let rationale = format!(
        "path-token overlap {:.2}, {} shared agent name(s)",
        token_score, shared_agents
    );
    (score, rationale)
}

pub struct ProjectSiblingBmc;

const SIBLING_COLUMNS: &str =
    "id, project_a_id, project_b_id, score, rationale, status, evaluated_ts";

impl ProjectSiblingBmc {
    /// Insert or refresh a suggestion for a canonical pair. Confirmed and
    /// dismissed rows keep their status; only score/rationale refresh.
    pub async fn upsert(
        _ctx: &Ctx,
        mm: &ModelManager,
        project_a: i64,
        project_b: i64,
        score: f64,
        rationale: &str,
    ) -> Result<ProjectSiblingSuggestion> {
        let (a, b) = canonical_pair(project_a, project_b)?;
        let db = mm.db();
        let stmt = db
            .prepare(
                r#"
            INSERT INTO project_sibling_suggestions (project_a_id, project_b_id, score, rationale, status)
            VALUES (?, ?, ?, ?, 'suggested')
            ON CONFLICT (project_a_id, project_b_id)
            DO UPDATE SET score = excluded.score, rationale = excluded.rationale,
                          evaluated_ts = strftime('%Y-%m-%d %H:%M:%S', 'now')
            "#,
            )
            .await?;
        stmt.execute((a, b, score, rationale)).await?;
        Self::get_pair(mm, a, b)
            .await?
            .ok_or_else(|| crate::Error::InvalidInput("Failed to upsert sibling suggestion".into()))
    }

    async fn get_pair(
        mm: &ModelManager,
        a: i64,
        b: i64,
    ) -> Result<Option<ProjectSiblingSuggestion>> {
        let db = mm.db();
        let stmt = db
            .prepare(&format!(
                "SELECT {SIBLING_COLUMNS} FROM project_sibling_suggestions \
                 WHERE project_a_id = ? AND project_b_id = ?"
            ))
            .await?;
        let mut rows = stmt.query((a, b)).await?;
        if let Some(row) = rows.next().await? {
            Ok(Some(Self::from_row(row)?))
        } else {
            Ok(None)
        }
    }

    /// Suggestions touching one project, best score first.
    pub async fn list_for_project(
        _ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
    ) -> Result<Vec<ProjectSiblingSuggestion>> {
        let db = mm.db();
        let stmt = db
            .prepare(&format!(
                "SELECT {SIBLING_COLUMNS} FROM project_sibling_suggestions \
                 WHERE project_a_id = ? OR project_b_id = ? \
                 ORDER BY score DESC"
            ))
            .await?;
        let mut rows = stmt.query((project_id, project_id)).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(Self::from_row(row)?);
        }
        Ok(out)
    }

    /// Transition a pair to confirmed or dismissed.
    pub async fn set_status(
        _ctx: &Ctx,
        mm: &ModelManager,
        project_a: i64,
        project_b: i64,
        status: &str,
    ) -> Result<ProjectSiblingSuggestion> {
        if !matches!(status, "suggested" | "confirmed" | "dismissed") {
            return Err(crate::Error::InvalidInput(format!(
                "invalid sibling status: {status}"
            )));
        }
        let (a, b) = canonical_pair(project_a, project_b)?;
        let db = mm.db();
        let stmt = db
            .prepare(
                "UPDATE project_sibling_suggestions SET status = ? \
                 WHERE project_a_id = ? AND project_b_id = ?",
            )
            .await?;
        stmt.execute((status, a, b)).await?;
        Self::get_pair(mm, a, b).await?.ok_or_else(|| {
            crate::Error::InvalidInput(format!("no sibling suggestion for pair ({a}, {b})"))
        })
    }

    /// Re-score every visible project pair heuristically.
    ///
    /// Pairs sharing a `human_key` are skipped: identical keys denote the
    /// same project. Only pairs at or above `min_score` are recorded.
    pub async fn refresh_suggestions(
        ctx: &Ctx,
        mm: &ModelManager,
        min_score: f64,
    ) -> Result<usize> {
        let projects = ProjectBmc::list_all(ctx, mm).await?;
        let mut rosters: std::collections::HashMap<i64, Vec<String>> =
            std::collections::HashMap::new();
        for project in &projects {
            let agents = AgentBmc::list_all_for_project(ctx, mm, project.id).await?;
            rosters.insert(project.id, agents.into_iter().map(|a| a.name).collect());
        }

        let empty: Vec<String> = Vec::new();
        let mut recorded = 0;
        for (i, a) in projects.iter().enumerate() {
            for b in projects.iter().skip(i + 1) {
                if a.human_key == b.human_key {
                    continue;
                }
                let (score, rationale) = heuristic_similarity(
                    a,
                    b,
                    rosters.get(&a.id).unwrap_or(&empty),
                    rosters.get(&b.id).unwrap_or(&empty),
                );
                if score >= min_score {
                    Self::upsert(ctx, mm, a.id, b.id, score, &rationale).await?;
                    recorded += 1;
                }
            }
        }
        Ok(recorded)
    }

    fn from_row(row: libsql::Row) -> Result<ProjectSiblingSuggestion> {
        let evaluated_ts: String = row.get(6)?;
        Ok(ProjectSiblingSuggestion {
            id: row.get(0)?,
            project_a_id: row.get(1)?,
            project_b_id: row.get(2)?,
            score: row.get(3)?,
            rationale: row.get(4)?,
            status: row.get(5)?,
            evaluated_ts: store::parse_ts(&evaluated_ts),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn project(id: i64, human_key: &str) -> Project {
        Project {
            id,
            slug: crate::utils::slugs::slugify(human_key),
            human_key: human_key.to_string(),
            created_at: NaiveDateTime::default(),
        }
    }

    #[test]
    fn canonical_pair_orders_and_rejects_identity() {
        assert_eq!(canonical_pair(5, 2).unwrap(), (2, 5));
        assert_eq!(canonical_pair(2, 5).unwrap(), (2, 5));
        assert!(canonical_pair(3, 3).is_err());
    }

    #[test]
    fn similar_paths_score_higher_than_unrelated() {
        let a = project(1, "/data/projects/backend-api");
        let b = project(2, "/data/projects/backend-worker");
        let c = project(3, "/tmp/scratch");
        let (related, _) = heuristic_similarity(&a, &b, &[], &[]);
        let (unrelated, _) = heuristic_similarity(&a, &c, &[], &[]);
        assert!(related > unrelated);
    }

    #[test]
    fn shared_agents_raise_the_score() {
        let a = project(1, "/data/projects/api");
        let b = project(2, "/home/svc/worker");
        let roster = vec!["BlueLake".to_string()];
        let (without, _) = heuristic_similarity(&a, &b, &[], &[]);
        let (with, _) = heuristic_similarity(&a, &b, &roster, &roster);
        assert!(with > without);
        assert!(with <= 1.0);
    }
}
