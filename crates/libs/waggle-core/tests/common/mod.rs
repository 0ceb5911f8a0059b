//! Common test utilities and fixtures.
//!
//! Each test gets its own isolated database file and archive directory in a
//! tempdir; cleanup happens via TempDir RAII.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;
use waggle_common::WaggleConfig;
use waggle_core::{Ctx, ModelManager, Result};

/// Global counter for unique database names
static DB_COUNTER: AtomicU32 = AtomicU32::new(0);

pub struct TestContext {
    pub mm: ModelManager,
    pub ctx: Ctx,
    #[allow(dead_code)]
    temp_dir: TempDir, // Keep alive for duration of test
}

impl TestContext {
    pub async fn new() -> Result<Self> {
        Self::new_with_config(WaggleConfig::default()).await
    }

    pub async fn new_with_config(config: WaggleConfig) -> Result<Self> {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let counter = DB_COUNTER.fetch_add(1, Ordering::SeqCst);
        let db_path = temp_dir.path().join(format!("test_db_{counter}.db"));

        let archive_root = temp_dir.path().join("archive");
        std::fs::create_dir_all(&archive_root)?;
        waggle_core::store::git_store::init_or_open_repo(&archive_root)?;

        let db = waggle_core::store::new_db_pool(&db_path).await?;

        let mm = ModelManager::new_for_test(db, archive_root, Arc::new(config));
        let ctx = Ctx::root_ctx();

        Ok(Self { mm, ctx, temp_dir })
    }

    pub fn repo_root(&self) -> PathBuf {
        self.mm.repo_root.clone()
    }
}

/// Register a project + agent pair in one call, the common test opening.
pub async fn seed_project_and_agent(
    tc: &TestContext,
    human_key: &str,
    agent_name: &str,
) -> Result<(
    waggle_core::model::project::Project,
    waggle_core::model::agent::Agent,
)> {
    use waggle_core::model::agent::{AgentBmc, AgentForCreate};
    use waggle_core::model::project::ProjectBmc;

    let project = ProjectBmc::ensure(&tc.ctx, &tc.mm, human_key).await?;
    let agent = AgentBmc::register(
        &tc.ctx,
        &tc.mm,
        AgentForCreate {
            project_id: project.id,
            name: Some(agent_name.to_string()),
            program: "claude-code".to_string(),
            model: "opus".to_string(),
            task_description: "testing".to_string(),
        },
    )
    .await?;
    Ok((project, agent))
}
