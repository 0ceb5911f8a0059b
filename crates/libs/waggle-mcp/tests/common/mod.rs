//! Shared fixture for waggle-mcp integration tests: an isolated service
//! over a tempdir-backed database and archive.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;
use waggle_common::WaggleConfig;
use waggle_core::{Ctx, ModelManager};
use waggle_mcp::WaggleService;

static DB_COUNTER: AtomicU32 = AtomicU32::new(0);

pub struct TestService {
    pub service: WaggleService,
    pub mm: Arc<ModelManager>,
    pub ctx: Ctx,
    #[allow(dead_code)]
    temp_dir: TempDir,
}

impl TestService {
    pub async fn new() -> Self {
        Self::new_with_config(WaggleConfig::default()).await
    }

    pub async fn new_with_config(config: WaggleConfig) -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let counter = DB_COUNTER.fetch_add(1, Ordering::SeqCst);
        let db_path = temp_dir.path().join(format!("test_db_{counter}.db"));

        let archive_root = temp_dir.path().join("archive");
        std::fs::create_dir_all(&archive_root).expect("create archive root");
        waggle_core::store::git_store::init_or_open_repo(&archive_root).expect("init repo");

        let db = waggle_core::store::new_db_pool(&db_path)
            .await
            .expect("open db");
        let mm = Arc::new(ModelManager::new_for_test(
            db,
            archive_root,
            Arc::new(config),
        ));
        let service = WaggleService::new_with_mm(mm.clone());

        Self {
            service,
            mm,
            ctx: Ctx::root_ctx(),
            temp_dir,
        }
    }

    pub fn repo_root(&self) -> std::path::PathBuf {
        self.mm.repo_root.clone()
    }

    /// Absolute human key inside the fixture tempdir.
    pub fn project_key(&self, name: &str) -> String {
        self.temp_dir
            .path()
            .join(name)
            .to_string_lossy()
            .to_string()
    }
}
