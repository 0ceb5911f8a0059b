//! # Model Layer
//!
//! Backend Model Controllers (BMCs) and their data structures. Each entity
//! has a serializable model struct, a `ForCreate` input struct where
//! creation takes more than a couple of fields, and a stateless `Bmc`
//! controller with async methods.
//!
//! | BMC | Description |
//! |-----|-------------|
//! | `project::ProjectBmc` | Project registry and archive bootstrap |
//! | `agent::AgentBmc` | Agent registration and profiles |
//! | `message::MessageBmc` | Message pipeline storage and queries |
//! | `file_reservation::FileReservationBmc` | Advisory path leases |
//! | `agent_link::AgentLinkBmc` | Contact-link state machine |
//! | `contact_policy` | Gating decisions over links + heuristics |
//! | `project_sibling::ProjectSiblingBmc` | Related-project suggestions |
//! | `tool_metric::ToolMetricBmc` | Tool usage analytics |
//! | `capabilities::CapabilityMap` | Memoized capability file |
//! | `precommit_guard::PrecommitGuardBmc` | Workspace hook install/check |

pub mod agent;
pub mod agent_link;
pub mod capabilities;
pub mod contact_policy;
pub mod file_reservation;
pub mod message;
pub mod precommit_guard;
pub mod project;
pub mod project_sibling;
pub mod tool_metric;

use crate::Result;
use crate::store::archive::ArchiveAuthor;
use crate::store::archive_lock::{ArchiveLock, LockGuard};
use crate::store::repo_cache::RepoCache;
use crate::store::{self, Db};
use git2::Repository;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Default archive lock timeout in seconds
const DEFAULT_ARCHIVE_LOCK_TIMEOUT_SECS: u64 = 30;

#[derive(Clone)]
pub struct ModelManager {
    pub(crate) db: Db,
    /// Archive root on disk; the git repository lives here.
    pub repo_root: PathBuf,
    /// Serializes git index updates at the application level. git2's index
    /// locking does not tolerate high task concurrency.
    pub git_lock: Arc<Mutex<()>>,
    /// Bounded cache of open repository handles.
    repo_cache: Arc<RepoCache>,
    /// Cross-process advisory lock over the archive tree.
    archive_lock: Arc<ArchiveLock>,
    /// Application configuration.
    pub config: Arc<waggle_common::WaggleConfig>,
}

impl ModelManager {
    /// Constructor
    pub async fn new(config: Arc<waggle_common::WaggleConfig>) -> Result<Self> {
        let db = store::new_db_pool(std::path::Path::new(&config.storage.db_path)).await?;
        let repo_root = PathBuf::from(&config.storage.root);
        std::fs::create_dir_all(&repo_root)?;

        crate::store::git_store::init_or_open_repo(&repo_root)?;

        let archive_lock = Arc::new(ArchiveLock::new(&repo_root));
        Self::check_stale_locks(&archive_lock).await;

        Ok(ModelManager {
            db,
            repo_root,
            git_lock: Arc::new(Mutex::new(())),
            repo_cache: Arc::new(RepoCache::default()),
            archive_lock,
            config,
        })
    }

    /// Constructor for testing with an existing db connection and paths.
    pub fn new_for_test(
        db: Db,
        repo_root: PathBuf,
        config: Arc<waggle_common::WaggleConfig>,
    ) -> Self {
        let archive_lock = Arc::new(ArchiveLock::new(&repo_root));
        ModelManager {
            db,
            repo_root,
            git_lock: Arc::new(Mutex::new(())),
            repo_cache: Arc::new(RepoCache::default()),
            archive_lock,
            config,
        }
    }

    /// Probe for stale archive locks left by crashed processes on startup.
    async fn check_stale_locks(archive_lock: &ArchiveLock) {
        let timeout = std::time::Duration::from_millis(100);
        match archive_lock.acquire(Some("startup-check".into()), timeout).await {
            Ok(_guard) => {
                info!("archive lock check passed, no stale locks");
            }
            Err(crate::Error::LockTimeout { path, owner_pid }) => {
                info!(
                    path = %path,
                    pid = owner_pid,
                    "archive lock held by another process, will be cleaned if stale"
                );
            }
            Err(e) => {
                info!(error = %e, "error checking archive lock on startup");
            }
        }
    }

    /// Get a cached repository handle for the archive root.
    ///
    /// The returned `Arc<Mutex<Repository>>` must be locked before use.
    pub async fn get_repo(&self) -> Result<Arc<Mutex<Repository>>> {
        self.repo_cache.get(&self.repo_root).await
    }

    /// Acquire the advisory archive lock for a multi-step disk operation.
    ///
    /// The returned guard releases the lock on drop, on every exit path.
    pub async fn acquire_archive_lock(&self, agent: Option<String>) -> Result<LockGuard<'_>> {
        let timeout = std::time::Duration::from_secs(DEFAULT_ARCHIVE_LOCK_TIMEOUT_SECS);
        self.archive_lock.acquire(agent, timeout).await
    }

    /// Current archive lock owner, if held.
    pub async fn archive_lock_status(&self) -> Option<crate::store::archive_lock::LockOwner> {
        self.archive_lock.status().await
    }

    /// Commit author identity for archive writes.
    pub fn author(&self) -> ArchiveAuthor {
        ArchiveAuthor {
            name: self.config.storage.git_author_name.clone(),
            email: self.config.storage.git_author_email.clone(),
        }
    }

    /// Returns the db handle (model layer only).
    pub(in crate::model) fn db(&self) -> &Db {
        &self.db
    }

    /// Returns the db connection for integration tests.
    pub fn db_for_test(&self) -> &Db {
        &self.db
    }

    /// Health check - verify database connectivity
    pub async fn health_check(&self) -> Result<bool> {
        let stmt = self.db.prepare("SELECT 1").await?;
        let mut rows = stmt.query(()).await?;
        Ok(rows.next().await?.is_some())
    }
}
