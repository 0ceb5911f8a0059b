//! Advisory archive lock with stale detection.
//!
//! The archive tree is guarded by a two-level lock: an in-process
//! `tokio::sync::Mutex` gives fair queueing between tasks, and a lock file
//! plus owner metadata file coordinate across processes. A lock whose owner
//! process is dead, or whose timestamp is older than an hour, is treated as
//! stale and cleaned up.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Lock owner metadata for stale detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockOwner {
    pub pid: u32,
    pub timestamp: DateTime<Utc>,
    pub agent: Option<String>,
    pub hostname: String,
}

impl LockOwner {
    /// Create lock owner for current process
    pub fn current(agent: Option<String>) -> Self {
        Self {
            pid: std::process::id(),
            timestamp: Utc::now(),
            agent,
            hostname: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".into()),
        }
    }

    /// Check if lock is stale (owner dead or too old)
    pub fn is_stale(&self, max_age: Duration) -> bool {
        if Utc::now() - self.timestamp > max_age {
            return true;
        }
        if !is_process_alive(self.pid) {
            return true;
        }
        false
    }
}

#[cfg(target_os = "linux")]
fn is_process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_process_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(true)
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    // Conservative: assume alive if we can't check
    true
}

/// Advisory archive lock with stale detection
pub struct ArchiveLock {
    lock_path: PathBuf,
    owner_path: PathBuf,
    inner: Mutex<()>, // Process-level mutex: fair queueing between tasks
}

impl ArchiveLock {
    /// Create new archive lock for given archive root
    pub fn new(archive_path: &Path) -> Self {
        Self {
            lock_path: archive_path.join(".archive.lock"),
            owner_path: archive_path.join(".archive.lock.owner"),
            inner: Mutex::new(()),
        }
    }

    /// Acquire lock with timeout and stale cleanup
    pub async fn acquire(
        &self,
        agent: Option<String>,
        timeout: std::time::Duration,
    ) -> Result<LockGuard<'_>> {
        let deadline = std::time::Instant::now() + timeout;
        let max_age = Duration::hours(1);

        loop {
            let _inner = self.inner.lock().await;

            if self.lock_path.exists() {
                if let Some(owner) = self.read_owner().await {
                    if owner.is_stale(max_age) {
                        info!(
                            pid = owner.pid,
                            age = %owner.timestamp,
                            "Cleaning up stale archive lock"
                        );
                        self.force_cleanup().await?;
                    } else if owner.pid == std::process::id() {
                        // Our own process holds the file lock; the in-process
                        // mutex already serialized us, refresh ownership.
                        self.force_cleanup().await?;
                    } else {
                        if std::time::Instant::now() > deadline {
                            return Err(Error::LockTimeout {
                                path: self.lock_path.display().to_string(),
                                owner_pid: owner.pid,
                            });
                        }
                        drop(_inner);
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                        continue;
                    }
                } else {
                    warn!("Lock file exists without owner metadata, forcing cleanup");
                    self.force_cleanup().await?;
                }
            }

            if let Some(parent) = self.lock_path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(&self.lock_path, "").await?;

            let owner = LockOwner::current(agent);
            let owner_json = serde_json::to_string_pretty(&owner)?;
            fs::write(&self.owner_path, owner_json).await?;

            debug!(pid = owner.pid, "Archive lock acquired");

            return Ok(LockGuard { lock: self });
        }
    }

    async fn read_owner(&self) -> Option<LockOwner> {
        let content = fs::read_to_string(&self.owner_path).await.ok()?;
        serde_json::from_str(&content).ok()
    }

    async fn force_cleanup(&self) -> Result<()> {
        let _ = fs::remove_file(&self.lock_path).await;
        let _ = fs::remove_file(&self.owner_path).await;
        Ok(())
    }

    /// Snapshot of current lock state for the tooling/locks resource.
    pub async fn status(&self) -> Option<LockOwner> {
        if self.lock_path.exists() {
            self.read_owner().await
        } else {
            None
        }
    }
}

/// RAII guard; releases the lock files on drop.
pub struct LockGuard<'a> {
    lock: &'a ArchiveLock,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        // Cleanup is async-only; spawn it since drop can't await.
        let lock_path = self.lock.lock_path.clone();
        let owner_path = self.lock.owner_path.clone();

        tokio::spawn(async move {
            let _ = fs::remove_file(&lock_path).await;
            let _ = fs::remove_file(&owner_path).await;
        });
    }
}
