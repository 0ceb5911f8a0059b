//! Pre-commit guard for agent workspaces.
//!
//! Installs a marker-tagged `pre-commit` hook into a workspace's git hooks
//! directory. The hook asks `waggle guard check` whether any staged path
//! overlaps another agent's active exclusive reservation; the server side of
//! that check lives in [`PrecommitGuardBmc::check_paths`]. Uninstall only
//! removes hooks carrying the marker, never a user's own hook.

use crate::Result;
use crate::ctx::Ctx;
use crate::model::ModelManager;
use crate::model::file_reservation::{FileReservationBmc, ReservationConflict};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Marker identifying hooks written by waggle.
pub const HOOK_MARKER: &str = "# waggle-precommit-guard";

/// Guard disposition read by the hook at commit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GuardMode {
    /// Conflicts fail the commit.
    #[default]
    Block,
    /// Conflicts print a warning and allow the commit.
    Advisory,
    /// Guard disabled.
    Bypass,
}

impl GuardMode {
    pub fn from_env() -> Self {
        match std::env::var("WAGGLE_GUARD_MODE")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "advisory" | "warn" => Self::Advisory,
            "bypass" | "off" => Self::Bypass,
            _ => Self::Block,
        }
    }
}

/// Resolve the hooks directory for a workspace, honoring `core.hooksPath`.
pub fn hooks_dir(repo_path: &Path) -> PathBuf {
    fn git_config(repo: &Path, args: &[&str]) -> Option<String> {
        Command::new("git")
            .args(["-C", &repo.to_string_lossy()])
            .args(args)
            .output()
            .ok()
            .filter(|o| o.status.success())
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    if let Some(hooks_path) = git_config(repo_path, &["config", "--get", "core.hooksPath"]) {
        let path = Path::new(&hooks_path);
        if path.is_absolute() {
            return path.to_path_buf();
        }
        return repo_path.join(&hooks_path);
    }

    if let Some(git_dir) = git_config(repo_path, &["rev-parse", "--git-dir"]) {
        let git_path = Path::new(&git_dir);
        return if git_path.is_absolute() {
            git_path.join("hooks")
        } else {
            repo_path.join(&git_dir).join("hooks")
        };
    }

    repo_path.join(".git").join("hooks")
}

/// Render the pre-commit hook script.
///
/// The script collects staged paths and hands them to `waggle guard check`.
/// It degrades gracefully: no AGENT_NAME, no waggle binary, or a bypass env
/// all allow the commit.
pub fn render_hook_script(project_key: &str) -> String {
    format!(
        r#"#!/bin/sh
{HOOK_MARKER}
# Checks staged paths against other agents' active exclusive reservations.

case "${{WAGGLE_GUARD_MODE:-block}}" in
    bypass|off)
        exit 0
        ;;
esac

if [ -z "$AGENT_NAME" ]; then
    echo "[waggle-guard] AGENT_NAME not set, skipping reservation check" >&2
    exit 0
fi

if ! command -v waggle >/dev/null 2>&1; then
    exit 0
fi

staged=$(git diff --cached --name-only --diff-filter=ACMR)
if [ -z "$staged" ]; then
    exit 0
fi

echo "$staged" | waggle guard check --project "{project_key}" --agent "$AGENT_NAME" --stdin
status=$?

if [ $status -ne 0 ]; then
    case "${{WAGGLE_GUARD_MODE:-block}}" in
        advisory|warn)
            echo "[waggle-guard] advisory mode, allowing commit despite conflicts" >&2
            exit 0
            ;;
        *)
            exit $status
            ;;
    esac
fi

exit 0
"#
    )
}

pub struct PrecommitGuardBmc;

impl PrecommitGuardBmc {
    /// Write the guard hook into the workspace. Refuses to clobber an
    /// existing hook that is not ours.
    pub fn install(workspace: &Path, project_key: &str) -> Result<PathBuf> {
        let dir = hooks_dir(workspace);
        std::fs::create_dir_all(&dir)?;
        let hook_path = dir.join("pre-commit");

        if hook_path.exists() {
            let existing = std::fs::read_to_string(&hook_path)?;
            if !existing.contains(HOOK_MARKER) {
                return Err(crate::Error::InvalidInput(format!(
                    "refusing to overwrite existing pre-commit hook at {}",
                    hook_path.display()
                )));
            }
        }

        std::fs::write(&hook_path, render_hook_script(project_key))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&hook_path, std::fs::Permissions::from_mode(0o755))?;
        }
        debug!(path = %hook_path.display(), "installed pre-commit guard");
        Ok(hook_path)
    }

    /// Remove the guard hook if, and only if, it carries our marker.
    pub fn uninstall(workspace: &Path) -> Result<bool> {
        let hook_path = hooks_dir(workspace).join("pre-commit");
        if !hook_path.exists() {
            return Ok(false);
        }
        let existing = std::fs::read_to_string(&hook_path)?;
        if !existing.contains(HOOK_MARKER) {
            return Err(crate::Error::InvalidInput(format!(
                "pre-commit hook at {} was not installed by waggle",
                hook_path.display()
            )));
        }
        std::fs::remove_file(&hook_path)?;
        Ok(true)
    }

    /// Compare candidate paths against other agents' active exclusive
    /// reservations in a project.
    pub async fn check_paths(
        ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
        agent_id: i64,
        paths: &[String],
    ) -> Result<Vec<ReservationConflict>> {
        let active = FileReservationBmc::list_active(ctx, mm, project_id).await?;
        let now = Utc::now().naive_utc();
        let mut conflicts = Vec::new();
        for path in paths {
            conflicts.extend(FileReservationBmc::conflicts_for(
                &active, agent_id, path, true, now,
            ));
        }
        Ok(conflicts)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn hook_script_carries_marker_and_project() {
        let script = render_hook_script("/data/projects/backend");
        assert!(script.contains(HOOK_MARKER));
        assert!(script.contains("/data/projects/backend"));
        assert!(script.starts_with("#!/bin/sh"));
    }

    #[test]
    fn install_and_uninstall_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let hooks = dir.path().join(".git").join("hooks");
        std::fs::create_dir_all(&hooks).unwrap();

        let hook = PrecommitGuardBmc::install(dir.path(), "/p").unwrap();
        assert!(hook.exists());
        // Reinstall over our own hook is fine.
        PrecommitGuardBmc::install(dir.path(), "/p").unwrap();

        assert!(PrecommitGuardBmc::uninstall(dir.path()).unwrap());
        assert!(!hook.exists());
        // Second uninstall is a no-op.
        assert!(!PrecommitGuardBmc::uninstall(dir.path()).unwrap());
    }

    #[test]
    fn never_touches_foreign_hooks() {
        let dir = tempfile::tempdir().unwrap();
        let hooks = dir.path().join(".git").join("hooks");
        std::fs::create_dir_all(&hooks).unwrap();
        std::fs::write(hooks.join("pre-commit"), "#!/bin/sh\nexit 0\n").unwrap();

        assert!(PrecommitGuardBmc::install(dir.path(), "/p").is_err());
        assert!(PrecommitGuardBmc::uninstall(dir.path()).is_err());
    }

    #[test]
    fn guard_mode_parses_env_values() {
        assert_eq!(GuardMode::default(), GuardMode::Block);
    }
}
