//! Git plumbing for the archive.
//!
//! Every logical operation produces one commit. Files are written to the
//! working tree, staged, and committed with the configured author. The
//! archive is a single repository at the storage root; per-project trees
//! live under `projects/<slug>/`.

use crate::Result;
use git2::{Error as GitError, Oid, Repository, Signature, Tree};
use std::path::Path;

/// Initializes or opens a git repository at the given path.
///
/// Checks for a `.git` directory at the path itself rather than using
/// `discover`, so a parent repository never captures the archive.
pub fn init_or_open_repo<P: AsRef<Path>>(path: P) -> Result<Repository> {
    let path_ref = path.as_ref();
    let git_dir = path_ref.join(".git");
    if git_dir.exists() {
        Repository::open(path_ref).map_err(crate::Error::from)
    } else {
        Repository::init(path).map_err(crate::Error::from)
    }
}

/// Opens an existing git repository; fails if none exists.
pub fn open_repo<P: AsRef<Path>>(path: P) -> Result<Repository> {
    Repository::open(path).map_err(crate::Error::from)
}

fn create_commit(
    repo: &Repository,
    tree: &Tree,
    signature: &Signature,
    message: &str,
) -> Result<Oid> {
    let parent_commit_opt = find_last_commit(repo)?;
    let commit_oid = match parent_commit_opt {
        Some(ref parent) => {
            repo.commit(Some("HEAD"), signature, signature, message, tree, &[parent])?
        }
        None => repo.commit(Some("HEAD"), signature, signature, message, tree, &[])?,
    };
    Ok(commit_oid)
}

/// Write `content` to `file_path` (relative to the workdir), stage it, and
/// commit. Parent directories are created as needed.
pub fn commit_file<P: AsRef<Path>>(
    repo: &Repository,
    file_path: P,
    content: &str,
    message: &str,
    author_name: &str,
    author_email: &str,
) -> Result<Oid> {
    let workdir = repo
        .workdir()
        .ok_or_else(|| GitError::from_str("No working directory"))?;
    let full_path = workdir.join(file_path.as_ref());

    if let Some(parent) = full_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&full_path, content)?;

    let mut index = repo.index()?;
    index.add_path(file_path.as_ref())?;
    let tree = repo.find_tree(index.write_tree()?)?;
    let signature = Signature::now(author_name, author_email)?;

    create_commit(repo, &tree, &signature, message)
}

/// Stage already-written files and create a single commit covering them.
pub fn commit_paths<P: AsRef<Path>>(
    repo: &Repository,
    paths: &[P],
    message: &str,
    author_name: &str,
    author_email: &str,
) -> Result<Oid> {
    let mut index = repo.index()?;
    for path in paths {
        index.add_path(path.as_ref())?;
    }
    let tree = repo.find_tree(index.write_tree()?)?;
    let signature = Signature::now(author_name, author_email)?;

    create_commit(repo, &tree, &signature, message)
}

/// Finds the last commit in the repository, returns None if no commits exist.
fn find_last_commit(repo: &Repository) -> Result<Option<git2::Commit<'_>>> {
    let head = repo.head();
    match head {
        Ok(head) => {
            let obj = head.resolve()?.peel(git2::ObjectType::Commit)?;
            let commit = obj.into_commit().map_err(|obj_not_commit| {
                GitError::from_str(&format!(
                    "Object is not a commit: {:?}",
                    obj_not_commit.id()
                ))
            })?;
            Ok(Some(commit))
        }
        Err(ref e)
            if e.code() == git2::ErrorCode::NotFound
                || e.code() == git2::ErrorCode::UnbornBranch =>
        {
            Ok(None)
        } // Empty repo
        Err(e) => Err(crate::Error::from(e)),
    }
}

/// Read a file's content from HEAD (not the working directory).
pub fn read_file_content<P: AsRef<Path>>(repo: &Repository, file_path: P) -> Result<String> {
    let head = repo.head()?;
    let tree = head.peel_to_tree()?;
    let entry = tree.get_path(file_path.as_ref())?;
    let object = entry.to_object(repo)?;
    let blob = object
        .as_blob()
        .ok_or_else(|| GitError::from_str("Object is not a blob"))?;
    Ok(String::from_utf8_lossy(blob.content()).into_owned())
}

/// Metadata of the newest commit touching `rel_path`, if any.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CommitInfo {
    pub short_sha: String,
    pub summary: String,
    pub authored_ts: String,
}

/// Walk history from HEAD and return the most recent commit that changed
/// `rel_path`. Linear scan is fine here; archive histories are short and the
/// call is only made from listing-with-commits views.
pub fn last_commit_for_path(repo: &Repository, rel_path: &Path) -> Result<Option<CommitInfo>> {
    if repo.head().is_err() {
        return Ok(None);
    }
    let mut revwalk = repo.revwalk()?;
    revwalk.push_head()?;
    for oid in revwalk {
        let oid = oid?;
        let commit = repo.find_commit(oid)?;
        let tree = commit.tree()?;
        let in_commit = tree.get_path(rel_path).is_ok();
        let in_parent = match commit.parent(0) {
            Ok(parent) => {
                let parent_tree = parent.tree()?;
                match (parent_tree.get_path(rel_path), tree.get_path(rel_path)) {
                    (Ok(a), Ok(b)) => a.id() == b.id(),
                    (Err(_), Ok(_)) => false,
                    _ => true,
                }
            }
            Err(_) => !in_commit,
        };
        if in_commit && !in_parent {
            let authored = chrono::DateTime::<chrono::Utc>::from_timestamp(commit.time().seconds(), 0)
                .map(|ts| ts.to_rfc3339())
                .unwrap_or_default();
            return Ok(Some(CommitInfo {
                short_sha: oid.to_string().chars().take(12).collect(),
                summary: commit.summary().unwrap_or("").to_string(),
                authored_ts: authored,
            }));
        }
    }
    Ok(None)
}
