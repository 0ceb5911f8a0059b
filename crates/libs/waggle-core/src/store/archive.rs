//! On-disk archive layout and write paths.
//!
//! Per project (all under one git repository at the storage root):
//!
//! ```text
//! projects/<slug>/
//!   agents/<Name>/profile.json
//!   agents/<Name>/inbox/<YYYY>/<MM>/<ISO>__<subject-slug>__<id>.md
//!   agents/<Name>/outbox/<YYYY>/<MM>/<ISO>__<subject-slug>__<id>.md
//!   messages/<YYYY>/<MM>/<ISO>__<subject-slug>__<id>.md   # canonical copy
//!   attachments/<YYYY>/<MM>/<sha256>.webp
//!   file_reservations/<sha1(path_pattern)>.json
//! ```
//!
//! Callers hold the archive lock around every function here that touches
//! disk; this module only assumes it.

use crate::Result;
use crate::store::git_store;
use crate::utils::attachments::{AttachmentFile, AttachmentMeta};
use chrono::{DateTime, Datelike, Utc};
use git2::Repository;
use minijinja::Environment;
use serde::Serialize;
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};

/// Git author identity for archive commits.
#[derive(Debug, Clone)]
pub struct ArchiveAuthor {
    pub name: String,
    pub email: String,
}

/// Front-matter of a message markdown file.
#[derive(Debug, Clone, Serialize)]
pub struct Frontmatter {
    pub id: i64,
    pub thread_id: Option<String>,
    pub project: String,
    pub project_slug: String,
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub importance: String,
    pub ack_required: bool,
    pub created: String,
    pub attachments: Vec<AttachmentMeta>,
}

/// Root of a project's subtree, relative to the repository workdir.
pub fn project_root(slug: &str) -> PathBuf {
    PathBuf::from("projects").join(slug)
}

fn yaml_list(items: &[String]) -> String {
    if items.is_empty() {
        "[]".to_string()
    } else {
        let quoted: Vec<String> = items.iter().map(|s| format!("\"{s}\"")).collect();
        format!("[{}]", quoted.join(", "))
    }
}

/// Render the YAML front-matter block plus body into file content.
pub fn render_message_markdown(fm: &Frontmatter, body_md: &str) -> Result<String> {
    let attachments_json = serde_json::to_string(&fm.attachments)?;
    let thread = fm
        .thread_id
        .as_ref()
        .map_or_else(|| "null".to_string(), |t| format!("\"{t}\""));
    Ok(format!(
        "---\n\
         id: {id}\n\
         thread_id: {thread}\n\
         project: \"{project}\"\n\
         project_slug: \"{slug}\"\n\
         from: \"{from}\"\n\
         to: {to}\n\
         cc: {cc}\n\
         bcc: {bcc}\n\
         subject: \"{subject}\"\n\
         importance: {importance}\n\
         ack_required: {ack}\n\
         created: \"{created}\"\n\
         attachments: {attachments}\n\
         ---\n\n\
         {body}\n",
        id = fm.id,
        thread = thread,
        project = fm.project.replace('"', "'"),
        slug = fm.project_slug,
        from = fm.from,
        to = yaml_list(&fm.to),
        cc = yaml_list(&fm.cc),
        bcc = yaml_list(&fm.bcc),
        subject = fm.subject.replace('"', "'"),
        importance = fm.importance,
        ack = fm.ack_required,
        created = fm.created,
        attachments = attachments_json,
        body = body_md,
    ))
}

/// Short slug of a subject for filenames.
fn subject_slug(subject: &str) -> String {
    let slugged = slug::slugify(subject);
    let truncated: String = slugged.chars().take(40).collect();
    if truncated.is_empty() {
        "message".to_string()
    } else {
        truncated
    }
}

/// Filename for a message file: `<ISO>__<subject-slug>__<id>.md`.
pub fn message_filename(created: DateTime<Utc>, subject: &str, id: i64) -> String {
    format!(
        "{}__{}__{}.md",
        created.format("%Y%m%dT%H%M%SZ"),
        subject_slug(subject),
        id
    )
}

fn month_dir(base: PathBuf, created: DateTime<Utc>) -> PathBuf {
    base.join(format!("{:04}", created.year()))
        .join(format!("{:02}", created.month()))
}

/// Repo-relative canonical path for a message.
pub fn canonical_message_path(
    slug: &str,
    created: DateTime<Utc>,
    subject: &str,
    id: i64,
) -> PathBuf {
    month_dir(project_root(slug).join("messages"), created)
        .join(message_filename(created, subject, id))
}

/// Repo-relative mailbox path (`inbox` or `outbox`) for an agent.
pub fn mailbox_message_path(
    slug: &str,
    agent: &str,
    mailbox: &str,
    created: DateTime<Utc>,
    subject: &str,
    id: i64,
) -> PathBuf {
    month_dir(
        project_root(slug).join("agents").join(agent).join(mailbox),
        created,
    )
    .join(message_filename(created, subject, id))
}

/// Repo-relative path of a reservation artifact, addressed by
/// `sha1(path_pattern)`.
pub fn reservation_record_path(slug: &str, path_pattern: &str) -> PathBuf {
    let digest = hex::encode(Sha1::digest(path_pattern.as_bytes()));
    project_root(slug)
        .join("file_reservations")
        .join(format!("{digest}.json"))
}

/// Locate the canonical markdown file for a message id on disk.
///
/// Scans the message's month directory for the `*__<id>.md` suffix so the
/// lookup survives subject edits in filename slugs.
pub fn find_canonical_relpath(
    repo_workdir: &Path,
    slug: &str,
    created: DateTime<Utc>,
    id: i64,
) -> Option<PathBuf> {
    let rel_dir = month_dir(project_root(slug).join("messages"), created);
    let abs_dir = repo_workdir.join(&rel_dir);
    let suffix = format!("__{id}.md");
    let entries = std::fs::read_dir(abs_dir).ok()?;
    let mut matches: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| name.ends_with(&suffix))
        .collect();
    matches.sort();
    matches.pop().map(|name| rel_dir.join(name))
}

const COMMIT_PANEL_TEMPLATE: &str = "\
{{ operation }}: {{ subject }} (message {{ id }})

┌─ {{ operation }} ───
│ project:    {{ project }}
│ from:       {{ sender }}
│ to:         {{ recipients }}
│ subject:    {{ subject }}
│ importance: {{ importance }}
│ created:    {{ created }}
│ elapsed:    {{ elapsed_ms }}ms
└───
";

/// Render the structured commit message for a delivery.
pub fn render_commit_panel(
    operation: &str,
    fm: &Frontmatter,
    recipients: &[String],
    elapsed_ms: u128,
) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("panel", COMMIT_PANEL_TEMPLATE)?;
    let template = env.get_template("panel")?;
    let rendered = template.render(minijinja::context! {
        operation => operation,
        id => fm.id,
        project => fm.project,
        sender => fm.from,
        recipients => recipients.join(", "),
        subject => fm.subject,
        importance => fm.importance,
        created => fm.created,
        elapsed_ms => elapsed_ms,
    })?;
    Ok(rendered)
}

/// Ensure the project's subtree exists in the archive; bootstrap the
/// repository with `.gitattributes` on first use.
pub fn ensure_project_tree(
    repo: &Repository,
    slug: &str,
    author: &ArchiveAuthor,
) -> Result<()> {
    let workdir = repo
        .workdir()
        .ok_or_else(|| git2::Error::from_str("No working directory"))?;
    std::fs::create_dir_all(workdir.join(project_root(slug)))?;

    let attributes_path = Path::new(".gitattributes");
    if git_store::read_file_content(repo, attributes_path).is_err() {
        git_store::commit_file(
            repo,
            attributes_path,
            "*.json text\n*.md text\n",
            "chore: initialize archive",
            &author.name,
            &author.email,
        )?;
    }
    Ok(())
}

/// Write one delivery to the archive: canonical copy, sender outbox copy,
/// per-recipient inbox copies, and attachment files; then one commit.
///
/// Returns the list of repo-relative paths included in the commit.
#[allow(clippy::too_many_arguments)]
pub fn write_message_bundle(
    repo: &Repository,
    fm: &Frontmatter,
    body_md: &str,
    recipient_names: &[String],
    attachment_files: &[AttachmentFile],
    created: DateTime<Utc>,
    commit_message: &str,
    author: &ArchiveAuthor,
) -> Result<Vec<PathBuf>> {
    let workdir = repo
        .workdir()
        .ok_or_else(|| git2::Error::from_str("No working directory"))?
        .to_path_buf();

    let content = render_message_markdown(fm, body_md)?;
    let mut rel_paths: Vec<PathBuf> = Vec::new();

    let canonical = canonical_message_path(&fm.project_slug, created, &fm.subject, fm.id);
    rel_paths.push(canonical);

    rel_paths.push(mailbox_message_path(
        &fm.project_slug,
        &fm.from,
        "outbox",
        created,
        &fm.subject,
        fm.id,
    ));

    for recipient in recipient_names {
        rel_paths.push(mailbox_message_path(
            &fm.project_slug,
            recipient,
            "inbox",
            created,
            &fm.subject,
            fm.id,
        ));
    }

    for rel in &rel_paths {
        let full = workdir.join(rel);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(full, &content)?;
    }

    for attachment in attachment_files {
        let rel = project_root(&fm.project_slug).join(&attachment.rel_path);
        let full = workdir.join(&rel);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(full, &attachment.bytes)?;
        rel_paths.push(rel);
    }

    git_store::commit_paths(repo, &rel_paths, commit_message, &author.name, &author.email)?;
    Ok(rel_paths)
}

/// Write (or refresh) an agent profile JSON and commit it.
pub fn write_agent_profile(
    repo: &Repository,
    slug: &str,
    agent_name: &str,
    profile: &serde_json::Value,
    author: &ArchiveAuthor,
) -> Result<()> {
    let rel_path = project_root(slug)
        .join("agents")
        .join(agent_name)
        .join("profile.json");
    let content = serde_json::to_string_pretty(profile)?;
    git_store::commit_file(
        repo,
        &rel_path,
        &content,
        &format!("agent: profile {agent_name}"),
        &author.name,
        &author.email,
    )?;
    Ok(())
}

/// Write (or refresh) a reservation artifact and commit it.
pub fn write_reservation_record(
    repo: &Repository,
    slug: &str,
    path_pattern: &str,
    payload: &serde_json::Value,
    commit_message: &str,
    author: &ArchiveAuthor,
) -> Result<()> {
    let rel_path = reservation_record_path(slug, path_pattern);
    let content = serde_json::to_string_pretty(payload)?;
    git_store::commit_file(
        repo,
        &rel_path,
        &content,
        commit_message,
        &author.name,
        &author.email,
    )?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fm() -> Frontmatter {
        Frontmatter {
            id: 7,
            thread_id: Some("7".to_string()),
            project: "/data/projects/backend".to_string(),
            project_slug: "data-projects-backend".to_string(),
            from: "BlueLake".to_string(),
            to: vec!["GreenCastle".to_string()],
            cc: vec![],
            bcc: vec![],
            subject: "Build plan".to_string(),
            importance: "normal".to_string(),
            ack_required: false,
            created: "2026-03-01T10:00:00+00:00".to_string(),
            attachments: vec![],
        }
    }

    #[test]
    fn filename_carries_iso_slug_and_id() {
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let name = message_filename(created, "Build plan!", 42);
        assert_eq!(name, "20260301T100000Z__build-plan__42.md");
    }

    #[test]
    fn canonical_path_is_year_month_partitioned() {
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let path = canonical_message_path("proj", created, "Hi", 1);
        assert_eq!(
            path,
            PathBuf::from("projects/proj/messages/2026/03/20260301T100000Z__hi__1.md")
        );
    }

    #[test]
    fn frontmatter_renders_all_fields() {
        let content = render_message_markdown(&fm(), "hello").unwrap();
        assert!(content.starts_with("---\n"));
        assert!(content.contains("id: 7"));
        assert!(content.contains("from: \"BlueLake\""));
        assert!(content.contains("to: [\"GreenCastle\"]"));
        assert!(content.contains("cc: []"));
        assert!(content.contains("subject: \"Build plan\""));
        assert!(content.contains("ack_required: false"));
        assert!(content.ends_with("hello\n"));
    }

    #[test]
    fn reservation_path_uses_sha1_of_pattern() {
        let path = reservation_record_path("proj", "src/*");
        let digest = hex::encode(Sha1::digest(b"src/*"));
        assert_eq!(
            path,
            PathBuf::from(format!("projects/proj/file_reservations/{digest}.json"))
        );
    }

    #[test]
    fn commit_panel_mentions_operation_and_subject() {
        let panel = render_commit_panel("send_message", &fm(), &["GreenCastle".to_string()], 12)
            .unwrap();
        assert!(panel.starts_with("send_message: Build plan (message 7)"));
        assert!(panel.contains("from:       BlueLake"));
        assert!(panel.contains("elapsed:    12ms"));
    }
}
