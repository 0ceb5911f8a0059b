//! Attachment processing for outgoing messages.
//!
//! Referenced images (markdown `![...](...)` links and explicit attachment
//! paths) are normalized to WebP. Small images are inlined into the body as
//! data URIs; larger ones become content-addressed files under
//! `attachments/YYYY/MM/<sha256>.webp` in the project archive. Duplicate
//! payloads coalesce to one file by hash.
//!
//! Policy precedence (lowest to highest): server default, agent
//! `attachments_policy`, per-call `convert_images` override.

use crate::Result;
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Datelike, Utc};
use image::GenericImageView;
use pulldown_cmark::{Event, Parser, Tag};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Maximum image dimensions accepted (8K).
const MAX_WIDTH: u32 = 7680;
const MAX_HEIGHT: u32 = 4320;

/// How converted images are embedded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbedPolicy {
    /// Inline when small, file otherwise.
    #[default]
    Auto,
    /// Always inline as a data URI.
    Inline,
    /// Always write a file.
    File,
}

impl EmbedPolicy {
    pub fn from_str_policy(s: &str) -> Self {
        match s {
            "inline" => Self::Inline,
            "file" => Self::File,
            _ => Self::Auto,
        }
    }
}

/// Effective attachment policy for one send.
#[derive(Debug, Clone, Copy)]
pub struct AttachmentPolicy {
    pub convert_images: bool,
    pub embed: EmbedPolicy,
    pub inline_max_bytes: usize,
}

/// Descriptor recorded in the message row and front-matter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentMeta {
    /// "inline" or "file".
    pub kind: String,
    pub media_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<usize>,
}

/// A file to materialize in the archive (relative path + payload).
#[derive(Debug, Clone)]
pub struct AttachmentFile {
    pub rel_path: PathBuf,
    pub bytes: Vec<u8>,
}

/// Result of attachment processing: rewritten body, descriptors, files.
#[derive(Debug, Clone, Default)]
pub struct ProcessedAttachments {
    pub body_md: String,
    pub descriptors: Vec<AttachmentMeta>,
    pub files: Vec<AttachmentFile>,
}

/// Collect image destinations referenced by the markdown body, in order.
pub fn collect_image_refs(body_md: &str) -> Vec<String> {
    let mut refs = Vec::new();
    for event in Parser::new(body_md) {
        if let Event::Start(Tag::Image { dest_url, .. }) = event {
            let dest = dest_url.to_string();
            if !refs.contains(&dest) {
                refs.push(dest);
            }
        }
    }
    refs
}

/// Decode a base64 data URI into (bytes, media type).
pub fn decode_data_uri(uri: &str) -> Option<(Vec<u8>, String)> {
    let rest = uri.strip_prefix("data:")?;
    let (metadata, payload) = rest.split_once(',')?;
    if !metadata.contains(";base64") {
        return None;
    }
    let media_type = metadata.split(';').next().unwrap_or("").to_string();
    let bytes = general_purpose::STANDARD.decode(payload).ok()?;
    Some((bytes, media_type))
}

/// Validate and re-encode image bytes as lossless WebP.
fn convert_to_webp(data: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(data)?;
    let (width, height) = img.dimensions();
    if width > MAX_WIDTH || height > MAX_HEIGHT {
        return Err(crate::Error::InvalidInput(format!(
            "image too large: {width}x{height}"
        )));
    }
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::WebP)?;
    Ok(out.into_inner())
}

fn webp_data_uri(bytes: &[u8]) -> String {
    format!(
        "data:image/webp;base64,{}",
        general_purpose::STANDARD.encode(bytes)
    )
}

fn archive_rel_path(now: DateTime<Utc>, digest: &str) -> PathBuf {
    PathBuf::from("attachments")
        .join(format!("{:04}", now.year()))
        .join(format!("{:02}", now.month()))
        .join(format!("{digest}.webp"))
}

struct Processed {
    meta: AttachmentMeta,
    file: Option<AttachmentFile>,
    /// Replacement URL for in-body references.
    replacement: Option<String>,
}

fn process_one(bytes: &[u8], now: DateTime<Utc>, policy: &AttachmentPolicy) -> Result<Processed> {
    let webp = convert_to_webp(bytes)?;
    let inline = match policy.embed {
        EmbedPolicy::Inline => true,
        EmbedPolicy::File => false,
        EmbedPolicy::Auto => webp.len() <= policy.inline_max_bytes,
    };
    if inline {
        let uri = webp_data_uri(&webp);
        Ok(Processed {
            meta: AttachmentMeta {
                kind: "inline".to_string(),
                media_type: "image/webp".to_string(),
                path: None,
                sha256: None,
                size_bytes: Some(webp.len()),
            },
            file: None,
            replacement: Some(uri),
        })
    } else {
        let digest = hex::encode(Sha256::digest(&webp));
        let rel_path = archive_rel_path(now, &digest);
        let rel_str = rel_path.to_string_lossy().to_string();
        Ok(Processed {
            meta: AttachmentMeta {
                kind: "file".to_string(),
                media_type: "image/webp".to_string(),
                path: Some(rel_str.clone()),
                sha256: Some(digest),
                size_bytes: Some(webp.len()),
            },
            file: Some(AttachmentFile {
                rel_path,
                bytes: webp,
            }),
            replacement: Some(rel_str),
        })
    }
}

fn load_source(source: &str, base_dir: &Path) -> Option<Vec<u8>> {
    if let Some((bytes, _)) = decode_data_uri(source) {
        return Some(bytes);
    }
    if source.starts_with("http://") || source.starts_with("https://") {
        // Remote references are left untouched.
        return None;
    }
    let path = Path::new(source);
    let resolved = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    };
    std::fs::read(resolved).ok()
}

/// Run attachment processing over a message body and explicit paths.
///
/// Missing or undecodable sources are skipped rather than failing the send;
/// the body keeps the original reference in that case.
pub fn process_attachments(
    body_md: &str,
    attachment_paths: &[String],
    base_dir: &Path,
    now: DateTime<Utc>,
    policy: &AttachmentPolicy,
) -> Result<ProcessedAttachments> {
    let mut body = body_md.to_string();
    let mut descriptors = Vec::new();
    let mut files: Vec<AttachmentFile> = Vec::new();

    if !policy.convert_images {
        return Ok(ProcessedAttachments {
            body_md: body,
            descriptors,
            files,
        });
    }

    let mut push_file = |file: Option<AttachmentFile>, files: &mut Vec<AttachmentFile>| {
        if let Some(f) = file
            && !files.iter().any(|existing| existing.rel_path == f.rel_path)
        {
            files.push(f);
        }
    };

    for reference in collect_image_refs(&body) {
        let Some(bytes) = load_source(&reference, base_dir) else {
            continue;
        };
        let Ok(processed) = process_one(&bytes, now, policy) else {
            continue;
        };
        if let Some(replacement) = &processed.replacement {
            body = body.replace(&reference, replacement);
        }
        descriptors.push(processed.meta.clone());
        push_file(processed.file, &mut files);
    }

    for path in attachment_paths {
        let Some(bytes) = load_source(path, base_dir) else {
            continue;
        };
        // Explicit attachments always materialize as files unless the
        // policy forces inlining.
        let file_policy = AttachmentPolicy {
            embed: if policy.embed == EmbedPolicy::Inline {
                EmbedPolicy::Inline
            } else {
                EmbedPolicy::File
            },
            ..*policy
        };
        let Ok(processed) = process_one(&bytes, now, &file_policy) else {
            continue;
        };
        descriptors.push(processed.meta.clone());
        push_file(processed.file, &mut files);
    }

    Ok(ProcessedAttachments {
        body_md: body,
        descriptors,
        files,
    })
}
