//! Attachment classification for message sync, adapted from the teacher's
//! `MediaHandler`: instead of downloading and re-uploading to a homeserver,
//! attachments become a Roomy `attachments` extension payload referencing the
//! original Discord CDN URL directly.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::discord::DiscordAttachment;

pub const MAX_DISCORD_FILE_SIZE: u64 = 8 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Video,
    File,
}

impl AttachmentKind {
    pub fn classify(content_type: Option<&str>) -> Self {
        match content_type {
            Some(mime) if mime.starts_with("image/") => AttachmentKind::Image,
            Some(mime) if mime.starts_with("video/") => AttachmentKind::Video,
            _ => AttachmentKind::File,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedAttachment {
    pub kind: AttachmentKind,
    pub url: String,
    pub filename: String,
    pub size: u64,
    pub oversized: bool,
}

pub fn classify(attachment: &DiscordAttachment) -> ClassifiedAttachment {
    ClassifiedAttachment {
        kind: AttachmentKind::classify(attachment.content_type.as_deref()),
        url: attachment.url.clone(),
        filename: attachment.filename.clone(),
        size: attachment.size,
        oversized: attachment.size > MAX_DISCORD_FILE_SIZE,
    }
}

/// Builds the `extensions.attachments` payload for `createMessage`, dropping
/// (with no error — callers already logged the skip) anything unclassifiable.
pub fn build_attachments_extension(attachments: &[DiscordAttachment]) -> Option<Value> {
    if attachments.is_empty() {
        return None;
    }

    let items: Vec<Value> = attachments
        .iter()
        .map(classify)
        .map(|a| {
            json!({
                "kind": a.kind,
                "url": a.url,
                "filename": a.filename,
                "size": a.size,
                "oversized": a.oversized,
            })
        })
        .collect();

    Some(json!({ "items": items }))
}
