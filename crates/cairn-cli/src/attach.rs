//! Files attached to the prompt

use anyhow::{Context, Result};
use base64::Engine;
use cairn_ai::Content;
use std::path::Path;

/// Largest text attachment inlined into the prompt
const MAX_TEXT_BYTES: usize = 256 * 1024;

fn image_mime_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// Turn a file into prompt content: images are base64-encoded, anything
/// else must be UTF-8 text and is inlined.
pub async fn load_attachment(path: &Path) -> Result<Content> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read attachment {}", path.display()))?;

    if let Some(mime_type) = image_mime_type(path) {
        let data = base64::engine::general_purpose::STANDARD.encode(&bytes);
        return Ok(Content::image(data, mime_type));
    }

    if bytes.len() > MAX_TEXT_BYTES {
        anyhow::bail!(
            "Attachment {} is too large ({} KB, limit {} KB)",
            path.display(),
            bytes.len() / 1024,
            MAX_TEXT_BYTES / 1024
        );
    }
    let text = String::from_utf8(bytes)
        .with_context(|| format!("Attachment {} is not a text or image file", path.display()))?;

    Ok(Content::text(format!(
        "Attached file {}:\n```\n{}\n```",
        path.display(),
        text.trim_end()
    )))
}

pub async fn load_attachments(paths: &[impl AsRef<Path>]) -> Result<Vec<Content>> {
    let mut content = Vec::with_capacity(paths.len());
    for path in paths {
        content.push(load_attachment(path.as_ref()).await?);
    }
    Ok(content)
}
