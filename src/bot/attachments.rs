use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use teloxide::net::Download;
use teloxide::prelude::*;

use crate::domain::event::AttachmentRef;
use crate::domain::models::SubmissionKind;
use crate::files::{self, FileStore};

use super::EcoBot;

/// Downloads an inbound file into the local store. Runs before the event
/// reaches the engine and outside the per-user lock, so a slow transfer
/// never stalls other updates for the same user. On any failure the event
/// still goes through, carrying only the transport file id.
pub async fn fetch(
    bot: &EcoBot,
    store: &dyn FileStore,
    user_id: i64,
    task_hint: Option<i64>,
    kind: SubmissionKind,
    file_id: &str,
    now: DateTime<Utc>,
) -> AttachmentRef {
    match download(bot, store, user_id, task_hint, kind, file_id, now).await {
        Ok(stored_path) => AttachmentRef {
            file_id: file_id.to_string(),
            stored_path: Some(stored_path),
        },
        Err(err) => {
            tracing::warn!(
                user_id,
                file_id,
                error = %err,
                "attachment download failed, keeping the transport reference only"
            );
            AttachmentRef {
                file_id: file_id.to_string(),
                stored_path: None,
            }
        }
    }
}

async fn download(
    bot: &EcoBot,
    store: &dyn FileStore,
    user_id: i64,
    task_hint: Option<i64>,
    kind: SubmissionKind,
    file_id: &str,
    now: DateTime<Utc>,
) -> Result<String> {
    let file = bot.get_file(file_id.to_string()).await?;
    let mut bytes: Vec<u8> = Vec::new();
    bot.download_file(&file.path, &mut bytes).await?;

    let extension = Path::new(&file.path)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_else(|| kind.default_extension());
    let filename = files::attachment_filename(user_id, task_hint, kind, extension, now);
    let stored_path = store.persist(kind.namespace(), &filename, &bytes).await?;
    tracing::debug!(user_id, file_id, stored_path = %stored_path, size = bytes.len(), "attachment stored");
    Ok(stored_path)
}
