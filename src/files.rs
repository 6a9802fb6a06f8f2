use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;

use crate::domain::models::SubmissionKind;

/// Attachment sink. Callers keep only the reference string this returns;
/// raw bytes never reach the conversation engine.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn persist(&self, namespace: &str, filename: &str, bytes: &[u8]) -> Result<String>;
}

pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn persist(&self, namespace: &str, filename: &str, bytes: &[u8]) -> Result<String> {
        let dir = self.root.join(namespace);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
        let path = dir.join(filename);
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path.to_string_lossy().into_owned())
    }
}

/// Stable attachment name. Albums deliver several files within one second,
/// hence the random suffix.
pub fn attachment_filename(
    user_id: i64,
    task_id: Option<i64>,
    kind: SubmissionKind,
    extension: &str,
    now: DateTime<Utc>,
) -> String {
    let suffix: u16 = rand::thread_rng().gen();
    let stamp = now.format("%Y%m%d_%H%M%S");
    let ext = if extension.is_empty() {
        kind.default_extension()
    } else {
        extension
    };
    match task_id {
        Some(task) => format!("user{user_id}_task{task}_{stamp}_{suffix:04x}.{ext}"),
        None => format!("user{user_id}_inbox_{stamp}_{suffix:04x}.{ext}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn filename_carries_user_task_and_extension() {
        let now = Utc.with_ymd_and_hms(2026, 3, 5, 12, 0, 0).unwrap();
        let name = attachment_filename(7, Some(3), SubmissionKind::Photo, "jpg", now);
        assert!(name.starts_with("user7_task3_20260305_120000_"), "{name}");
        assert!(name.ends_with(".jpg"));

        let loose = attachment_filename(7, None, SubmissionKind::Video, "", now);
        assert!(loose.starts_with("user7_inbox_"), "{loose}");
        assert!(loose.ends_with(".mp4"));
    }

    #[tokio::test]
    async fn local_store_writes_under_namespace() {
        let root = std::env::temp_dir().join(format!(
            "eco-files-test-{}",
            rand::thread_rng().gen::<u32>()
        ));
        let store = LocalFileStore::new(root.clone());
        let reference = store
            .persist("photos", "user1_task1_x.jpg", b"bytes")
            .await
            .unwrap();
        assert!(reference.contains("photos"));
        let written = tokio::fs::read(&reference).await.unwrap();
        assert_eq!(written, b"bytes");
        tokio::fs::remove_dir_all(&root).await.unwrap();
    }
}
