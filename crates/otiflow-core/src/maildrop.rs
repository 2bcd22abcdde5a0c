use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::source::{Attachment, AttachmentSource, MessageMeta, SourceError, SourceResult};
use crate::workflow::TriggerFilter;

pub const MESSAGE_FILE: &str = "message.json";

/// Reads messages from a drop directory.
///
/// Each subdirectory is one message named by its id, holding a
/// `message.json` header file and the attachment files.
pub struct MailDropSource {
    root: PathBuf,
}

struct Candidate {
    id: String,
    dir: PathBuf,
    meta: MessageMeta,
}

impl MailDropSource {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn candidates(&self, filter: &TriggerFilter) -> SourceResult<Vec<Candidate>> {
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(|e| {
            SourceError::Unavailable(format!("{}: {e}", self.root.display()))
        })?;

        let mut candidates = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().to_string();
            let dir = entry.path();

            match read_meta(&id, &dir).await {
                Ok(meta) if meta.matches(filter) => candidates.push(Candidate { id, dir, meta }),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(message_id = %id, error = %e, "skipping unreadable message");
                }
            }
        }

        // Newest first.
        candidates.sort_by(|a, b| b.meta.received_at.cmp(&a.meta.received_at));
        Ok(candidates)
    }
}

async fn read_meta(id: &str, dir: &Path) -> SourceResult<MessageMeta> {
    let raw = tokio::fs::read(dir.join(MESSAGE_FILE))
        .await
        .map_err(|e| SourceError::InvalidMessage {
            id: id.to_string(),
            reason: e.to_string(),
        })?;
    Ok(serde_json::from_slice(&raw)?)
}

async fn first_attachment(dir: &Path) -> SourceResult<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() && entry.file_name() != MESSAGE_FILE {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files.into_iter().next())
}

#[async_trait]
impl AttachmentSource for MailDropSource {
    fn name(&self) -> &'static str {
        "maildrop"
    }

    async fn find(&self, filter: &TriggerFilter) -> SourceResult<Option<Attachment>> {
        for candidate in self.candidates(filter).await? {
            let Some(path) = first_attachment(&candidate.dir).await? else {
                tracing::debug!(message_id = %candidate.id, "matching message has no attachment");
                continue;
            };

            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let bytes = tokio::fs::read(&path).await?;

            return Ok(Some(Attachment {
                bytes,
                filename,
                source_message_id: candidate.id,
            }));
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drop_message(
        root: &Path,
        id: &str,
        subject: &str,
        sender: Option<&str>,
        received: &str,
        files: &[(&str, &str)],
    ) {
        let dir = root.join(id);
        std::fs::create_dir_all(&dir).unwrap();
        let meta = serde_json::json!({
            "subject": subject,
            "sender": sender,
            "received_at": received,
        });
        std::fs::write(dir.join(MESSAGE_FILE), meta.to_string()).unwrap();
        for (name, body) in files {
            std::fs::write(dir.join(name), body).unwrap();
        }
    }

    #[tokio::test]
    async fn test_finds_newest_matching_message() {
        let root = tempfile::tempdir().unwrap();
        drop_message(
            root.path(),
            "msg-001",
            "Daily Sales Report",
            Some("ops@client-x.com"),
            "2025-10-13T08:00:00Z",
            &[("report.csv", "order_id,product_id\nA,B\n")],
        );
        drop_message(
            root.path(),
            "msg-002",
            "Daily Sales Report - Oct 14",
            Some("ops@client-x.com"),
            "2025-10-14T08:00:00Z",
            &[("z_notes.csv", "x"), ("a_report.csv", "order_id,product_id\nC,D\n")],
        );
        drop_message(
            root.path(),
            "msg-003",
            "Lunch plans",
            None,
            "2025-10-15T08:00:00Z",
            &[("menu.csv", "x")],
        );

        let source = MailDropSource::new(root.path());
        let found = source
            .find(&TriggerFilter::new("daily sales").with_sender("client-x"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(found.source_message_id, "msg-002");
        assert_eq!(found.filename, "a_report.csv");
        assert_eq!(found.bytes, b"order_id,product_id\nC,D\n");
    }

    #[tokio::test]
    async fn test_sender_filter_and_attachmentless_messages() {
        let root = tempfile::tempdir().unwrap();
        drop_message(
            root.path(),
            "m1",
            "Daily Sales Report",
            Some("a@x.com"),
            "2025-10-13T08:00:00Z",
            &[("r.csv", "x")],
        );
        drop_message(
            root.path(),
            "m2",
            "Daily Sales Report",
            Some("b@y.com"),
            "2025-10-14T08:00:00Z",
            &[],
        );

        let source = MailDropSource::new(root.path());
        assert!(source
            .find(&TriggerFilter::new("daily").with_sender("nobody"))
            .await
            .unwrap()
            .is_none());

        let found = source.find(&TriggerFilter::new("daily")).await.unwrap().unwrap();
        assert_eq!(found.source_message_id, "m1");
    }

    #[tokio::test]
    async fn test_missing_root_is_unavailable() {
        let root = tempfile::tempdir().unwrap();
        let source = MailDropSource::new(root.path().join("absent"));
        assert!(matches!(
            source.find(&TriggerFilter::new("daily")).await,
            Err(SourceError::Unavailable(_))
        ));
    }
}
