use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::workflow::TriggerFilter;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Attachment source unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid message {id}: {reason}")]
    InvalidMessage { id: String, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Message metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

pub type SourceResult<T> = Result<T, SourceError>;

/// A file attached to the newest message matching a trigger filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub source_message_id: String,
}

/// Header fields of a candidate message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMeta {
    pub subject: String,
    #[serde(default)]
    pub sender: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl MessageMeta {
    #[must_use]
    pub fn matches(&self, filter: &TriggerFilter) -> bool {
        filter.matches(&self.subject, self.sender.as_deref())
    }
}

/// Where workflow attachments come from.
///
/// Implementations decide relevance; re-returning an already processed
/// message is expected and handled by the caller.
#[async_trait]
pub trait AttachmentSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn find(&self, filter: &TriggerFilter) -> SourceResult<Option<Attachment>>;
}

/// Never finds anything.
pub struct NullSource;

#[async_trait]
impl AttachmentSource for NullSource {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn find(&self, _filter: &TriggerFilter) -> SourceResult<Option<Attachment>> {
        Ok(None)
    }
}

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    meta: MessageMeta,
    attachment: Option<(String, Vec<u8>)>,
}

/// In-process mailbox, used for tests and demos.
#[derive(Default)]
pub struct MemorySource {
    messages: RwLock<Vec<StoredMessage>>,
}

impl MemorySource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn deliver(
        &self,
        id: impl Into<String>,
        meta: MessageMeta,
        filename: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) {
        self.messages.write().await.push(StoredMessage {
            id: id.into(),
            meta,
            attachment: Some((filename.into(), bytes.into())),
        });
    }

    /// A matching message without an attachment; `find` must skip it.
    pub async fn deliver_without_attachment(&self, id: impl Into<String>, meta: MessageMeta) {
        self.messages.write().await.push(StoredMessage {
            id: id.into(),
            meta,
            attachment: None,
        });
    }

}

#[async_trait]
impl AttachmentSource for MemorySource {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn find(&self, filter: &TriggerFilter) -> SourceResult<Option<Attachment>> {
        let messages = self.messages.read().await;
        let newest = messages
            .iter()
            .filter(|m| m.attachment.is_some() && m.meta.matches(filter))
            .max_by_key(|m| m.meta.received_at);

        Ok(newest.and_then(|m| {
            m.attachment.as_ref().map(|(filename, bytes)| Attachment {
                bytes: bytes.clone(),
                filename: filename.clone(),
                source_message_id: m.id.clone(),
            })
        }))
    }
}
