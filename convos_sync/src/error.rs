use std::sync::Arc;

use convos_common::{retryable, RetryableError};
use thiserror::Error;

use crate::types::{ConversationId, InboxId};

pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors surfaced by the conversation network client.
/// The source is erased since the engine does not care which transport failed.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("network client error: {0}")]
    Client(Box<dyn RetryableError + Send + Sync>),
    #[error("request timed out")]
    Timeout,
    #[error("no installation for inbox {0}")]
    NoInstallation(InboxId),
}

impl NetworkError {
    pub fn client(e: impl RetryableError + Send + Sync + 'static) -> Self {
        Self::Client(Box::new(e))
    }
}

impl RetryableError for NetworkError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Client(e) => retryable!(e),
            Self::Timeout => true,
            Self::NoInstallation(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata for conversation {0} could not be loaded: {1}")]
    Load(ConversationId, String),
    #[error("metadata store is unavailable")]
    Unavailable,
    #[error("feed for inbox {0} is closed")]
    FeedClosed(InboxId),
}

impl RetryableError for MetadataError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Load(..) | Self::Unavailable => true,
            Self::FeedClosed(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("push transport rejected request: {0}")]
    Rejected(String),
    #[error("push transport unreachable: {0}")]
    Unreachable(String),
    #[error("no push token registered for inbox {0}")]
    NoPushToken(InboxId),
}

impl RetryableError for NotificationError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

/// Umbrella error for the sync engine.
///
/// Cloneable because a single in-flight sync result is handed to every caller
/// waiting on it.
#[derive(Debug, Error, Clone)]
pub enum SyncError {
    #[error("network: {0}")]
    Network(Arc<NetworkError>),
    #[error("metadata: {0}")]
    Metadata(Arc<MetadataError>),
    #[error("notifications: {0}")]
    Notification(Arc<NotificationError>),
    #[error("sync batcher for inbox {0} was closed before the request was flushed")]
    BatcherClosed(InboxId),
    #[error("coordinator for inbox {0} is disposed")]
    Disposed(InboxId),
}

impl From<NetworkError> for SyncError {
    fn from(value: NetworkError) -> Self {
        Self::Network(Arc::new(value))
    }
}

impl From<MetadataError> for SyncError {
    fn from(value: MetadataError) -> Self {
        Self::Metadata(Arc::new(value))
    }
}

impl From<NotificationError> for SyncError {
    fn from(value: NotificationError) -> Self {
        Self::Notification(Arc::new(value))
    }
}

impl RetryableError for SyncError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Network(e) => retryable!(e),
            Self::Metadata(e) => retryable!(e),
            Self::Notification(e) => retryable!(e),
            Self::BatcherClosed(_) | Self::Disposed(_) => false,
        }
    }
}
