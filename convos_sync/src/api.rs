//! Interfaces of the collaborators the sync engine drives.
//!
//! The engine owns none of this state. The network, the metadata cache, the
//! allowed-conversation feed and the push transport are all reached through
//! these traits, and tests swap them for mocks or the in-memory fakes in
//! [`crate::test`].

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::{MetadataError, NetworkError, NotificationError};
use crate::types::{
    AllowedIdsUpdate, ConsentState, ConversationId, ConversationMetadata, Identity,
};

/// Changes to a single conversation's cached metadata.
pub type MetadataStream = BoxStream<'static, ConversationMetadata>;

/// Emissions of one identity's allowed-conversation set, in arrival order.
pub type AllowedIdsStream = BoxStream<'static, AllowedIdsUpdate>;

/// Snapshots of every currently signed-in identity.
pub type IdentityStream = BoxStream<'static, Vec<Identity>>;

/// The remote conversation network, addressed through the installation that
/// belongs to `inbox_id`.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait ConversationNetwork: Send + Sync {
    /// Pull the latest state of one conversation into the local store.
    async fn sync_conversation(
        &self,
        inbox_id: &str,
        conversation_id: &ConversationId,
    ) -> Result<(), NetworkError>;

    /// Pull every conversation in `consent_states` into the local store,
    /// returning how many were synced.
    async fn sync_all_conversations(
        &self,
        inbox_id: &str,
        consent_states: &[ConsentState],
    ) -> Result<usize, NetworkError>;
}

/// The local query/cache layer holding per-conversation metadata.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Read the cached value without fetching.
    fn cached(&self, inbox_id: &str, conversation_id: &ConversationId)
        -> Option<ConversationMetadata>;

    /// Return the cached value, loading it first when it is absent.
    async fn ensure(
        &self,
        inbox_id: &str,
        conversation_id: &ConversationId,
    ) -> Result<ConversationMetadata, MetadataError>;

    /// Subscribe to every later change of one conversation's metadata.
    /// Dropping the stream ends the subscription.
    fn watch(
        &self,
        inbox_id: &str,
        conversation_id: &ConversationId,
    ) -> Result<MetadataStream, MetadataError>;
}

#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait AllowedConversationsFeed: Send + Sync {
    /// Observe the allowed-conversation ids of `inbox_id`. Every item carries
    /// the previous emission seen by this subscriber. Dropping the stream
    /// unsubscribes.
    async fn subscribe(&self, inbox_id: &str) -> Result<AllowedIdsStream, MetadataError>;
}

/// Device push-notification subscriptions. Both calls are idempotent on the
/// transport side.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn subscribe(
        &self,
        identity: &Identity,
        conversation_ids: &[ConversationId],
    ) -> Result<(), NotificationError>;

    async fn unsubscribe(
        &self,
        identity: &Identity,
        conversation_ids: &[ConversationId],
    ) -> Result<(), NotificationError>;
}

#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
pub trait IdentityStore: Send + Sync {
    fn watch(&self) -> IdentityStream;
}
