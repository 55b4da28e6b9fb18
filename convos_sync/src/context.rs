//! Shared and per-identity state handed to every component.

use std::sync::Arc;

use crate::{
    api::{AllowedConversationsFeed, ConversationNetwork, MetadataStore, NotificationTransport},
    batcher::SyncBatcher,
    capture::{ErrorCapture, TracingErrorCapture},
    configuration::SyncOptions,
    error::SyncError,
    types::{Identity, InboxIdRef},
};

/// Collaborators shared by every signed-in identity.
pub struct SyncContext {
    network: Arc<dyn ConversationNetwork>,
    metadata: Arc<dyn MetadataStore>,
    allowed_ids: Arc<dyn AllowedConversationsFeed>,
    notifications: Arc<dyn NotificationTransport>,
    errors: Arc<dyn ErrorCapture>,
    options: SyncOptions,
}

impl SyncContext {
    pub fn new(
        network: Arc<dyn ConversationNetwork>,
        metadata: Arc<dyn MetadataStore>,
        allowed_ids: Arc<dyn AllowedConversationsFeed>,
        notifications: Arc<dyn NotificationTransport>,
    ) -> Self {
        Self {
            network,
            metadata,
            allowed_ids,
            notifications,
            errors: Arc::new(TracingErrorCapture),
            options: SyncOptions::default(),
        }
    }

    pub fn with_error_capture(mut self, errors: Arc<dyn ErrorCapture>) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Build the context owned by one identity's coordinator, including a
    /// fresh batcher.
    pub fn for_identity(self: &Arc<Self>, identity: Identity) -> Arc<IdentityContext> {
        let batcher = SyncBatcher::new(
            identity.inbox_id.clone(),
            self.network.clone(),
            self.options,
        );
        Arc::new(IdentityContext {
            identity,
            shared: self.clone(),
            batcher,
        })
    }
}

/// Everything one identity's coordinator, registry and batcher need.
/// Nothing in here is shared with another identity except the collaborators.
pub struct IdentityContext {
    identity: Identity,
    shared: Arc<SyncContext>,
    batcher: SyncBatcher,
}

impl IdentityContext {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn inbox_id(&self) -> InboxIdRef<'_> {
        self.identity.inbox_id()
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.shared.metadata
    }

    pub fn allowed_ids(&self) -> &Arc<dyn AllowedConversationsFeed> {
        &self.shared.allowed_ids
    }

    pub fn notifications(&self) -> &Arc<dyn NotificationTransport> {
        &self.shared.notifications
    }

    pub fn batcher(&self) -> &SyncBatcher {
        &self.batcher
    }

    pub fn capture(&self, error: &SyncError) {
        self.shared.errors.capture(self.inbox_id(), error)
    }
}
