use std::{collections::HashSet, fmt};

pub use convos_common::types::{Address, InboxId, InboxIdRef};

/// A locally signed-in account.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub ethereum_address: Address,
    pub inbox_id: InboxId,
}

impl Identity {
    pub fn new(ethereum_address: impl Into<Address>, inbox_id: impl Into<InboxId>) -> Self {
        Self {
            ethereum_address: ethereum_address.into(),
            inbox_id: inbox_id.into(),
        }
    }

    pub fn inbox_id(&self) -> InboxIdRef<'_> {
        &self.inbox_id
    }
}

/// Opaque conversation handle, scoped to one identity's view of the network.
/// The same id may refer to different conversations under different inboxes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ConversationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ConversationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Locally cached per-conversation state. Owned by the metadata layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConversationMetadata {
    pub is_active: bool,
    pub muted: bool,
    pub deleted: bool,
}

impl ConversationMetadata {
    pub fn active() -> Self {
        Self {
            is_active: true,
            ..Default::default()
        }
    }

    pub fn muted(mut self) -> Self {
        self.muted = true;
        self
    }

    /// Whether the conversation should currently receive push notifications,
    /// given that it is allowed.
    pub fn wants_notifications(&self) -> bool {
        self.is_active && !self.muted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsentState {
    Unknown,
    Allowed,
    Denied,
}

/// A request for a conversation to be synced with the network.
/// `caller` is a provenance tag used for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub conversation_id: ConversationId,
    pub caller: String,
}

impl SyncRequest {
    pub fn new(conversation_id: impl Into<ConversationId>, caller: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            caller: caller.into(),
        }
    }
}

/// One emission of an identity's allowed-conversation feed.
/// `previous` is `None` on the first emission.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AllowedIdsUpdate {
    pub previous: Option<Vec<ConversationId>>,
    pub current: Vec<ConversationId>,
}

impl AllowedIdsUpdate {
    pub fn new(previous: Option<Vec<ConversationId>>, current: Vec<ConversationId>) -> Self {
        Self { previous, current }
    }

    /// Ids present in `current` that were not part of the previous emission.
    pub fn added(&self) -> Vec<ConversationId> {
        match &self.previous {
            None => self.current.clone(),
            Some(previous) => {
                let previous: HashSet<&ConversationId> = previous.iter().collect();
                self.current
                    .iter()
                    .filter(|id| !previous.contains(id))
                    .cloned()
                    .collect()
            }
        }
    }
}
