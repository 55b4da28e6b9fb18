//! Per-conversation metadata observers for one identity.
//!
//! The registry keeps exactly one live observer for every allowed conversation
//! whose cached metadata is active. Observers react to metadata changes between
//! allowed-id emissions: a conversation going inactive, or being muted, while
//! it is still allowed is unsubscribed from push notifications right away
//! instead of waiting for the next reconciliation pass.

use std::{
    collections::{HashMap, HashSet},
    slice,
    sync::Arc,
};

use convos_common::{fmt::ShortHex, spawn, StreamHandle, TokioStreamHandle};
use futures::StreamExt;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::{
    api::MetadataStream,
    context::IdentityContext,
    error::SyncError,
    types::{ConversationId, ConversationMetadata},
};

type AllowedSet = Arc<RwLock<HashSet<ConversationId>>>;

/// Live subscription to one conversation's metadata.
pub struct ObserverHandle {
    conversation_id: ConversationId,
    handle: TokioStreamHandle<()>,
}

impl ObserverHandle {
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// The metadata stream ended or the observer was stopped.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop observing. A notification request already in flight still completes.
    pub fn unsubscribe(self) {
        self.handle.end();
    }
}

/// What an observer should do about a metadata change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Subscribe,
    Unsubscribe,
}

impl Transition {
    fn between(before: &ConversationMetadata, after: &ConversationMetadata) -> Option<Self> {
        if before.is_active && !after.is_active {
            return Some(Transition::Unsubscribe);
        }
        match (before.wants_notifications(), after.wants_notifications()) {
            (true, false) => Some(Transition::Unsubscribe),
            (false, true) => Some(Transition::Subscribe),
            _ => None,
        }
    }
}

pub struct ConversationObserverRegistry {
    context: Arc<IdentityContext>,
    observers: HashMap<ConversationId, ObserverHandle>,
    allowed: AllowedSet,
    disposed: bool,
}

impl ConversationObserverRegistry {
    pub fn new(context: Arc<IdentityContext>) -> Self {
        Self {
            context,
            observers: HashMap::new(),
            allowed: Default::default(),
            disposed: false,
        }
    }

    /// Converge the observer set to the allowed ids whose cached metadata is
    /// active. Uncached ids count as not active yet. Observers whose metadata
    /// stream ended are dropped and, if still wanted, watched again.
    pub fn reconcile(&mut self, allowed_ids: &[ConversationId]) {
        if self.disposed {
            return;
        }
        let inbox_id = self.context.inbox_id();
        self.observers.retain(|id, observer| {
            let finished = observer.is_finished();
            if finished {
                tracing::debug!(conversation_id = %id, "dropping ended observer");
            }
            !finished
        });
        *self.allowed.write() = allowed_ids.iter().cloned().collect();

        let mut active: HashMap<&ConversationId, ConversationMetadata> = HashMap::new();
        for id in allowed_ids {
            match self.context.metadata().cached(inbox_id, id) {
                Some(metadata) if metadata.is_active => {
                    active.insert(id, metadata);
                }
                _ => {}
            }
        }

        let stale: Vec<ConversationId> = self
            .observers
            .keys()
            .filter(|id| !active.contains_key(id))
            .cloned()
            .collect();
        for id in &stale {
            if let Some(observer) = self.observers.remove(id) {
                observer.unsubscribe();
            }
        }

        let mut added = 0;
        for (id, metadata) in active {
            if self.observers.contains_key(id) {
                continue;
            }
            match self.context.metadata().watch(inbox_id, id) {
                Ok(changes) => {
                    let observer = self.observe(id.clone(), metadata, changes);
                    self.observers.insert(id.clone(), observer);
                    added += 1;
                }
                Err(e) => self.context.capture(&e.into()),
            }
        }

        if added > 0 || !stale.is_empty() {
            tracing::debug!(
                added,
                removed = stale.len(),
                observed = self.observers.len(),
                "reconciled conversation observers"
            );
        }
    }

    fn observe(
        &self,
        conversation_id: ConversationId,
        initial: ConversationMetadata,
        changes: MetadataStream,
    ) -> ObserverHandle {
        let context = self.context.clone();
        let allowed = self.allowed.clone();
        let id = conversation_id.clone();
        let handle = spawn(move |token| {
            observe_conversation(context, allowed, id, initial, changes, token)
        });
        ObserverHandle {
            conversation_id,
            handle,
        }
    }

    /// Ids currently observed, sorted.
    pub fn observed_ids(&self) -> Vec<ConversationId> {
        let mut ids: Vec<_> = self.observers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Stop every observer and refuse later reconciliation. Calling it again
    /// does nothing.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        let count = self.observers.len();
        for (_, observer) in self.observers.drain() {
            observer.unsubscribe();
        }
        self.allowed.write().clear();
        tracing::debug!(
            inbox_id = %self.context.inbox_id().short_hex(),
            count,
            "disposed conversation observers"
        );
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl Drop for ConversationObserverRegistry {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn observe_conversation(
    context: Arc<IdentityContext>,
    allowed: AllowedSet,
    conversation_id: ConversationId,
    mut last: ConversationMetadata,
    mut changes: MetadataStream,
    token: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            next = changes.next() => next,
        };
        let Some(next) = next else {
            tracing::trace!(%conversation_id, "metadata stream ended");
            break;
        };

        let transition = Transition::between(&last, &next);
        last = next;
        let Some(transition) = transition else {
            continue;
        };
        if !allowed.read().contains(&conversation_id) {
            continue;
        }

        tracing::debug!(%conversation_id, ?transition, "conversation metadata changed");
        let ids = slice::from_ref(&conversation_id);
        let notifications = context.notifications();
        let result = match transition {
            Transition::Subscribe => notifications.subscribe(context.identity(), ids).await,
            Transition::Unsubscribe => notifications.unsubscribe(context.identity(), ids).await,
        };
        if let Err(e) = result {
            context.capture(&SyncError::from(e));
        }
    }
}
