//! Push-notification reconciliation for one identity.
//!
//! Every pass recomputes the desired subscriptions from the previous and
//! current allowed-id emissions and issues at most one batched subscribe and
//! one batched unsubscribe. Nothing is remembered between passes, so running
//! the same pass twice issues the same calls and a failed call is healed by the
//! next emission.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use convos_common::fmt::ShortHex;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::{
    api::{MetadataStore, NotificationTransport},
    error::{MetadataError, SyncError},
    types::{ConversationId, Identity, InboxId},
};

/// Read access to the two metadata flags reconciliation depends on.
#[async_trait]
pub trait MetadataLookup: Send + Sync {
    async fn is_active(&self, conversation_id: &ConversationId) -> Result<bool, MetadataError>;
    async fn is_muted(&self, conversation_id: &ConversationId) -> Result<bool, MetadataError>;
}

/// [`MetadataLookup`] over a [`MetadataStore`], loading metadata that is not
/// cached yet.
pub struct StoreLookup {
    store: Arc<dyn MetadataStore>,
    inbox_id: InboxId,
}

impl StoreLookup {
    pub fn new(store: Arc<dyn MetadataStore>, inbox_id: impl Into<InboxId>) -> Self {
        Self {
            store,
            inbox_id: inbox_id.into(),
        }
    }
}

#[async_trait]
impl MetadataLookup for StoreLookup {
    async fn is_active(&self, conversation_id: &ConversationId) -> Result<bool, MetadataError> {
        Ok(self.store.ensure(&self.inbox_id, conversation_id).await?.is_active)
    }

    async fn is_muted(&self, conversation_id: &ConversationId) -> Result<bool, MetadataError> {
        Ok(self.store.ensure(&self.inbox_id, conversation_id).await?.muted)
    }
}

/// The subscription changes implied by two consecutive emissions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationDiff {
    /// Active ids that were not part of `previous`. Mute state is applied later.
    pub newly_active: Vec<ConversationId>,
    /// Ids that went inactive or left the allowed set.
    pub to_unsubscribe: Vec<ConversationId>,
}

impl NotificationDiff {
    /// `activity` maps ids of `current` to whether they are active. An id
    /// without an entry could not be resolved and is left alone.
    pub fn compute(
        previous: Option<&[ConversationId]>,
        current: &[ConversationId],
        activity: &HashMap<ConversationId, bool>,
    ) -> Self {
        let previous_set: HashSet<&ConversationId> =
            previous.unwrap_or_default().iter().collect();
        let current_set: HashSet<&ConversationId> = current.iter().collect();

        let newly_active = dedup(
            current
                .iter()
                .filter(|id| activity.get(*id) == Some(&true))
                .filter(|id| !previous_set.contains(id)),
        );

        let became_inactive = current
            .iter()
            .filter(|id| activity.get(*id) == Some(&false));
        let removed = previous
            .unwrap_or_default()
            .iter()
            .filter(|id| !current_set.contains(id));

        Self {
            newly_active,
            to_unsubscribe: dedup(became_inactive.chain(removed)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.newly_active.is_empty() && self.to_unsubscribe.is_empty()
    }
}

fn dedup<'a>(ids: impl Iterator<Item = &'a ConversationId>) -> Vec<ConversationId> {
    let mut seen = HashSet::new();
    ids.filter(|id| seen.insert(*id)).cloned().collect()
}

/// What one reconciliation pass did.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub subscribed: Vec<ConversationId>,
    pub unsubscribed: Vec<ConversationId>,
    pub errors: Vec<SyncError>,
}

pub struct NotificationReconciler {
    identity: Identity,
    transport: Arc<dyn NotificationTransport>,
}

impl NotificationReconciler {
    pub fn new(identity: Identity, transport: Arc<dyn NotificationTransport>) -> Self {
        Self {
            identity,
            transport,
        }
    }

    /// Bring push subscriptions in line with `current`. Failures are collected
    /// in the outcome and never stop the rest of the pass. Once `token` is
    /// cancelled no further transport call is issued.
    #[tracing::instrument(level = "debug", skip_all, fields(inbox_id = %self.identity.inbox_id.short_hex()))]
    pub async fn reconcile(
        &self,
        previous: Option<&[ConversationId]>,
        current: &[ConversationId],
        lookup: &dyn MetadataLookup,
        token: &CancellationToken,
    ) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();

        let lookups = join_all(current.iter().map(|id| async move {
            (id, lookup.is_active(id).await)
        }))
        .await;
        let mut activity = HashMap::with_capacity(lookups.len());
        for (id, result) in lookups {
            match result {
                Ok(active) => {
                    activity.insert(id.clone(), active);
                }
                Err(e) => outcome.errors.push(e.into()),
            }
        }

        let diff = NotificationDiff::compute(previous, current, &activity);
        if diff.is_empty() || token.is_cancelled() {
            return outcome;
        }

        let mutes = join_all(diff.newly_active.iter().map(|id| async move {
            (id, lookup.is_muted(id).await)
        }))
        .await;
        let mut to_subscribe = Vec::with_capacity(mutes.len());
        for (id, result) in mutes {
            match result {
                Ok(false) => to_subscribe.push(id.clone()),
                Ok(true) => tracing::trace!(conversation_id = %id, "muted, not subscribing"),
                Err(e) => outcome.errors.push(e.into()),
            }
        }

        if token.is_cancelled() {
            tracing::debug!("cancelled before updating push subscriptions");
            return outcome;
        }
        if !to_subscribe.is_empty() {
            let result = self.transport.subscribe(&self.identity, &to_subscribe).await;
            match result {
                Ok(()) => outcome.subscribed = to_subscribe,
                Err(e) => outcome.errors.push(e.into()),
            }
        }

        if !diff.to_unsubscribe.is_empty() && !token.is_cancelled() {
            let result = self
                .transport
                .unsubscribe(&self.identity, &diff.to_unsubscribe)
                .await;
            match result {
                Ok(()) => outcome.unsubscribed = diff.to_unsubscribe,
                Err(e) => outcome.errors.push(e.into()),
            }
        }

        tracing::debug!(
            subscribed = outcome.subscribed.len(),
            unsubscribed = outcome.unsubscribed.len(),
            errors = outcome.errors.len(),
            "reconciled push subscriptions"
        );
        outcome
    }
}
