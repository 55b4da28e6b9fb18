//! Per-identity driver tying the allowed-id feed to observers, batched syncs
//! and push-notification reconciliation.

use std::sync::Arc;

use convos_common::{fmt::ShortHex, spawn, StreamHandle, TokioStreamHandle};
use futures::{future::join_all, StreamExt};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    api::AllowedIdsStream,
    configuration::ALLOWED_IDS_CHANGED_CALLER,
    context::IdentityContext,
    error::{Result, SyncError},
    reconciler::{NotificationReconciler, ReconcileOutcome, StoreLookup},
    registry::ConversationObserverRegistry,
    types::{AllowedIdsUpdate, ConversationId, SyncRequest},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Uninitialized,
    Subscribed,
    Disposed,
}

/// Keeps one identity's observers and push subscriptions in line with its
/// allowed conversations.
pub struct SenderSyncCoordinator {
    pass: Arc<EmissionPass>,
    state: CoordinatorState,
    handle: Option<TokioStreamHandle<()>>,
}

/// Work done for every emission of the allowed-id feed.
struct EmissionPass {
    context: Arc<IdentityContext>,
    registry: Mutex<ConversationObserverRegistry>,
    reconciler: NotificationReconciler,
}

impl SenderSyncCoordinator {
    pub fn new(context: Arc<IdentityContext>) -> Self {
        let reconciler = NotificationReconciler::new(
            context.identity().clone(),
            context.notifications().clone(),
        );
        Self {
            pass: Arc::new(EmissionPass {
                registry: Mutex::new(ConversationObserverRegistry::new(context.clone())),
                context,
                reconciler,
            }),
            state: CoordinatorState::Uninitialized,
            handle: None,
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn context(&self) -> &Arc<IdentityContext> {
        &self.pass.context
    }

    /// Ids with a live metadata observer.
    pub fn observed_ids(&self) -> Vec<ConversationId> {
        self.pass.registry.lock().observed_ids()
    }

    /// Subscribe to the allowed-id feed and process its emissions in the
    /// background. Starting a running coordinator is a no-op.
    pub async fn start(&mut self) -> Result<()> {
        match self.state {
            CoordinatorState::Subscribed => return Ok(()),
            CoordinatorState::Disposed => {
                return Err(SyncError::Disposed(self.pass.context.inbox_id().to_string()))
            }
            CoordinatorState::Uninitialized => {}
        }

        let context = &self.pass.context;
        let updates = context.allowed_ids().subscribe(context.inbox_id()).await?;
        let pass = self.pass.clone();
        self.handle = Some(spawn(move |token| pass.run(updates, token)));
        self.state = CoordinatorState::Subscribed;
        tracing::info!(
            inbox_id = %context.inbox_id().short_hex(),
            "sender sync coordinator started"
        );
        Ok(())
    }

    /// Stop processing emissions, drop every observer and close the batcher.
    /// Requests already sent to the network are left to finish. Disposing
    /// again does nothing.
    pub fn dispose(&mut self) {
        if self.state == CoordinatorState::Disposed {
            return;
        }
        self.state = CoordinatorState::Disposed;
        if let Some(handle) = self.handle.take() {
            handle.end();
        }
        self.pass.registry.lock().dispose();
        self.pass.context.batcher().close();
        tracing::info!(
            inbox_id = %self.pass.context.inbox_id().short_hex(),
            "sender sync coordinator disposed"
        );
    }
}

impl Drop for SenderSyncCoordinator {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl EmissionPass {
    async fn run(self: Arc<Self>, mut updates: AllowedIdsStream, token: CancellationToken) {
        loop {
            let update = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!("allowed conversation feed cancelled");
                    break;
                }
                update = updates.next() => update,
            };
            let Some(update) = update else {
                tracing::debug!("allowed conversation feed ended");
                break;
            };
            self.process(update, &token).await;
        }
    }

    /// Handle one emission: queue background syncs for new ids, load their
    /// metadata, converge observers, then reconcile push subscriptions.
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(inbox_id = %self.context.inbox_id().short_hex(), count = update.current.len())
    )]
    async fn process(
        &self,
        update: AllowedIdsUpdate,
        token: &CancellationToken,
    ) -> ReconcileOutcome {
        let added = update.added();
        self.sync_in_background(&added);

        let context = &self.context;
        let loaded = join_all(
            added
                .iter()
                .map(|id| context.metadata().ensure(context.inbox_id(), id)),
        )
        .await;
        for result in loaded {
            if let Err(e) = result {
                context.capture(&e.into());
            }
        }

        if token.is_cancelled() {
            return ReconcileOutcome::default();
        }
        self.registry.lock().reconcile(&update.current);

        let lookup = StoreLookup::new(context.metadata().clone(), context.inbox_id());
        let outcome = self
            .reconciler
            .reconcile(update.previous.as_deref(), &update.current, &lookup, token)
            .await;
        for error in &outcome.errors {
            context.capture(error);
        }
        outcome
    }

    fn sync_in_background(&self, added: &[ConversationId]) {
        for id in added {
            let context = self.context.clone();
            let request = SyncRequest::new(id.clone(), ALLOWED_IDS_CHANGED_CALLER);
            tokio::spawn(async move {
                match context.batcher().fetch(request).await {
                    Ok(()) | Err(SyncError::BatcherClosed(_)) => {}
                    Err(e) => context.capture(&e),
                }
            });
        }
    }
}
