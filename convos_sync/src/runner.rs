//! One [`SenderSyncCoordinator`] per signed-in identity.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use convos_common::{fmt::ShortHex, spawn, StreamHandle, TokioStreamHandle};
use futures::StreamExt;
use tokio::sync::Mutex;

use crate::{
    api::IdentityStore,
    context::SyncContext,
    coordinator::SenderSyncCoordinator,
    types::{Identity, InboxId},
};

pub struct MultiIdentityRunner {
    inner: Arc<RunnerInner>,
    identities: Arc<dyn IdentityStore>,
    handle: Option<TokioStreamHandle<()>>,
    stopped: bool,
}

struct RunnerInner {
    context: Arc<SyncContext>,
    coordinators: Mutex<HashMap<InboxId, SenderSyncCoordinator>>,
}

impl MultiIdentityRunner {
    pub fn new(context: Arc<SyncContext>, identities: Arc<dyn IdentityStore>) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                context,
                coordinators: Mutex::new(HashMap::new()),
            }),
            identities,
            handle: None,
            stopped: false,
        }
    }

    /// Follow the signed-in identity list in the background.
    /// Does nothing if already started or shut down.
    pub fn start(&mut self) {
        if self.handle.is_some() || self.stopped {
            return;
        }
        let mut snapshots = self.identities.watch();
        let inner = self.inner.clone();
        self.handle = Some(spawn(move |token| async move {
            loop {
                let identities = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    identities = snapshots.next() => identities,
                };
                match identities {
                    Some(identities) => inner.apply(identities).await,
                    None => {
                        tracing::debug!("identity list stream ended");
                        break;
                    }
                }
            }
        }));
    }

    /// Inbox ids that currently have a running coordinator, sorted.
    pub async fn active_inboxes(&self) -> Vec<InboxId> {
        let mut inboxes: Vec<_> = self
            .inner
            .coordinators
            .lock()
            .await
            .keys()
            .cloned()
            .collect();
        inboxes.sort();
        inboxes
    }

    /// Stop following identities and dispose every coordinator. Calling it
    /// again does nothing.
    pub async fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.end_and_wait().await {
                tracing::warn!("identity watcher did not stop cleanly: {e}");
            }
        }

        let mut coordinators = self.inner.coordinators.lock().await;
        for (_, mut coordinator) in coordinators.drain() {
            coordinator.dispose();
        }
        tracing::info!("multi identity runner shut down");
    }
}

/// Ends the identity watcher without waiting. Its coordinators are disposed
/// as the watcher releases them.
impl Drop for MultiIdentityRunner {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.end();
        }
    }
}

impl RunnerInner {
    /// Converge the running coordinators to `identities`.
    #[tracing::instrument(level = "debug", skip_all, fields(count = identities.len()))]
    async fn apply(&self, identities: Vec<Identity>) {
        let mut coordinators = self.coordinators.lock().await;
        let wanted: HashSet<&str> = identities.iter().map(|i| i.inbox_id()).collect();

        let stale: Vec<InboxId> = coordinators
            .keys()
            .filter(|inbox_id| !wanted.contains(inbox_id.as_str()))
            .cloned()
            .collect();
        for inbox_id in stale {
            if let Some(coordinator) = coordinators.get_mut(&inbox_id) {
                coordinator.dispose();
            }
            coordinators.remove(&inbox_id);
            tracing::info!(inbox_id = %inbox_id.short_hex(), "identity signed out");
        }

        for identity in identities {
            if coordinators.contains_key(identity.inbox_id()) {
                continue;
            }
            let inbox_id = identity.inbox_id.clone();
            let context = self.context.for_identity(identity);
            let mut coordinator = SenderSyncCoordinator::new(context.clone());
            match coordinator.start().await {
                Ok(()) => {
                    tracing::info!(inbox_id = %inbox_id.short_hex(), "identity signed in");
                    coordinators.insert(inbox_id, coordinator);
                }
                Err(e) => {
                    context.capture(&e);
                    coordinator.dispose();
                }
            }
        }
    }
}
