//! Debounced batching of conversation sync requests for one identity.
//!
//! Requests arriving within a fixed window, anchored to the first request of
//! the window, are flushed together. A small batch is synced conversation by
//! conversation; a batch with at least `batch_threshold` distinct
//! conversations is replaced by one sync of the whole allowed set.

use std::{collections::HashMap, sync::Arc};

use convos_common::{fmt::ShortHex, time::sleep};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::{
    api::ConversationNetwork,
    configuration::{SyncOptions, SYNC_ALL_CONSENT_STATES},
    error::{Result, SyncError},
    sync_cache::SyncCache,
    types::{ConversationId, InboxId, SyncRequest},
};

struct Pending {
    request: SyncRequest,
    reply: oneshot::Sender<Result<()>>,
}

#[derive(Default)]
struct BatchQueue {
    pending: Vec<Pending>,
    scheduled: bool,
}

/// How a flushed batch was sent to the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushStrategy {
    Individual(Vec<ConversationId>),
    AllAllowed,
}

impl FlushStrategy {
    /// Pick a strategy for a batch of distinct conversation ids.
    pub fn for_batch(distinct: Vec<ConversationId>, threshold: usize) -> Self {
        if distinct.len() >= threshold {
            FlushStrategy::AllAllowed
        } else {
            FlushStrategy::Individual(distinct)
        }
    }
}

#[derive(Clone)]
pub struct SyncBatcher {
    inner: Arc<BatcherInner>,
}

struct BatcherInner {
    inbox_id: InboxId,
    network: Arc<dyn ConversationNetwork>,
    options: SyncOptions,
    conversations: SyncCache<ConversationId>,
    all_allowed: SyncCache<InboxId>,
    queue: Mutex<BatchQueue>,
    closed: CancellationToken,
}

impl SyncBatcher {
    pub fn new(
        inbox_id: impl Into<InboxId>,
        network: Arc<dyn ConversationNetwork>,
        options: SyncOptions,
    ) -> Self {
        Self {
            inner: Arc::new(BatcherInner {
                inbox_id: inbox_id.into(),
                network,
                conversations: SyncCache::from_options(&options),
                all_allowed: SyncCache::from_options(&options),
                options,
                queue: Mutex::new(BatchQueue::default()),
                closed: CancellationToken::new(),
            }),
        }
    }

    /// Queue `request` and wait for the batch containing it to be flushed.
    pub async fn fetch(&self, request: SyncRequest) -> Result<()> {
        let reply = self.enqueue(request)?;
        reply
            .await
            .unwrap_or_else(|_| Err(SyncError::BatcherClosed(self.inner.inbox_id.clone())))
    }

    fn enqueue(&self, request: SyncRequest) -> Result<oneshot::Receiver<Result<()>>> {
        let inner = &self.inner;
        let (reply, rx) = oneshot::channel();
        let start_window = {
            // checked under the lock so `close` cannot drain between check and push
            let mut queue = inner.queue.lock();
            if inner.closed.is_cancelled() {
                return Err(SyncError::BatcherClosed(inner.inbox_id.clone()));
            }
            queue.pending.push(Pending { request, reply });
            !std::mem::replace(&mut queue.scheduled, true)
        };

        if start_window {
            let inner = self.inner.clone();
            tokio::spawn(async move { inner.run_window().await });
        }
        Ok(rx)
    }

    /// Number of requests waiting for the current window to close.
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().pending.len()
    }

    /// Stop accepting requests and drop everything not yet flushed.
    /// Batches already handed to the network run to completion.
    pub fn close(&self) {
        let dropped = {
            let mut queue = self.inner.queue.lock();
            if self.inner.closed.is_cancelled() {
                return;
            }
            self.inner.closed.cancel();
            queue.scheduled = false;
            std::mem::take(&mut queue.pending)
        };
        if !dropped.is_empty() {
            tracing::debug!(
                inbox_id = %self.inner.inbox_id.short_hex(),
                count = dropped.len(),
                "discarding unflushed sync requests"
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }
}

impl BatcherInner {
    async fn run_window(self: Arc<Self>) {
        tokio::select! {
            _ = self.closed.cancelled() => return,
            _ = sleep(self.options.debounce_window()) => {}
        }

        let batch = {
            let mut queue = self.queue.lock();
            queue.scheduled = false;
            std::mem::take(&mut queue.pending)
        };
        self.flush(batch).await;
    }

    #[tracing::instrument(level = "debug", skip_all, fields(inbox_id = %self.inbox_id.short_hex(), requests = batch.len()))]
    async fn flush(&self, batch: Vec<Pending>) {
        if batch.is_empty() {
            return;
        }

        // last caller wins; order of first appearance is kept
        let mut callers: HashMap<&ConversationId, &str> = HashMap::new();
        let mut distinct = Vec::new();
        for pending in &batch {
            let id = &pending.request.conversation_id;
            if callers.insert(id, &pending.request.caller).is_none() {
                distinct.push(id.clone());
            }
        }

        match FlushStrategy::for_batch(distinct, self.options.batch_threshold()) {
            FlushStrategy::AllAllowed => {
                tracing::info!(
                    distinct = callers.len(),
                    "batch reached threshold, syncing all allowed conversations"
                );
                let result = self.sync_all_allowed().await;
                for pending in batch {
                    let _ = pending.reply.send(result.clone());
                }
            }
            FlushStrategy::Individual(ids) => {
                let results: HashMap<ConversationId, Result<()>> =
                    join_all(ids.into_iter().map(|id| {
                        let caller = callers.get(&id).copied().unwrap_or_default();
                        async move {
                            let result = self.sync_conversation(&id, caller).await;
                            (id, result)
                        }
                    }))
                    .await
                    .into_iter()
                    .collect();

                for pending in batch {
                    let result = match results.get(&pending.request.conversation_id) {
                        Some(result) => result.clone(),
                        None => unreachable!("every batched conversation is synced"),
                    };
                    let _ = pending.reply.send(result);
                }
            }
        }
    }

    async fn sync_conversation(&self, conversation_id: &ConversationId, caller: &str) -> Result<()> {
        tracing::debug!(%conversation_id, caller, "syncing conversation");
        let network = self.network.clone();
        let inbox_id = self.inbox_id.clone();
        let id = conversation_id.clone();
        self.conversations
            .get_or_create(conversation_id.clone(), move || async move {
                network
                    .sync_conversation(&inbox_id, &id)
                    .await
                    .map_err(SyncError::from)
            })
            .await
    }

    async fn sync_all_allowed(&self) -> Result<()> {
        let network = self.network.clone();
        let inbox_id = self.inbox_id.clone();
        self.all_allowed
            .get_or_create(self.inbox_id.clone(), move || async move {
                let synced = network
                    .sync_all_conversations(&inbox_id, SYNC_ALL_CONSENT_STATES)
                    .await?;
                tracing::debug!(synced, "synced allowed conversations");
                Ok(())
            })
            .await
    }
}
