//! In-memory collaborators for exercising the engine without a network.
#![allow(clippy::unwrap_used)]

use std::{
    collections::{HashMap, HashSet},
    future::ready,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use convos_common::time::{sleep, timeout, Duration};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::{BroadcastStream, WatchStream};

use crate::{
    api::{
        AllowedConversationsFeed, AllowedIdsStream, ConversationNetwork, IdentityStore,
        IdentityStream, MetadataStore, MetadataStream, NotificationTransport,
    },
    capture::ErrorCapture,
    configuration::SyncOptions,
    context::SyncContext,
    error::{MetadataError, NetworkError, NotificationError, SyncError},
    types::{
        AllowedIdsUpdate, ConsentState, ConversationId, ConversationMetadata, Identity, InboxId,
    },
};

pub fn ids(list: &[&str]) -> Vec<ConversationId> {
    list.iter().map(|id| ConversationId::from(*id)).collect()
}

pub fn identity(name: &str) -> Identity {
    Identity::new(format!("0x{name}-address"), format!("{name}-inbox"))
}

/// Poll `condition` until it holds, panicking after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Decrements the shared counter when the subscription it is attached to is dropped.
struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkCall {
    Conversation(InboxId, ConversationId),
    AllAllowed(InboxId, Vec<ConsentState>),
}

#[derive(Default)]
pub struct FakeNetwork {
    calls: Mutex<Vec<NetworkCall>>,
    failing: AtomicBool,
}

impl FakeNetwork {
    pub fn calls(&self) -> Vec<NetworkCall> {
        self.calls.lock().clone()
    }

    pub fn conversation_syncs(&self, inbox_id: &str) -> Vec<ConversationId> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                NetworkCall::Conversation(inbox, id) if inbox == inbox_id => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn outcome(&self) -> Result<(), NetworkError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(NetworkError::Timeout)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ConversationNetwork for FakeNetwork {
    async fn sync_conversation(
        &self,
        inbox_id: &str,
        conversation_id: &ConversationId,
    ) -> Result<(), NetworkError> {
        self.calls.lock().push(NetworkCall::Conversation(
            inbox_id.to_string(),
            conversation_id.clone(),
        ));
        self.outcome()
    }

    async fn sync_all_conversations(
        &self,
        inbox_id: &str,
        consent_states: &[ConsentState],
    ) -> Result<usize, NetworkError> {
        self.calls.lock().push(NetworkCall::AllAllowed(
            inbox_id.to_string(),
            consent_states.to_vec(),
        ));
        self.outcome().map(|_| 0)
    }
}

type MetadataKey = (InboxId, ConversationId);

/// A metadata cache with a separate "remote" side that `ensure` loads from.
pub struct FakeMetadataStore {
    values: Mutex<HashMap<MetadataKey, ConversationMetadata>>,
    remote: Mutex<HashMap<MetadataKey, ConversationMetadata>>,
    failing: Mutex<HashSet<ConversationId>>,
    changes: Mutex<broadcast::Sender<(MetadataKey, ConversationMetadata)>>,
    live_watches: Arc<AtomicUsize>,
    ensure_calls: AtomicUsize,
}

impl Default for FakeMetadataStore {
    fn default() -> Self {
        Self {
            values: Default::default(),
            remote: Default::default(),
            failing: Default::default(),
            changes: Mutex::new(broadcast::channel(64).0),
            live_watches: Default::default(),
            ensure_calls: Default::default(),
        }
    }
}

impl FakeMetadataStore {
    /// Write a value straight into the cache, notifying watchers.
    pub fn set(&self, inbox_id: &str, id: &str, metadata: ConversationMetadata) {
        let key = (inbox_id.to_string(), ConversationId::from(id));
        self.values.lock().insert(key.clone(), metadata);
        let _ = self.changes.lock().send((key, metadata));
    }

    /// Make `metadata` available to `ensure` without caching it yet.
    pub fn set_remote(&self, inbox_id: &str, id: &str, metadata: ConversationMetadata) {
        self.remote
            .lock()
            .insert((inbox_id.to_string(), ConversationId::from(id)), metadata);
    }

    pub fn fail_loading(&self, id: &str) {
        self.failing.lock().insert(ConversationId::from(id));
    }

    /// End every open watch stream. Later watches work as usual.
    pub fn end_watches(&self) {
        *self.changes.lock() = broadcast::channel(64).0;
    }

    pub fn live_watches(&self) -> usize {
        self.live_watches.load(Ordering::SeqCst)
    }

    pub fn ensure_calls(&self) -> usize {
        self.ensure_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataStore for FakeMetadataStore {
    fn cached(
        &self,
        inbox_id: &str,
        conversation_id: &ConversationId,
    ) -> Option<ConversationMetadata> {
        self.values
            .lock()
            .get(&(inbox_id.to_string(), conversation_id.clone()))
            .copied()
    }

    async fn ensure(
        &self,
        inbox_id: &str,
        conversation_id: &ConversationId,
    ) -> Result<ConversationMetadata, MetadataError> {
        self.ensure_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().contains(conversation_id) {
            return Err(MetadataError::Load(
                conversation_id.clone(),
                "injected failure".into(),
            ));
        }
        if let Some(metadata) = self.cached(inbox_id, conversation_id) {
            return Ok(metadata);
        }

        let key = (inbox_id.to_string(), conversation_id.clone());
        let metadata = self.remote.lock().get(&key).copied().unwrap_or_default();
        self.values.lock().insert(key, metadata);
        Ok(metadata)
    }

    fn watch(
        &self,
        inbox_id: &str,
        conversation_id: &ConversationId,
    ) -> Result<MetadataStream, MetadataError> {
        let key = (inbox_id.to_string(), conversation_id.clone());
        let guard = LiveGuard::new(&self.live_watches);
        let stream = BroadcastStream::new(self.changes.lock().subscribe()).filter_map(move |change| {
            let _guard = &guard;
            ready(match change {
                Ok((changed, metadata)) if changed == key => Some(metadata),
                _ => None,
            })
        });
        Ok(stream.boxed())
    }
}

/// Allowed-id feed driven by [`FakeAllowedFeed::emit`].
#[derive(Default)]
pub struct FakeAllowedFeed {
    senders: Mutex<HashMap<InboxId, watch::Sender<Option<Vec<ConversationId>>>>>,
    live_subscriptions: Arc<AtomicUsize>,
    closed: Mutex<HashSet<InboxId>>,
}

impl FakeAllowedFeed {
    pub fn emit(&self, inbox_id: &str, current: Vec<ConversationId>) {
        self.senders
            .lock()
            .entry(inbox_id.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(Some(current));
    }

    /// Reject later subscriptions for `inbox_id`.
    pub fn close(&self, inbox_id: &str) {
        self.closed.lock().insert(inbox_id.to_string());
    }

    pub fn live_subscriptions(&self) -> usize {
        self.live_subscriptions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AllowedConversationsFeed for FakeAllowedFeed {
    async fn subscribe(&self, inbox_id: &str) -> Result<AllowedIdsStream, MetadataError> {
        if self.closed.lock().contains(inbox_id) {
            return Err(MetadataError::FeedClosed(inbox_id.to_string()));
        }
        let receiver = self
            .senders
            .lock()
            .entry(inbox_id.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe();

        let guard = LiveGuard::new(&self.live_subscriptions);
        let stream = WatchStream::new(receiver)
            .filter_map(ready)
            .scan(None::<Vec<ConversationId>>, move |previous, current| {
                let _guard = &guard;
                let last = previous.replace(current.clone());
                ready(Some(AllowedIdsUpdate::new(last, current)))
            });
        Ok(stream.boxed())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationCall {
    Subscribe(InboxId, Vec<ConversationId>),
    Unsubscribe(InboxId, Vec<ConversationId>),
}

#[derive(Default)]
pub struct FakeNotifications {
    calls: Mutex<Vec<NotificationCall>>,
    failing: AtomicBool,
}

impl FakeNotifications {
    pub fn calls(&self) -> Vec<NotificationCall> {
        self.calls.lock().clone()
    }

    /// Every id passed to `subscribe` for `inbox_id`, in call order.
    pub fn subscribed(&self, inbox_id: &str) -> Vec<ConversationId> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                NotificationCall::Subscribe(inbox, ids) if inbox == inbox_id => Some(ids.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Every id passed to `unsubscribe` for `inbox_id`, in call order.
    pub fn unsubscribed(&self, inbox_id: &str) -> Vec<ConversationId> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                NotificationCall::Unsubscribe(inbox, ids) if inbox == inbox_id => {
                    Some(ids.clone())
                }
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn record(&self, call: NotificationCall) -> Result<(), NotificationError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotificationError::Unreachable("injected failure".into()));
        }
        self.calls.lock().push(call);
        Ok(())
    }
}

#[async_trait]
impl NotificationTransport for FakeNotifications {
    async fn subscribe(
        &self,
        identity: &Identity,
        conversation_ids: &[ConversationId],
    ) -> Result<(), NotificationError> {
        self.record(NotificationCall::Subscribe(
            identity.inbox_id.clone(),
            conversation_ids.to_vec(),
        ))
    }

    async fn unsubscribe(
        &self,
        identity: &Identity,
        conversation_ids: &[ConversationId],
    ) -> Result<(), NotificationError> {
        self.record(NotificationCall::Unsubscribe(
            identity.inbox_id.clone(),
            conversation_ids.to_vec(),
        ))
    }
}

pub struct FakeIdentityStore {
    identities: watch::Sender<Vec<Identity>>,
}

impl Default for FakeIdentityStore {
    fn default() -> Self {
        Self {
            identities: watch::channel(Vec::new()).0,
        }
    }
}

impl FakeIdentityStore {
    pub fn set(&self, identities: Vec<Identity>) {
        self.identities.send_replace(identities);
    }
}

impl IdentityStore for FakeIdentityStore {
    fn watch(&self) -> IdentityStream {
        WatchStream::new(self.identities.subscribe()).boxed()
    }
}

#[derive(Default)]
pub struct RecordingErrorCapture {
    errors: Mutex<Vec<(InboxId, String)>>,
}

impl RecordingErrorCapture {
    pub fn errors(&self) -> Vec<(InboxId, String)> {
        self.errors.lock().clone()
    }
}

impl ErrorCapture for RecordingErrorCapture {
    fn capture(&self, inbox_id: &str, error: &SyncError) {
        self.errors
            .lock()
            .push((inbox_id.to_string(), error.to_string()));
    }
}

/// Every fake wired into one [`SyncContext`].
#[derive(Clone, Default)]
pub struct Fakes {
    pub network: Arc<FakeNetwork>,
    pub metadata: Arc<FakeMetadataStore>,
    pub feed: Arc<FakeAllowedFeed>,
    pub notifications: Arc<FakeNotifications>,
    pub identities: Arc<FakeIdentityStore>,
    pub errors: Arc<RecordingErrorCapture>,
}

impl Fakes {
    /// A context with a short debounce window so batches flush quickly.
    pub fn context(&self) -> Arc<SyncContext> {
        let options = SyncOptions::builder()
            .debounce_window(Duration::from_millis(10))
            .build();
        Arc::new(
            SyncContext::new(
                self.network.clone(),
                self.metadata.clone(),
                self.feed.clone(),
                self.notifications.clone(),
            )
            .with_error_capture(self.errors.clone())
            .with_options(options),
        )
    }
}
