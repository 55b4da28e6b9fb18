use std::time::Duration;

use smart_default::SmartDefault;

use crate::types::ConsentState;

/// Window during which sync requests are coalesced into a single batch.
pub const SYNC_DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

/// Distinct conversations in one batch at which the batcher stops syncing
/// conversations one by one and syncs the whole allowed set instead.
pub const SYNC_ALL_THRESHOLD: usize = 5;

/// Completed sync entries are evicted right away, so only overlapping calls
/// are deduplicated.
pub const SYNC_CACHE_TTL: Duration = Duration::ZERO;

pub const SYNC_CACHE_CAPACITY: usize = 1000;

/// The only consent states a full sync may touch. Conversations created by
/// someone else must not be able to force a resync of everything they start.
pub const SYNC_ALL_CONSENT_STATES: &[ConsentState] = &[ConsentState::Allowed];

/// Caller tag attached to sync requests issued for newly allowed conversations.
pub const ALLOWED_IDS_CHANGED_CALLER: &str = "allowed-ids-changed";

/// Tunables for one identity's sync machinery.
#[derive(SmartDefault, Debug, PartialEq, Eq, Copy, Clone)]
pub struct SyncOptions {
    #[default(SYNC_DEBOUNCE_WINDOW)]
    debounce_window: Duration,
    #[default(SYNC_ALL_THRESHOLD)]
    batch_threshold: usize,
    #[default(SYNC_CACHE_TTL)]
    cache_ttl: Duration,
    #[default(SYNC_CACHE_CAPACITY)]
    cache_capacity: usize,
}

impl SyncOptions {
    /// Get the builder for [`SyncOptions`]
    pub fn builder() -> SyncOptionsBuilder {
        SyncOptionsBuilder::default()
    }

    pub fn debounce_window(&self) -> Duration {
        self.debounce_window
    }

    pub fn batch_threshold(&self) -> usize {
        self.batch_threshold
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    pub fn cache_capacity(&self) -> usize {
        self.cache_capacity
    }
}

/// Builder for [`SyncOptions`].
///
/// # Example
/// ```
/// use convos_sync::configuration::SyncOptions;
///
/// SyncOptions::builder()
///     .debounce_window(std::time::Duration::from_millis(50))
///     .batch_threshold(10)
///     .build();
/// ```
#[derive(Default, PartialEq, Eq, Copy, Clone)]
pub struct SyncOptionsBuilder {
    debounce_window: Option<Duration>,
    batch_threshold: Option<usize>,
    cache_ttl: Option<Duration>,
    cache_capacity: Option<usize>,
}

impl SyncOptionsBuilder {
    pub fn debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = Some(window);
        self
    }

    pub fn batch_threshold(mut self, threshold: usize) -> Self {
        self.batch_threshold = Some(threshold);
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = Some(capacity);
        self
    }

    pub fn build(self) -> SyncOptions {
        let mut options = SyncOptions::default();

        if let Some(window) = self.debounce_window {
            options.debounce_window = window;
        }
        // a threshold of zero would route every batch, even an empty one, to a full sync
        if let Some(threshold) = self.batch_threshold {
            options.batch_threshold = threshold.max(1);
        }
        if let Some(ttl) = self.cache_ttl {
            options.cache_ttl = ttl;
        }
        if let Some(capacity) = self.cache_capacity {
            options.cache_capacity = capacity.max(1);
        }

        options
    }
}
