//! Client-side conversation reconciliation.
//!
//! For every signed-in identity a [`SenderSyncCoordinator`] follows the set of
//! allowed conversations and keeps three things converged with it: batched
//! network syncs of newly allowed conversations, one metadata observer per
//! active conversation, and the device's push-notification subscriptions.
//! [`MultiIdentityRunner`] starts and disposes coordinators as identities sign
//! in and out.
#![warn(clippy::unwrap_used)]

pub mod api;
pub mod batcher;
pub mod capture;
pub mod configuration;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod reconciler;
pub mod registry;
pub mod runner;
pub mod sync_cache;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test;


pub use batcher::SyncBatcher;
pub use context::{IdentityContext, SyncContext};
pub use coordinator::{CoordinatorState, SenderSyncCoordinator};
pub use error::{Result, SyncError};
pub use reconciler::{MetadataLookup, NotificationReconciler, ReconcileOutcome};
pub use registry::ConversationObserverRegistry;
pub use runner::MultiIdentityRunner;
pub use sync_cache::SyncCache;
