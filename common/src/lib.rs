//! Common types shared among the conversation sync crates

#[cfg(any(test, feature = "test-utils"))]
pub use test::*;

pub mod retry;
pub use retry::*;

pub mod stream_handles;
pub use stream_handles::*;

pub mod fmt;
pub mod logging;
pub mod time;
pub mod types;
