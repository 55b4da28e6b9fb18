//! Common Primitive Types that may be shared across the sync crates
//! Types should not have any dependencies other than std and std-adjacent crates

pub type Address = String;
pub type InboxId = String;
pub type InboxIdRef<'a> = &'a str;
