//! # SiloDB Core
//!
//! Core engine for SiloDB, a small embedded document store.
//!
//! This crate provides:
//! - Sharded routing of writes and reads across independent partitions
//! - Append-only block storage with logical deletion and compaction
//! - Unique and multi-valued (dense-ordinal) secondary indexes
//! - Index snapshot persistence and rebuild on open
//!
//! The host application supplies opaque payloads and index descriptors;
//! SiloDB hands back raw payload bytes and the keys and shard ids needed
//! to find them again.
//!
//! ## Example
//!
//! ```no_run
//! use silodb_core::{Config, IndexDescriptor, Store};
//!
//! # fn main() -> silodb_core::CoreResult<()> {
//! let store = Store::open(Config::new("my_store"))?;
//!
//! let keys = store.set(
//!     &[IndexDescriptor::unique("email", "a@example.com")],
//!     b"payload bytes",
//! )?;
//!
//! let shard = keys["email:a@example.com"];
//! let payload = store.find_by_unique_key(shard, "email", "a@example.com")?;
//! assert_eq!(payload, b"payload bytes");
//!
//! store.sync()?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod dir;
pub mod error;
pub mod id;
pub mod index;
pub mod shard;
pub mod store;
pub mod types;

pub use config::{Config, DEFAULT_SHARD_COUNT};
pub use error::{CoreError, CoreResult};
pub use id::RecordId;
pub use shard::{Shard, ShardOffset};
pub use store::{IterBuffered, Store};
pub use types::IndexDescriptor;
