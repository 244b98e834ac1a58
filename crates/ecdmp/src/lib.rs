//! ECDMP event tracking SDK for Rust.
//!
//! Queues behavioral events with visitor and session identity, persists
//! them through a pluggable key-value store so they survive restarts, and
//! uploads them in batches on a fixed interval. Respects a persisted
//! opt-out flag.
//!
//! # Example
//!
//! ```rust,ignore
//! use ecdmp::{EventType, FileStore, Tracker};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ecdmp::Error> {
//!     let tracker = Tracker::builder()
//!         .store(FileStore::new("/var/lib/myapp/ecdmp"))
//!         .flush_interval(Duration::from_secs(30))
//!         .build()?;
//!
//!     tracker.set_flush_callback(|summary| println!("{summary}"));
//!     tracker.init("com.example.app", "feed_123").await;
//!
//!     tracker.event(EventType::PageView)
//!         .uri("app://home")
//!         .send()
//!         .await;
//!
//!     tracker.identify("cust_1", "user@example.com", "", "device_1", None).await;
//!
//!     tracker.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod builders;
mod client;
mod config;
mod error;
mod queue;
mod session;
pub mod storage;
pub mod transport;
pub mod types;

pub use client::{FlushCallback, SendableEvent, Tracker};
pub use config::{
    Config, TrackerBuilder, BETA_API_HOST, DEFAULT_API_HOST, DEFAULT_FLUSH_INTERVAL,
    DEFAULT_MAX_QUEUE_LEN, DEFAULT_SESSION_EXPIRE, DEFAULT_TIMEOUT,
};
pub use error::Error;
pub use storage::{FileStore, KeyValueStore, MemoryStore, KEY_EVENTS, KEY_PREFERENCE};
pub use transport::{HttpTransport, Uploader};
pub use types::{Event, EventType, Preference};

/// Re-exported so custom [`KeyValueStore`] and [`Uploader`] implementations
/// can use the same attribute macro.
pub use async_trait::async_trait;
