//! # pagebeam-core
//!
//! Core library for pagebeam - a first-party page-analytics tracking
//! pipeline.
//!
//! This library provides:
//! - Campaign attribution capture (UTM parameters) with session persistence
//! - Event record assembly from page context
//! - HTTP delivery to one configured collection endpoint, with retry
//! - In-memory batching with size, timer, and teardown flushes
//! - Page instrumentation driving the pipeline from browser-level signals
//!
//! ## Architecture
//!
//! Signals flow through the pipeline in one direction:
//!
//! ```text
//! PageSignal → PageTracker → EventBuilder → BatchQueue → DeliveryClient
//!                                 │
//!                          AttributionStore (session storage)
//! ```
//!
//! Host capabilities (page location, session storage) are injected behind
//! the [`context::PageContext`] and [`context::SessionStore`] traits, so the
//! same pipeline runs against a live page, a test harness, or a replayed
//! signal journal.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pagebeam_core::{Config, MemoryStore, PageTracker, SnapshotPage};
//!
//! # async fn run() -> pagebeam_core::Result<()> {
//! let config = Config::load()?;
//! let page = Arc::new(SnapshotPage::new("Mozilla/5.0"));
//! let store = Arc::new(MemoryStore::new());
//!
//! let tracker = PageTracker::mount(&config.tracker, page, store)?;
//! tracker.track("demo_request", serde_json::Map::new());
//! tracker.shutdown().await;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use attribution::{parse_query, AttributionParams, AttributionStore};
pub use config::{Config, Environment, TrackerConfig};
pub use context::{MemoryStore, NoopStore, PageContext, SessionStore, SnapshotPage};
pub use delivery::{DeliveryClient, DeliveryResult};
pub use error::{Error, Result};
pub use event::{EventBuilder, EventRecord};
pub use instrument::{PageSignal, PageTracker};
pub use queue::{BatchQueue, QueueStats};

// Public modules
pub mod attribution;
pub mod config;
pub mod context;
pub mod delivery;
pub mod error;
pub mod event;
pub mod instrument;
pub mod logging;
pub mod queue;
