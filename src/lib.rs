//! AuroraWatch UK client.
//!
//! # Overview
//!
//! AuroraWatch UK publishes geomagnetic alert data as small XML documents:
//! the current alert status, the last 24 hours of activity and a table
//! describing each alert level. This crate fetches and parses them and
//! caches every document until the expiry declared by the server, so
//! reading the status in a tight loop costs at most one request per expiry
//! period.
//!
//! # Caching
//!
//! - Each client keeps an in-memory copy of every document.
//! - Fetched documents are also written to a per-user disk cache, so
//!   several processes polling the API share one refresh schedule.
//! - The descriptions table is fetched once per client and kept until
//!   [`AuroraWatchClient::refresh_descriptions`] is called.
//!
//! # Example
//!
//! ```no_run
//! use aurorawatch::{AuroraWatch, AuroraWatchClient, ClientConfig};
//!
//! # async fn run() -> aurorawatch::Result<()> {
//! let client = AuroraWatchClient::new(ClientConfig::load()?)?;
//! let snapshot = client.snapshot();
//! println!(
//!     "{} ({})",
//!     snapshot.status_level().await?,
//!     snapshot.status_color().await?
//! );
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`accessor`]: Live client, snapshots and the shared read interface
//! - [`engine`]: Expiry-driven refresh of cached documents
//! - [`model`]: Alert levels, status, activity and descriptions
//! - [`parser`]: XML document parsing
//! - [`storage`]: Disk cache shared between processes
//! - [`transport`]: HTTP and `file:` retrieval
//! - [`config`]: Client configuration

pub mod accessor;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod parser;
pub mod storage;
pub mod transport;

#[cfg(test)]
mod testing;

pub use accessor::{AuroraWatch, AuroraWatchClient, ClientBuilder, ErrorPolicy, Snapshot};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use model::{
    Activity, ActivityValue, AlertLevel, Descriptions, LevelDescription, Message,
    MessagePriority, ResourceKind, Status, StatusLevel, Thresholds,
};
