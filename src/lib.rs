//! # content-sync - Realtime content cache for a travel agency site
//!
//! Keeps tour packages, blog posts, destinations and live ticket prices in
//! memory, synchronized with a hosted relational service.
//!
//! ## Features
//!
//! - **Bulk load**: four concurrent read-all queries, newest first
//! - **Change feed**: one realtime subscription per table, applied in arrival order
//! - **Write-through**: add/update/delete hit the service first; local state
//!   only reflects confirmed rows
//! - **Image hosting**: inline `data:` images are recompressed and uploaded
//!   before the row is written
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use content_sync::{ContentSyncStore, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServiceConfig::from_env()?;
//!     let store = ContentSyncStore::connect(&config)?;
//!     store.start().await;
//!
//!     for pkg in store.packages() {
//!         println!("{} - {}", pkg.destination, pkg.duration);
//!     }
//!
//!     store.teardown().await;
//!     Ok(())
//! }
//! ```

pub mod collection;
pub mod config;
pub mod error;
pub mod imaging;
pub mod models;
pub mod remote;
pub mod seed;
pub mod store;

// Re-export main types for library consumers
pub use collection::{Change, Collection, Collections};
pub use config::ServiceConfig;
pub use error::{ErrorCategory, Result, SyncError};
pub use imaging::ImageCodec;
pub use models::{BlogPost, CollectionKind, Destination, ImageRef, LiveTicket, Package, Record, Trend};
pub use remote::{ChangeFeed, ObjectStorage, RowChange, RowService};
pub use store::{AlertSink, ContentSyncStore, LogAlerts, Origin, Services, StoreEvent, StoreEventKind};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
