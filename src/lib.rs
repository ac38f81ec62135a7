//! klassgram - Klassroom to Telegram forwarder
//!
//! Periodically pulls new posts from a Klassroom account and forwards
//! unseen ones (text and attachments) to a Telegram chat, delivering
//! each post at most once across repeated runs.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration loading from the home directory
//! - [`klassly`] - Klassroom API client (login, posts, attachments)
//! - [`telegram`] - Rate-limited, retrying Telegram delivery engine
//! - [`storage`] - Delivery history ledger and run lock
//! - [`sync`] - The pipeline orchestrator tying the above together
//! - [`models`] - Core data structures and types
//!
//! # Example
//!
//! ```no_run
//! use klassgram::config::Config;
//! use klassgram::klassly::KlasslyClient;
//! use klassgram::sync::SyncRunner;
//! use klassgram::telegram::Notifier;
//! use std::path::Path;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(Path::new("."))?;
//!     let source = KlasslyClient::new(
//!         &config.login.user,
//!         &config.login.password,
//!         &config.http.agent,
//!     )?;
//!     let publisher = Notifier::new(
//!         &config.telegram.token,
//!         &config.telegram.chat_id,
//!         Duration::from_millis(config.telegram.throttling_ms),
//!     )?;
//!     let mut runner =
//!         SyncRunner::new(source, publisher, config.classes.names.clone(), &config.home);
//!     let report = runner.run().await?;
//!     println!("delivered {} posts", report.delivered);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod klassly;
pub mod models;
pub mod storage;
pub mod sync;
pub mod telegram;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::klassly::{KlasslyClient, PostSource};
    pub use crate::models::{Attachment, HistoryEntry, Klass, MediaKind, Post, PostKind};
    pub use crate::storage::{History, RunLock};
    pub use crate::sync::{SyncReport, SyncRunner};
    pub use crate::telegram::{Notifier, Publisher, RetryPolicy};
}

// Direct re-exports for convenience
pub use models::{Attachment, Klass, MediaKind, Post, PostKind};
