//! # Scrapeflow
//!
//! Scrapeflow runs declarative scraping pipelines. A pipeline is a tree of
//! actions (fetch, extract, loop, persist) executed against a per-record
//! [`Item`](runtime::Item), with a severity-based failure model and a
//! fixed-size worker pool for fanning sub-trees out to isolated processes.
//!
//! ## Core Features
//!
//! - **Declarative pipelines**: yaml or json trees of `name: "Label (kind)"` nodes
//! - **Severity model**: fatal, error, warning, info and abort failures with error boundaries
//! - **Worker pool**: slot-based backpressure and exactly-once result merging
//! - **Run queue**: cron-style schedules, stop requests, summaries and notification mails
//! - **Pluggable storage**: in-memory store (testing) and PostgreSQL (production)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use scrapeflow::{Config, QueueBuilder, model::Properties};
//!
//! let queue = QueueBuilder::new(Config::create("scrapeflow.toml")?).build()?;
//! queue.launch()?;
//!
//! let run_id = queue.start_scraper("jobs", Properties::new())?;
//! ```

mod builder;
pub mod collab;
pub mod common;
pub mod config;
mod error;
pub mod events;
pub mod model;
pub mod pipeline;
pub mod pool;
pub mod queue;
pub mod runtime;
pub mod store;
pub mod utils;

use std::sync::{Arc, RwLock};

pub use builder::QueueBuilder;
pub use config::Config;
pub use error::{ActionError, ScrapeflowError, Severity};
pub use queue::{RunQueue, RunRequest};
pub use runtime::{ChannelEvent, ChannelOptions};

/// Result type alias for Scrapeflow operations.
pub type Result<T> = std::result::Result<T, ScrapeflowError>;

/// Thread-safe shared lock wrapper using Arc<RwLock<T>>.
pub(crate) type ShareLock<T> = Arc<RwLock<T>>;
