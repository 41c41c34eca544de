//! Storage layer for scrapers, runs, processed markers and scraped records.
//!
//! Provides an abstraction over different storage backends:
//! - `MemStore`: In-memory storage for testing and single-process use
//! - `PostgresStore`: PostgreSQL for production persistence
//!
//! Backends are reached through a [`StoreConnector`], so every worker
//! process acquires its own connection instead of sharing one.

pub mod data;
mod db;
pub mod query;
mod store;

use std::{error::Error, sync::Arc};

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter};

use crate::{Result, ScrapeflowError, config::PostgresConfig};

use query::*;

pub use db::{MemStore, PostgresStore};
pub use store::Store;

/// Maps database errors to ScrapeflowError.
fn map_db_err(err: impl Error) -> ScrapeflowError {
    ScrapeflowError::Store(err.to_string())
}

/// Identifiers for different storage collections.
#[derive(Debug, Clone, Copy, AsRefStr, PartialEq, Hash, Eq, EnumIter)]
pub enum StoreIden {
    /// Scraper definitions.
    #[strum(serialize = "scrapers")]
    Scrapers,
    /// Run records.
    #[strum(serialize = "runs")]
    Runs,
    /// Processed markers.
    #[strum(serialize = "processed")]
    Processed,
    /// Scraped records.
    #[strum(serialize = "records")]
    Records,
}

impl StoreIden {
    /// Table or collection name.
    pub fn table(&self) -> &'static str {
        match self {
            StoreIden::Scrapers => "scrapers",
            StoreIden::Runs => "runs",
            StoreIden::Processed => "processed",
            StoreIden::Records => "records",
        }
    }
}

/// Paginated query result.
#[derive(Debug, Deserialize, Serialize)]
pub struct PageData<T> {
    /// Total number of matching records.
    pub count: usize,
    /// Current page number (1-based).
    pub page_num: usize,
    /// Total number of pages.
    pub page_count: usize,
    /// Number of records per page.
    pub page_size: usize,
    /// Records in the current page.
    pub rows: Vec<T>,
}

/// Trait for types that can identify their storage collection.
pub trait DbCollectionIden {
    /// Returns the collection identifier for this type.
    fn iden() -> StoreIden;
}

/// Trait for database collection operations.
pub trait DbCollection: Send + Sync {
    /// The type of items stored in this collection.
    type Item;

    /// Checks if a record with the given ID exists.
    fn exists(
        &self,
        id: &str,
    ) -> Result<bool>;

    /// Finds a record by ID.
    fn find(
        &self,
        id: &str,
    ) -> Result<Self::Item>;

    /// Finds the first record matching the query's filter and ordering.
    fn find_first(
        &self,
        query: &Query,
    ) -> Result<Option<Self::Item>>;

    /// Counts records matching the query's filter.
    fn count(
        &self,
        query: &Query,
    ) -> Result<usize>;

    /// Queries records with pagination and filtering.
    fn query(
        &self,
        query: &Query,
    ) -> Result<PageData<Self::Item>>;

    /// Creates a new record.
    fn create(
        &self,
        data: &Self::Item,
    ) -> Result<bool>;

    /// Updates an existing record.
    fn update(
        &self,
        data: &Self::Item,
    ) -> Result<bool>;

    /// Deletes a record by ID.
    fn delete(
        &self,
        id: &str,
    ) -> Result<bool>;
}

/// Trait for database store initialization and lifecycle.
pub trait DbStore: Send + Sync {
    /// Initializes the database and registers collections with the store.
    fn init(
        &self,
        s: &Store,
    ) -> Result<()>;

    /// Verifies the backend is reachable.
    fn health_check(&self) -> Result<()>;

    /// Releases backend resources.
    fn close(&self);
}

/// Factory handing out store connections.
///
/// Each worker calls [`StoreConnector::connect`] once for itself.
pub trait StoreConnector: Send + Sync {
    fn connect(&self) -> Result<Arc<Store>>;
}

/// Shares one in-memory store between every caller.
pub struct MemConnector {
    store: Arc<Store>,
}

impl MemConnector {
    pub fn new() -> Result<Self> {
        let store = Store::with_backend(Arc::new(MemStore::new()))?;
        Ok(Self {
            store: Arc::new(store),
        })
    }

    pub fn store(&self) -> Arc<Store> {
        self.store.clone()
    }
}

impl StoreConnector for MemConnector {
    fn connect(&self) -> Result<Arc<Store>> {
        Ok(self.store.clone())
    }
}

/// Opens a new postgres pool per caller.
pub struct PostgresConnector {
    config: PostgresConfig,
}

impl PostgresConnector {
    pub fn new(config: PostgresConfig) -> Self {
        Self {
            config,
        }
    }
}

impl StoreConnector for PostgresConnector {
    fn connect(&self) -> Result<Arc<Store>> {
        let backend = PostgresStore::new(&self.config.database_url, self.config.max_connections)?;
        Ok(Arc::new(Store::with_backend(Arc::new(backend))?))
    }
}
