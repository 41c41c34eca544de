mod collect;

use std::sync::Arc;

use crate::{
    Result,
    store::{DbCollection, DbStore, Store, data::*},
};
pub use collect::Collect;

pub(crate) use super::DbDocument;

#[derive(Debug, Clone)]
pub struct MemStore {
    scrapers: Arc<Collect<Scraper>>,
    runs: Arc<Collect<Run>>,
    processed: Arc<Collect<Processed>>,
    records: Arc<Collect<Record>>,
}


impl DbStore for MemStore {
    fn init(
        &self,
        s: &Store,
    ) -> Result<()> {
        s.register(self.scrapers())?;
        s.register(self.runs())?;
        s.register(self.processed())?;
        s.register(self.records())?;
        Ok(())
    }

    fn health_check(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) {}
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            scrapers: Arc::new(Collect::new("scrapers")),
            runs: Arc::new(Collect::new("runs")),
            processed: Arc::new(Collect::new("processed")),
            records: Arc::new(Collect::new("records")),
        }
    }

    pub fn scrapers(&self) -> Arc<dyn DbCollection<Item = Scraper> + Send + Sync> {
        self.scrapers.clone()
    }

    pub fn runs(&self) -> Arc<dyn DbCollection<Item = Run> + Send + Sync> {
        self.runs.clone()
    }

    pub fn processed(&self) -> Arc<dyn DbCollection<Item = Processed> + Send + Sync> {
        self.processed.clone()
    }

    pub fn records(&self) -> Arc<dyn DbCollection<Item = Record> + Send + Sync> {
        self.records.clone()
    }
}
