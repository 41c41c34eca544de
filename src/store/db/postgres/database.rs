use std::sync::Arc;

use tracing::info;

use crate::{
    Result,
    store::{DbCollection, DbStore, Store, StoreIden, data::*, map_db_err},
};

use super::{
    DbInit,
    collection::{DbConnection, DocCollection},
    synclient::SynClient,
};

pub struct PostgresStore {
    conn: DbConnection,
    scrapers: Arc<DocCollection<Scraper>>,
    runs: Arc<DocCollection<Run>>,
    processed: Arc<DocCollection<Processed>>,
    records: Arc<DocCollection<Record>>,
}

impl DbStore for PostgresStore {
    fn init(
        &self,
        s: &Store,
    ) -> Result<()> {
        self.scrapers.init()?;
        self.runs.init()?;
        self.processed.init()?;
        self.records.init()?;

        s.register(self.scrapers())?;
        s.register(self.runs())?;
        s.register(self.processed())?;
        s.register(self.records())?;
        Ok(())
    }

    fn health_check(&self) -> Result<()> {
        self.conn.ping().map_err(map_db_err)
    }

    fn close(&self) {
        info!("closing postgres pool");
        self.conn.close();
    }
}

impl PostgresStore {
    pub fn new(
        db_url: &str,
        max_connections: u32,
    ) -> Result<Self> {
        let conn = Arc::new(SynClient::connect(db_url, max_connections).map_err(map_db_err)?);

        Ok(Self {
            scrapers: Arc::new(DocCollection::new(&conn, StoreIden::Scrapers.table())),
            runs: Arc::new(DocCollection::new(&conn, StoreIden::Runs.table())),
            processed: Arc::new(DocCollection::new(&conn, StoreIden::Processed.table())),
            records: Arc::new(DocCollection::new(&conn, StoreIden::Records.table())),
            conn,
        })
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
