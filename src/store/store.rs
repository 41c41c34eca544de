use std::{
    any::Any,
    collections::HashMap,
    convert::AsRef,
    sync::{Arc, RwLock},
};

use tracing::trace;

use crate::{Result, ScrapeflowError, ShareLock, model::ScraperModel, utils};

use super::{
    DbCollection, DbCollectionIden, DbStore,
    data::*,
    query::{Cond, Query},
};

/// Page size used when walking every row of a collection.
const SCAN_PAGE_SIZE: usize = 200;

#[derive(Clone)]
pub struct DynDbSetRef<T>(Arc<dyn DbCollection<Item = T>>);

pub struct Store {
    collections: ShareLock<HashMap<super::StoreIden, Arc<dyn Any + Send + Sync + 'static>>>,
    backend: RwLock<Option<Arc<dyn DbStore>>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            collections: Arc::new(RwLock::new(HashMap::new())),
            backend: RwLock::new(None),
        }
    }

    /// Creates a store whose collections are provided by `backend`.
    pub fn with_backend(backend: Arc<dyn DbStore>) -> Result<Self> {
        let store = Self::new();
        backend.init(&store)?;
        *store.backend.write().map_err(|e| ScrapeflowError::Store(e.to_string()))? = Some(backend);
        Ok(store)
    }

    pub fn collection<DATA>(&self) -> Result<Arc<dyn DbCollection<Item = DATA>>>
    where
        DATA: DbCollectionIden + Send + Sync + 'static,
    {
        let collections = self.collections.read().map_err(|e| ScrapeflowError::Store(e.to_string()))?;

        collections
            .get(&DATA::iden())
            .and_then(|collection| collection.downcast_ref::<DynDbSetRef<DATA>>())
            .map(|v| v.0.clone())
            .ok_or_else(|| ScrapeflowError::Store(format!("fail to get collection: {}", DATA::iden().as_ref())))
    }

    pub fn register<DATA>(
        &self,
        collection: Arc<dyn DbCollection<Item = DATA> + Send + Sync + 'static>,
    ) -> Result<()>
    where
        DATA: DbCollectionIden + 'static,
    {
        let mut collections = self.collections.write().map_err(|e| ScrapeflowError::Store(e.to_string()))?;
        collections.insert(DATA::iden(), Arc::new(DynDbSetRef::<DATA>(collection)));
        Ok(())
    }

    pub fn scrapers(&self) -> Result<Arc<dyn DbCollection<Item = Scraper>>> {
        self.collection()
    }

    pub fn runs(&self) -> Result<Arc<dyn DbCollection<Item = Run>>> {
        self.collection()
    }

    pub fn processed(&self) -> Result<Arc<dyn DbCollection<Item = Processed>>> {
        self.collection()
    }

    pub fn records(&self) -> Result<Arc<dyn DbCollection<Item = Record>>> {
        self.collection()
    }

    pub fn health_check(&self) -> Result<()> {
        match self.backend.read().map_err(|e| ScrapeflowError::Store(e.to_string()))?.as_ref() {
            Some(backend) => backend.health_check(),
            None => Err(ScrapeflowError::Store("store has no backend".into())),
        }
    }

    pub fn close(&self) {
        if let Ok(backend) = self.backend.read() {
            if let Some(backend) = backend.as_ref() {
                backend.close();
            }
        }
    }

    /// Creates or replaces a scraper definition.
    pub fn save_scraper(
        &self,
        scraper: &ScraperModel,
    ) -> Result<bool> {
        trace!("store::save_scraper({})", scraper.id);
        if scraper.id.is_empty() {
            return Err(ScrapeflowError::Store("missing id in scraper".into()));
        }
        let scrapers = self.scrapers()?;
        let text = serde_json::to_string(scraper)?;
        match scrapers.find(&scraper.id) {
            Ok(existing) => scrapers.update(&Scraper {
                id: scraper.id.clone(),
                name: scraper.name.clone(),
                active: scraper.active,
                data: text,
                create_time: existing.create_time,
                update_time: utils::time::time_millis(),
            }),
            Err(_) => scrapers.create(&Scraper {
                id: scraper.id.clone(),
                name: scraper.name.clone(),
                active: scraper.active,
                data: text,
                create_time: utils::time::time_millis(),
                update_time: 0,
            }),
        }
    }

    pub fn scraper(
        &self,
        id: &str,
    ) -> Result<ScraperModel> {
        self.scrapers()?.find(id)?.model()
    }

    /// Every scraper flagged active, walking all pages.
    pub fn active_scrapers(&self) -> Result<Vec<ScraperModel>> {
        let scrapers = self.scrapers()?;
        let mut models = Vec::new();
        let mut offset = 0;
        loop {
            let page = scrapers.query(&Query::new().filter(Cond::eq("active", true)).set_limit(SCAN_PAGE_SIZE).set_offset(offset))?;
            let fetched = page.rows.len();
            for row in page.rows {
                models.push(row.model()?);
            }
            offset += fetched;
            if fetched == 0 || offset >= page.count {
                break;
            }
        }
        Ok(models)
    }
}
