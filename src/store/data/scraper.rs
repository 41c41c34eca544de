use serde::{Deserialize, Serialize};

use crate::{
    Result,
    model::ScraperModel,
    store::{DbCollectionIden, StoreIden},
};

#[derive(Default, Deserialize, Serialize, Debug, Clone)]
pub struct Scraper {
    pub id: String,
    pub name: String,
    pub active: bool,
    /// serialized [`ScraperModel`]
    pub data: String,
    pub create_time: i64,
    pub update_time: i64,
}

impl Scraper {
    pub fn model(&self) -> Result<ScraperModel> {
        Ok(serde_json::from_str(&self.data)?)
    }
}

impl DbCollectionIden for Scraper {
    fn iden() -> StoreIden {
        StoreIden::Scrapers
    }
}
