use serde::{Deserialize, Serialize};

use crate::store::{DbCollectionIden, StoreIden};

/// A scraped record saved by a pipeline.
#[derive(Default, Deserialize, Serialize, Debug, Clone)]
pub struct Record {
    pub id: String,
    pub record_id: String,
    pub scraper_id: String,
    pub url: String,
    /// serialized item data
    pub data: String,
    pub timestamp: i64,
}

impl DbCollectionIden for Record {
    fn iden() -> StoreIden {
        StoreIden::Records
    }
}
