use serde::{Deserialize, Serialize};

use crate::store::{DbCollectionIden, StoreIden};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr, strum::EnumString, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProcessedStatus {
    #[default]
    Processed,
    Error,
    Warning,
    Fixed,
}

/// Marker recording that an external record was seen, and how it went.
#[derive(Default, Deserialize, Serialize, Debug, Clone)]
pub struct Processed {
    pub id: String,
    /// natural id of the external record
    pub record_id: String,
    pub scraper_id: String,
    pub status: String,
    pub message: String,
    /// serialized item data
    pub data: String,
    pub timestamp: i64,
}

impl DbCollectionIden for Processed {
    fn iden() -> StoreIden {
        StoreIden::Processed
    }
}
