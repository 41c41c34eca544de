use serde::{Deserialize, Serialize};

use crate::store::{DbCollectionIden, StoreIden};

/// Persisted run metadata; created at start, updated once at finish.
#[derive(Default, Deserialize, Serialize, Debug, Clone)]
pub struct Run {
    pub id: String,
    pub scraper_id: String,
    pub status: String,
    pub start_time: i64,
    pub end_time: i64,

    pub succeeded: i64,
    pub failed: i64,
    pub existing: i64,
    pub skipped: i64,

    pub message: String,
    pub log: String,
    /// serialized report map
    pub report: String,

    pub day: i64,
    pub hour: i64,
    pub minute: i64,
}

impl DbCollectionIden for Run {
    fn iden() -> StoreIden {
        StoreIden::Runs
    }
}
