mod mem;
mod postgres;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value as JsonValue;

use crate::{Result, store::data::*};

pub use mem::MemStore;
pub use postgres::PostgresStore;

/// A row stored as a json document, filterable by top-level field.
pub trait DbDocument: Serialize + DeserializeOwned + Clone {
    fn id(&self) -> &str;

    fn doc(&self) -> Result<JsonValue> {
        Ok(serde_json::to_value(self)?)
    }
}

macro_rules! impl_document {
    ($($ty:ty),+) => {
        $(impl DbDocument for $ty {
            fn id(&self) -> &str {
                &self.id
            }
        })+
    };
}

impl_document!(Scraper, Run, Processed, Record);
