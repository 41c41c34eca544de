use std::{cmp::Ordering, sync::RwLock};

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use tracing::trace;

use crate::{
    Result, ScrapeflowError,
    store::{DbCollection, PageData, query::Query},
};

use super::DbDocument;

/// In-memory collection keeping rows in insertion order.
#[derive(Debug)]
pub struct Collect<T> {
    name: String,
    rows: RwLock<IndexMap<String, T>>,
}

impl<T> Collect<T>
where
    T: DbDocument,
{
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rows: RwLock::new(IndexMap::new()),
        }
    }

    fn lock_err(&self) -> ScrapeflowError {
        ScrapeflowError::Store(format!("collection '{}' lock poisoned", self.name))
    }

    /// Rows matching the query, ordered, before paging.
    fn matching(
        &self,
        q: &Query,
    ) -> Result<Vec<(JsonValue, T)>> {
        let rows = self.rows.read().map_err(|_| self.lock_err())?;
        let mut matched = Vec::new();
        for row in rows.values() {
            let doc = row.doc()?;
            if q.is_match(&doc) {
                matched.push((doc, row.clone()));
            }
        }

        if !q.order_by().is_empty() {
            matched.sort_by(|(a, _), (b, _)| {
                for (field, rev) in q.order_by() {
                    let ord = compare(a.get(field), b.get(field));
                    let ord = if *rev {
                        ord.reverse()
                    } else {
                        ord
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }
        Ok(matched)
    }
}

fn compare(
    a: Option<&JsonValue>,
    b: Option<&JsonValue>,
) -> Ordering {
    match (a, b) {
        (Some(JsonValue::Number(a)), Some(JsonValue::Number(b))) => a.as_f64().partial_cmp(&b.as_f64()).unwrap_or(Ordering::Equal),
        (Some(JsonValue::String(a)), Some(JsonValue::String(b))) => a.cmp(b),
        (Some(JsonValue::Bool(a)), Some(JsonValue::Bool(b))) => a.cmp(b),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

impl<T> DbCollection for Collect<T>
where
    T: DbDocument + Send + Sync,
{
    type Item = T;

    fn exists(
        &self,
        id: &str,
    ) -> Result<bool> {
        Ok(self.rows.read().map_err(|_| self.lock_err())?.contains_key(id))
    }

    fn find(
        &self,
        id: &str,
    ) -> Result<Self::Item> {
        self.rows
            .read()
            .map_err(|_| self.lock_err())?
            .get(id)
            .cloned()
            .ok_or_else(|| ScrapeflowError::Store(format!("cannot find '{}' in {}", id, self.name)))
    }

    fn find_first(
        &self,
        q: &Query,
    ) -> Result<Option<Self::Item>> {
        Ok(self.matching(q)?.into_iter().next().map(|(_, row)| row))
    }

    fn count(
        &self,
        q: &Query,
    ) -> Result<usize> {
        Ok(self.matching(q)?.len())
    }

    fn query(
        &self,
        q: &Query,
    ) -> Result<PageData<Self::Item>> {
        let matched = self.matching(q)?;
        let count = matched.len();
        let rows = matched.into_iter().skip(q.offset()).take(q.limit()).map(|(_, row)| row).collect::<Vec<_>>();

        Ok(PageData {
            count,
            page_num: q.offset() / q.limit() + 1,
            page_count: count.div_ceil(q.limit()),
            page_size: q.limit(),
            rows,
        })
    }

    fn create(
        &self,
        data: &Self::Item,
    ) -> Result<bool> {
        trace!("{}::create({})", self.name, data.id());
        let mut rows = self.rows.write().map_err(|_| self.lock_err())?;
        if rows.contains_key(data.id()) {
            return Err(ScrapeflowError::Store(format!("'{}' already exists in {}", data.id(), self.name)));
        }
        rows.insert(data.id().to_string(), data.clone());
        Ok(true)
    }

    fn update(
        &self,
        data: &Self::Item,
    ) -> Result<bool> {
        trace!("{}::update({})", self.name, data.id());
        let mut rows = self.rows.write().map_err(|_| self.lock_err())?;
        match rows.get_mut(data.id()) {
            Some(row) => {
                *row = data.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete(
        &self,
        id: &str,
    ) -> Result<bool> {
        Ok(self.rows.write().map_err(|_| self.lock_err())?.shift_remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{data::Processed, query::Cond};

    fn marker(
        id: &str,
        status: &str,
        message: &str,
        timestamp: i64,
    ) -> Processed {
        Processed {
            id: id.into(),
            record_id: format!("ext-{}", id),
            scraper_id: "s1".into(),
            status: status.into(),
            message: message.into(),
            data: "{}".into(),
            timestamp,
        }
    }

    #[test]
    fn test_create_find_update_delete() {
        let collect = Collect::<Processed>::new("processed");
        assert!(collect.create(&marker("1", "processed", "", 1)).unwrap());
        assert!(collect.create(&marker("1", "processed", "", 1)).is_err());
        assert!(collect.exists("1").unwrap());

        let mut row = collect.find("1").unwrap();
        row.status = "fixed".into();
        assert!(collect.update(&row).unwrap());
        assert_eq!(collect.find("1").unwrap().status, "fixed");
        assert!(!collect.update(&marker("2", "error", "", 1)).unwrap());

        assert!(collect.delete("1").unwrap());
        assert!(collect.find("1").is_err());
    }

    #[test]
    fn test_filter_count_and_paging() {
        let collect = Collect::<Processed>::new("processed");
        for i in 0..25 {
            let status = if i % 5 == 0 { "processed" } else { "error" };
            collect.create(&marker(&i.to_string(), status, &format!("failure {}", i), i)).unwrap();
        }

        let errors = Query::new().filter(Cond::eq("status", "error"));
        assert_eq!(collect.count(&errors).unwrap(), 20);

        let page = collect.query(&errors.clone().set_limit(8).set_offset(16)).unwrap();
        assert_eq!(page.count, 20);
        assert_eq!(page.rows.len(), 4);
        assert_eq!(page.page_num, 3);
        assert_eq!(page.page_count, 3);

        let newest = collect.find_first(&errors.order("timestamp", true)).unwrap().unwrap();
        assert_eq!(newest.id, "24");

        let contains = Query::new().filter(Cond::contains("message", "failure 1"));
        assert_eq!(collect.count(&contains).unwrap(), 11);
    }
}
