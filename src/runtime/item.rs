//! The record threaded through a traversal.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::{Result, ScrapeflowError};

type Fields = IndexMap<String, Arc<Value>>;

/// Ordered key/value working state of one traversal path.
///
/// Cloning is cheap: the top-level map is shared until the first write on
/// either side, at which point only the map of entry pointers is copied.
/// Nested values are never copied by a branch, and keys are never removed.
#[derive(Debug, Clone, Default)]
pub struct Item {
    fields: Arc<Fields>,
    document: Option<Arc<str>>,
    url: String,
}

impl Item {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an item from a json object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self::from_map(map)),
            Value::Null => Ok(Self::new()),
            other => Err(ScrapeflowError::Convert(format!("item must be an object, got {}", other))),
        }
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self {
            fields: Arc::new(map.into_iter().map(|(k, v)| (k, Arc::new(v))).collect()),
            document: None,
            url: String::new(),
        }
    }

    /// Clone taken at a branch point.
    pub fn branch(&self) -> Self {
        self.clone()
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Option<&Value> {
        self.fields.get(key).map(|v| v.as_ref())
    }

    pub fn contains_key(
        &self,
        key: &str,
    ) -> bool {
        self.fields.contains_key(key)
    }

    /// Adds or overwrites a top-level key.
    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) {
        Arc::make_mut(&mut self.fields).insert(key.into(), Arc::new(value.into()));
    }

    /// Overwrites every key present in `map`.
    pub fn extend(
        &mut self,
        map: Map<String, Value>,
    ) {
        let fields = Arc::make_mut(&mut self.fields);
        for (key, value) in map {
            fields.insert(key, Arc::new(value));
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Plain json snapshot, used for templates and for crossing process boundaries.
    pub fn to_value(&self) -> Value {
        Value::Object(self.to_map())
    }

    pub fn to_map(&self) -> Map<String, Value> {
        self.fields.iter().map(|(k, v)| (k.clone(), v.as_ref().clone())).collect()
    }

    /// Raw text of the current document (page source).
    pub fn document(&self) -> Option<&str> {
        self.document.as_deref()
    }

    /// Handle on the current document that does not borrow the item.
    pub fn shared_document(&self) -> Option<Arc<str>> {
        self.document.clone()
    }

    pub fn set_document(
        &mut self,
        source: impl Into<Arc<str>>,
    ) {
        self.document = Some(source.into());
    }

    /// Url the current document was loaded from.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn set_url(
        &mut self,
        url: impl Into<String>,
    ) {
        self.url = url.into();
    }

    #[cfg(test)]
    pub(crate) fn shares_fields_with(
        &self,
        other: &Item,
    ) -> bool {
        Arc::ptr_eq(&self.fields, &other.fields)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_branch_is_isolated() {
        let mut parent = Item::from_value(json!({"a": 1, "nested": {"x": [1, 2, 3]}})).unwrap();
        let mut left = parent.branch();
        let mut right = parent.branch();
        assert!(left.shares_fields_with(&parent));

        left.set("a", 2);
        right.set("b", "new");

        assert!(!left.shares_fields_with(&parent));
        assert_eq!(parent.get("a"), Some(&json!(1)));
        assert_eq!(left.get("a"), Some(&json!(2)));
        assert_eq!(right.get("a"), Some(&json!(1)));
        assert!(right.get("b").is_some());
        assert!(left.get("b").is_none());
        assert!(parent.get("b").is_none());

        parent.set("c", true);
        assert!(left.get("c").is_none());
    }

    #[test]
    fn test_branch_shares_nested_values() {
        let parent = Item::from_value(json!({"nested": {"x": 1}})).unwrap();
        let mut child = parent.branch();
        child.set("other", 1);
        let a = parent.fields.get("nested").unwrap();
        let b = child.fields.get("nested").unwrap();
        assert!(Arc::ptr_eq(a, b));
    }

    #[test]
    fn test_order_and_snapshot() {
        let mut item = Item::new();
        item.set("z", 1);
        item.set("a", 2);
        item.set("z", 3);
        assert_eq!(item.keys().cloned().collect::<Vec<_>>(), vec!["z", "a"]);
        assert_eq!(item.to_value(), json!({"z": 3, "a": 2}));
    }

    #[test]
    fn test_from_value_rejects_scalars() {
        assert!(Item::from_value(json!(1)).is_err());
        assert!(Item::from_value(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_document_travels_with_branch() {
        let mut item = Item::new();
        item.set_document("<p>hi</p>");
        item.set_url("https://example.com");
        let child = item.branch();
        assert_eq!(child.document(), Some("<p>hi</p>"));
        assert_eq!(child.url(), "https://example.com");
    }
}
