//! Backend-neutral query description used by [`DbCollection`](super::DbCollection).

use serde_json::Value;

/// Default page size for paged queries.
pub const DEFAULT_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub enum CondOp {
    /// field equals value
    Eq,
    /// string field contains value
    Contains,
}

/// One filter on a top-level document field.
#[derive(Debug, Clone, PartialEq)]
pub struct Cond {
    pub field: String,
    pub op: CondOp,
    pub value: Value,
}

impl Cond {
    pub fn eq(
        field: &str,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            field: field.to_string(),
            op: CondOp::Eq,
            value: value.into(),
        }
    }

    pub fn contains(
        field: &str,
        value: &str,
    ) -> Self {
        Self {
            field: field.to_string(),
            op: CondOp::Contains,
            value: Value::String(value.to_string()),
        }
    }

    /// Evaluates the condition against a json document.
    pub fn is_match(
        &self,
        doc: &Value,
    ) -> bool {
        let Some(field) = doc.get(&self.field) else {
            return false;
        };
        match self.op {
            CondOp::Eq => field == &self.value || text_of(field) == text_of(&self.value),
            CondOp::Contains => text_of(field).contains(&text_of(&self.value)),
        }
    }
}

pub(crate) fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Conjunction of filters plus paging and ordering.
#[derive(Debug, Clone)]
pub struct Query {
    filter: Vec<Cond>,
    order_by: Vec<(String, bool)>,
    limit: usize,
    offset: usize,
}

impl Default for Query {
    fn default() -> Self {
        Self::new()
    }
}

impl Query {
    pub fn new() -> Self {
        Self {
            filter: Vec::new(),
            order_by: Vec::new(),
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }

    pub fn filter(
        mut self,
        cond: Cond,
    ) -> Self {
        self.filter.push(cond);
        self
    }

    /// Orders by `field`, descending when `rev` is set.
    pub fn order(
        mut self,
        field: &str,
        rev: bool,
    ) -> Self {
        self.order_by.push((field.to_string(), rev));
        self
    }

    pub fn set_limit(
        mut self,
        limit: usize,
    ) -> Self {
        self.limit = limit.max(1);
        self
    }

    pub fn set_offset(
        mut self,
        offset: usize,
    ) -> Self {
        self.offset = offset;
        self
    }

    pub fn conditions(&self) -> &[Cond] {
        &self.filter
    }

    pub fn order_by(&self) -> &[(String, bool)] {
        &self.order_by
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_match(
        &self,
        doc: &Value,
    ) -> bool {
        self.filter.iter().all(|cond| cond.is_match(doc))
    }
}
