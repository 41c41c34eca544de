//! Typed recursive merge used to fold sub-run reports into their parent.
//!
//! Numbers add, objects merge key by key, arrays concatenate. Any other
//! pairing under the same key is rejected. The merge is commutative and
//! associative for the accepted shapes, so arrival order of results does
//! not change totals (array order aside).

use serde_json::{Map, Number, Value};

use crate::{Result, ScrapeflowError};

/// Merges `source` into `target`, leaving `target` untouched on error.
pub fn merge_reports(
    target: &mut Map<String, Value>,
    source: &Map<String, Value>,
) -> Result<()> {
    let mut merged = target.clone();
    merge_into(&mut merged, source, "")?;
    *target = merged;
    Ok(())
}

fn merge_into(
    target: &mut Map<String, Value>,
    source: &Map<String, Value>,
    path: &str,
) -> Result<()> {
    for (key, value) in source {
        let key_path = if path.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", path, key)
        };
        match target.get_mut(key) {
            None => {
                target.insert(key.clone(), value.clone());
            }
            Some(existing) => merge_value(existing, value, &key_path)?,
        }
    }
    Ok(())
}

fn merge_value(
    existing: &mut Value,
    value: &Value,
    path: &str,
) -> Result<()> {
    match (existing, value) {
        (Value::Number(a), Value::Number(b)) => {
            *a = add_numbers(a, b).ok_or_else(|| ScrapeflowError::Merge(format!("cannot add numbers at '{}'", path)))?;
        }
        (Value::Object(a), Value::Object(b)) => merge_into(a, b, path)?,
        (Value::Array(a), Value::Array(b)) => a.extend(b.iter().cloned()),
        (a, b) => {
            return Err(ScrapeflowError::Merge(format!("cannot merge {} with {} at '{}'", type_name(a), type_name(b), path)));
        }
    }
    Ok(())
}

fn add_numbers(
    a: &Number,
    b: &Number,
) -> Option<Number> {
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        return a.checked_add(b).map(Number::from);
    }
    if let (Some(a), Some(b)) = (a.as_u64(), b.as_u64()) {
        return a.checked_add(b).map(Number::from);
    }
    Number::from_f64(a.as_f64()? + b.as_f64()?)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
