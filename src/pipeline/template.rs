//! `${path}` substitution and path lookup against items.

use regex::Regex;
use serde_json::Value;

use crate::{collab::display, error::ActionError, runtime::Item, utils};

/// Format: `${path.to.value}` or `${?optional.path}`
const TEMPLATE_PATTERN: &str = r"\$\{(.*?)\}";

fn pattern() -> Result<Regex, ActionError> {
    Regex::new(TEMPLATE_PATTERN).map_err(|e| ActionError::fatal(e.to_string()))
}

fn short(value: &Value) -> String {
    utils::truncate(&value.to_string(), 80)
}

/// Walks `parts` starting at `current`.
///
/// Lists take numeric indexes. With `optional` set, a missing key, index or
/// null parent yields null instead of an error.
fn walk<'a>(
    mut current: &Value,
    parts: impl Iterator<Item = &'a str>,
    optional: bool,
) -> Result<Value, ActionError> {
    for part in parts {
        current = match current {
            Value::Array(list) => match part.parse::<usize>().ok().and_then(|index| list.get(index)) {
                Some(value) => value,
                None if optional => return Ok(Value::Null),
                None => return Err(ActionError::error(format!("Could not find index {} in list of {}", part, list.len()))),
            },
            Value::Object(map) => match map.get(part) {
                Some(value) => value,
                None if optional => return Ok(Value::Null),
                None => return Err(ActionError::error(format!("Could not find {} in {}", part, short(current)))),
            },
            Value::Null if optional => return Ok(Value::Null),
            Value::Null => return Err(ActionError::error(format!("Could not find {} in null", part))),
            other => return Err(ActionError::error(format!("Expected dictionary {} in {}", part, short(other)))),
        };
    }
    Ok(current.clone())
}

fn split_optional(path: &str) -> (bool, &str) {
    match path.trim().strip_prefix('?') {
        Some(rest) => (true, rest),
        None => (false, path.trim()),
    }
}

/// Looks up a dotted path inside a json value.
pub fn find_path(
    root: &Value,
    path: &str,
) -> Result<Value, ActionError> {
    let (optional, path) = split_optional(path);
    walk(root, path.split('.'), optional)
}

/// Looks up a dotted path inside an item without snapshotting it.
pub fn resolve(
    item: &Item,
    path: &str,
) -> Result<Value, ActionError> {
    let (optional, path) = split_optional(path);
    let mut parts = path.split('.');
    let first = parts.next().unwrap_or_default();
    match item.get(first) {
        Some(root) => walk(root, parts, optional),
        None if optional => Ok(Value::Null),
        None => Err(ActionError::error(format!("Could not find {} in item", first))),
    }
}

/// Replaces every `${path}` in `template` with the text of the resolved value.
/// Null renders as `null`.
pub fn render(
    template: &str,
    item: &Item,
) -> Result<String, ActionError> {
    if !template.contains("${") {
        return Ok(template.to_string());
    }
    let re = pattern()?;
    let mut result = String::with_capacity(template.len());
    let mut last = 0;
    for caps in re.captures_iter(template) {
        let (Some(whole), Some(path)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        result.push_str(&template[last..whole.start()]);
        result.push_str(&display(&resolve(item, path.as_str())?));
        last = whole.end();
    }
    result.push_str(&template[last..]);
    Ok(result)
}

/// Like [`render`], but a template made of a single `${path}` keeps the raw value.
pub fn render_value(
    template: &str,
    item: &Item,
) -> Result<Value, ActionError> {
    let trimmed = template.trim();
    if let Some(path) = trimmed.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
        if !path.contains("${") && !path.contains('}') {
            return resolve(item, path);
        }
    }
    render(template, item).map(Value::String)
}

/// Renders every string inside a json value.
pub fn render_json(
    value: &Value,
    item: &Item,
) -> Result<Value, ActionError> {
    match value {
        Value::String(s) => render_value(s, item),
        Value::Array(list) => list.iter().map(|v| render_json(v, item)).collect::<Result<Vec<_>, _>>().map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| render_json(v, item).map(|rv| (k.clone(), rv)))
            .collect::<Result<serde_json::Map<_, _>, _>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::Severity;

    fn item(value: Value) -> Item {
        Item::from_value(value).unwrap()
    }

    #[test]
    fn test_render_path() {
        let item = item(json!({"a": {"b": "X"}}));
        assert_eq!(render("val=${a.b}", &item).unwrap(), "val=X");
        assert_eq!(render("no templates", &item).unwrap(), "no templates");
    }

    #[test]
    fn test_optional_path() {
        let item = item(json!({"a": {"b": "X"}}));
        assert_eq!(render_value("${?a.c}", &item).unwrap(), Value::Null);
        assert_eq!(render("c=${?a.c}", &item).unwrap(), "c=null");
        assert_eq!(resolve(&item, "?missing.deep").unwrap(), Value::Null);
    }

    #[test]
    fn test_missing_path_is_error() {
        let item = item(json!({"a": {"b": "X"}}));
        let err = render("${a.c}", &item).unwrap_err();
        assert_eq!(err.severity(), Some(Severity::Error));
        assert!(resolve(&item, "a.b.c").is_err());
    }

    #[test]
    fn test_list_indexes() {
        let item = item(json!({"jobs": [{"id": 1}, {"id": 2}]}));
        assert_eq!(render("${jobs.1.id}", &item).unwrap(), "2");
        assert!(resolve(&item, "jobs.first").is_err());
        assert!(resolve(&item, "jobs.5").is_err());
        assert_eq!(resolve(&item, "?jobs.5").unwrap(), Value::Null);
    }

    #[test]
    fn test_render_value_keeps_type() {
        let item = item(json!({"page": 3, "tags": ["a"]}));
        assert_eq!(render_value("${page}", &item).unwrap(), json!(3));
        assert_eq!(render_value("${tags}", &item).unwrap(), json!(["a"]));
        assert_eq!(render_value("p${page}", &item).unwrap(), json!("p3"));
    }

    #[test]
    fn test_render_json() {
        let item = item(json!({"page": 3, "q": "rust"}));
        let rendered = render_json(&json!({"page": "${page}", "query": "lang:${q}", "fixed": 1}), &item).unwrap();
        assert_eq!(rendered, json!({"page": 3, "query": "lang:rust", "fixed": 1}));
    }

    #[test]
    fn test_find_path_on_value() {
        let root = json!({"data": {"jobs": {"total": 7}}});
        assert_eq!(find_path(&root, "data.jobs.total").unwrap(), json!(7));
        assert!(find_path(&root, "data.nope").is_err());
    }
}
