use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};

use crate::{
    collab::extract::{FieldSpec, TextMode},
    error::ActionError,
    runtime::Item,
};

/// What to take from every element of a group.
#[derive(Debug, Clone, Copy)]
pub enum ElementExtract<'a> {
    /// One value taken from the element itself; its selector is ignored.
    Single(&'a FieldSpec),
    /// A record built from nested field extractors.
    Record(&'a [FieldSpec]),
}

/// Field extraction from a raw document.
///
/// Implementations parse `source` on every call so no parsed tree outlives the
/// synchronous call.
pub trait DocumentExtractor: Send + Sync {
    /// Extracts every field relative to the document root, returning
    /// `(target_field, value)` pairs in field order.
    fn extract_fields(
        &self,
        source: &str,
        fields: &[FieldSpec],
        item: &Item,
    ) -> Result<Vec<(String, Value)>, ActionError>;

    /// Extracts one value per element matching `selector`, in document order.
    fn extract_groups(
        &self,
        source: &str,
        selector: &str,
        extract: ElementExtract<'_>,
        item: &Item,
    ) -> Result<Vec<Option<Value>>, ActionError>;
}

/// [`DocumentExtractor`] for html using css selectors.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlExtractor;

fn parse_selector(selector: &str) -> Result<Selector, ActionError> {
    Selector::parse(selector).map_err(|e| ActionError::error(format!("invalid selector '{}': {:?}", selector, e)))
}

fn normalise(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn raw_value(
    element: ElementRef<'_>,
    spec: &FieldSpec,
) -> Option<Value> {
    if let Some(attribute) = &spec.attribute {
        return element.value().attr(attribute).map(|v| Value::String(v.to_string()));
    }
    let text = match spec.mode {
        TextMode::Text => element.text().collect::<String>(),
        TextMode::NormalisedText => normalise(element.text().next().unwrap_or_default()),
        TextMode::Html => element.inner_html(),
    };
    Some(Value::String(text))
}

fn extract_from(
    element: ElementRef<'_>,
    spec: &FieldSpec,
    item: &Item,
) -> Result<Option<Value>, ActionError> {
    spec.pipeline.apply(raw_value(element, spec), item)
}

/// Applies `spec` to the first match of its selector inside `scope`.
fn extract_within(
    scope: ElementRef<'_>,
    spec: &FieldSpec,
    item: &Item,
) -> Result<Option<Value>, ActionError> {
    let Some(selector) = &spec.selector else {
        return extract_from(scope, spec, item);
    };
    match scope.select(&parse_selector(selector)?).next() {
        Some(element) => extract_from(element, spec, item),
        None if spec.pipeline.optional.is_some() => spec.pipeline.missing(None, item),
        None => Err(ActionError::error(format!("Could not find element at {}", selector))),
    }
}

fn target_of(spec: &FieldSpec) -> Result<&str, ActionError> {
    spec.target_field.as_deref().ok_or_else(|| ActionError::fatal("field extractor needs a target_field"))
}

impl DocumentExtractor for HtmlExtractor {
    fn extract_fields(
        &self,
        source: &str,
        fields: &[FieldSpec],
        item: &Item,
    ) -> Result<Vec<(String, Value)>, ActionError> {
        let html = Html::parse_document(source);
        let root = html.root_element();
        fields
            .iter()
            .map(|spec| Ok((target_of(spec)?.to_string(), extract_within(root, spec, item)?.unwrap_or(Value::Null))))
            .collect()
    }

    fn extract_groups(
        &self,
        source: &str,
        selector: &str,
        extract: ElementExtract<'_>,
        item: &Item,
    ) -> Result<Vec<Option<Value>>, ActionError> {
        let html = Html::parse_document(source);
        let selector = parse_selector(selector)?;
        html.select(&selector)
            .map(|element| match extract {
                ElementExtract::Single(spec) => extract_from(element, spec, item),
                ElementExtract::Record(fields) => {
                    let mut record = Map::new();
                    for spec in fields {
                        record.insert(target_of(spec)?.to_string(), extract_within(element, spec, item)?.unwrap_or(Value::Null));
                    }
                    Ok(Some(Value::Object(record)))
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <h1 class="title">  Senior   Engineer </h1>
          <a class="apply" href="/apply/42">Apply</a>
          <ul>
            <li class="job"><a href="/j/1">One</a><span class="pay">$100</span></li>
            <li class="job"><a href="/j/2">Two</a></li>
            <li class="job"><a href="/j/3">Three</a><span class="pay">$300</span></li>
          </ul>
        </body></html>
    "#;

    fn spec(value: Value) -> FieldSpec {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_extract_fields() {
        let fields = vec![
            spec(json!({"selector": "h1.title", "target_field": "title", "type": "normalised_text"})),
            spec(json!({"selector": "a.apply", "target_field": "apply", "attribute": "href", "regex": {"search": "(\\d+)"}, "convert": "int"})),
        ];
        let values = HtmlExtractor.extract_fields(PAGE, &fields, &Item::new()).unwrap();
        assert_eq!(values, vec![("title".to_string(), json!("Senior Engineer")), ("apply".to_string(), json!(42))]);
    }

    #[test]
    fn test_missing_element() {
        let fields = vec![spec(json!({"selector": ".nope", "target_field": "x"}))];
        assert!(HtmlExtractor.extract_fields(PAGE, &fields, &Item::new()).is_err());

        let fields = vec![spec(json!({"selector": ".nope", "target_field": "x", "optional": true}))];
        assert_eq!(HtmlExtractor.extract_fields(PAGE, &fields, &Item::new()).unwrap(), vec![("x".to_string(), Value::Null)]);
    }

    #[test]
    fn test_extract_groups_single() {
        let single = spec(json!({"attribute": "href"}));
        let values = HtmlExtractor.extract_groups(PAGE, "li.job a", ElementExtract::Single(&single), &Item::new()).unwrap();
        assert_eq!(values, vec![Some(json!("/j/1")), Some(json!("/j/2")), Some(json!("/j/3"))]);
    }

    #[test]
    fn test_extract_groups_record() {
        let fields = vec![
            spec(json!({"selector": "a", "target_field": "name"})),
            spec(json!({"selector": ".pay", "target_field": "pay", "optional": true})),
        ];
        let values = HtmlExtractor.extract_groups(PAGE, "li.job", ElementExtract::Record(&fields), &Item::new()).unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(values[1], Some(json!({"name": "Two", "pay": null})));
    }

    #[test]
    fn test_invalid_selector() {
        let single = FieldSpec::default();
        assert!(HtmlExtractor.extract_groups(PAGE, "li[", ElementExtract::Single(&single), &Item::new()).is_err());
    }
}
