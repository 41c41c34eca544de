//! Declarative field extractors shared by the document and json extraction nodes.

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::ActionError,
    pipeline::template::resolve,
    runtime::Item,
};

/// How the raw text of an element is taken.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TextMode {
    /// All descendant text.
    #[default]
    Text,
    /// First text node, whitespace collapsed.
    NormalisedText,
    /// Inner html.
    Html,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct RegexSpec {
    /// Precondition: the value must contain a match, otherwise it becomes null.
    #[serde(default, rename = "match")]
    pub must_match: Option<String>,
    pub search: String,
    /// Capture group, defaults to 1.
    #[serde(default)]
    pub group: Option<usize>,
    /// Which match to take when the pattern occurs more than once.
    #[serde(default)]
    pub index: usize,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Convert {
    Named(String),
    Typed {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        default: Option<Value>,
    },
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct SplitSpec {
    #[serde(default = "default_split")]
    pub with: String,
    pub index: usize,
}

fn default_split() -> String {
    " ".to_string()
}

/// What to do when extraction yields nothing.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Optional {
    /// `false` turns a missing value into an error, `true` keeps it null.
    Flag(bool),
    Fallback {
        /// item path read instead
        fallback: String,
    },
    Value {
        value: Value,
    },
}

/// Post-processing applied to a raw extracted value, in field order.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct ValuePipeline {
    #[serde(default)]
    pub regex: Option<RegexSpec>,
    #[serde(default)]
    pub convert: Option<Convert>,
    #[serde(default)]
    pub split: Option<SplitSpec>,
    #[serde(default)]
    pub string_join: Option<String>,
    /// Substrings (map keys) that must all be present.
    #[serde(default)]
    pub validate: Option<Map<String, Value>>,
    #[serde(default)]
    pub optional: Option<Optional>,
}

/// One field extractor.
///
/// For documents `selector` is a css selector relative to the current scope;
/// for json it is a dotted path relative to the extraction root.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct FieldSpec {
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub target_field: Option<String>,
    #[serde(default)]
    pub attribute: Option<String>,
    #[serde(default, rename = "type")]
    pub mode: TextMode,
    /// json only: values combined with the node's separator
    #[serde(default)]
    pub join: Vec<FieldSpec>,
    /// json only: constant value
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(flatten)]
    pub pipeline: ValuePipeline,
}

impl ValuePipeline {
    /// Runs the pipeline and applies the optional policy to an empty result.
    pub fn apply(
        &self,
        raw: Option<Value>,
        item: &Item,
    ) -> Result<Option<Value>, ActionError> {
        let original = raw.clone();
        match self.process(raw)? {
            Some(value) => Ok(Some(value)),
            None => self.missing(original, item),
        }
    }

    /// Result for a value that could not be extracted at all.
    pub fn missing(
        &self,
        original: Option<Value>,
        item: &Item,
    ) -> Result<Option<Value>, ActionError> {
        match &self.optional {
            None | Some(Optional::Flag(true)) => Ok(None),
            Some(Optional::Flag(false)) => Err(ActionError::error(format!(
                "Extraction failed in '{}'",
                original.map(|v| display(&v)).unwrap_or_else(|| "None".to_string())
            ))),
            Some(Optional::Fallback {
                fallback,
            }) => {
                let value = resolve(item, fallback)?;
                Ok((!value.is_null()).then_some(value))
            }
            Some(Optional::Value {
                value,
            }) => Ok(Some(value.clone())),
        }
    }

    fn process(
        &self,
        raw: Option<Value>,
    ) -> Result<Option<Value>, ActionError> {
        let mut value = match raw {
            None | Some(Value::Null) => return Ok(None),
            Some(v) => v,
        };

        if let Some(spec) = &self.regex {
            match apply_regex(spec, &display(&value))? {
                Some(text) => value = Value::String(text),
                None => return Ok(None),
            }
        }

        if let Some(convert) = &self.convert {
            match apply_convert(convert, &display(&value))? {
                Converted::Done(v) => return Ok(Some(v)),
                Converted::Text(text) => value = Value::String(text),
                Converted::Empty => return Ok(None),
            }
        }

        if let Some(split) = &self.split {
            let text = display(&value);
            if let Some(part) = text.split(split.with.as_str()).nth(split.index) {
                value = Value::String(part.to_string());
            }
        }

        if let Some(separator) = &self.string_join {
            value = Value::String(match &value {
                Value::Array(parts) => parts.iter().map(display).collect::<Vec<_>>().join(separator),
                other => display(other).chars().map(String::from).collect::<Vec<_>>().join(separator),
            });
        }

        if let Some(required) = &self.validate {
            let text = display(&value);
            if required.keys().any(|key| !text.contains(key.as_str())) {
                return Ok(None);
            }
        }

        Ok(Some(value))
    }
}

/// Plain text form of a value: strings unquoted, everything else as json.
pub(crate) fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn apply_regex(
    spec: &RegexSpec,
    text: &str,
) -> Result<Option<String>, ActionError> {
    if let Some(pattern) = &spec.must_match {
        let precheck = compile(pattern)?;
        if !precheck.is_match(text) {
            return Ok(None);
        }
    }
    let re = compile(&spec.search)?;
    let Some(captures) = re.captures_iter(text).nth(spec.index) else {
        return Ok(None);
    };
    Ok(captures.get(spec.group.unwrap_or(1)).map(|m| m.as_str().to_string()))
}

fn compile(pattern: &str) -> Result<Regex, ActionError> {
    Regex::new(pattern).map_err(|e| ActionError::error(format!("invalid regex '{}': {}", pattern, e)))
}

enum Converted {
    /// final value, skips the rest of the pipeline
    Done(Value),
    Text(String),
    Empty,
}

fn apply_convert(
    convert: &Convert,
    text: &str,
) -> Result<Converted, ActionError> {
    let failed = |name: &str| ActionError::error(format!("Could not convert {} to {}", text, name));
    match convert {
        Convert::Typed {
            kind,
            default,
        } if kind == "string_to_json" => match serde_json::from_str::<Value>(text) {
            Ok(Value::String(s)) => Ok(Converted::Text(s)),
            Ok(other) => Ok(Converted::Done(other)),
            Err(_) => match default {
                None => Ok(Converted::Text(text.to_string())),
                Some(Value::String(s)) if s == "None" => Ok(Converted::Empty),
                Some(Value::Null) => Ok(Converted::Empty),
                Some(v) => Ok(Converted::Done(v.clone())),
            },
        },
        Convert::Typed {
            kind,
            ..
        } => Err(ActionError::error(format!("Invalid converter {}", kind))),
        Convert::Named(name) => match name.as_str() {
            "html_to_text" => Ok(Converted::Text(html_to_text(text))),
            "int" => text.trim().replace(',', "").parse::<i64>().map(|n| Converted::Done(Value::from(n))).map_err(|_| failed(name)),
            "iso_string_to_date" => parse_iso(text).map(|d| Converted::Done(Value::String(d))).ok_or_else(|| failed(name)),
            "relative_date_to_date" => parse_relative(text, Local::now())
                .map(|d| Converted::Done(Value::String(d.to_rfc3339())))
                .ok_or_else(|| failed(name)),
            other => Err(ActionError::error(format!("Invalid converter {}", other))),
        },
    }
}

/// Text content of an html fragment.
pub(crate) fn html_to_text(html: &str) -> String {
    scraper::Html::parse_fragment(html).root_element().text().collect::<String>()
}

fn parse_iso(text: &str) -> Option<String> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.to_rfc3339());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.format("%Y-%m-%dT%H:%M:%S").to_string());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok().map(|d| d.format("%Y-%m-%d").to_string())
}

/// Parses `"<n>d ago"`, `"<n>h ago"` or `"<n>m ago"` relative to `now`.
fn parse_relative(
    text: &str,
    now: DateTime<Local>,
) -> Option<DateTime<Local>> {
    let rest = text.trim().strip_suffix(" ago")?;
    let unit = rest.chars().last()?;
    let amount = rest[..rest.len() - unit.len_utf8()].parse::<i64>().ok()?;
    let delta = match unit {
        'd' => Duration::days(amount),
        'h' => Duration::hours(amount),
        'm' => Duration::minutes(amount),
        _ => return None,
    };
    Some(now - delta)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn pipeline(value: Value) -> ValuePipeline {
        serde_json::from_value(value).unwrap()
    }

    fn run(
        config: Value,
        raw: Value,
    ) -> Result<Option<Value>, ActionError> {
        pipeline(config).apply(Some(raw), &Item::new())
    }

    #[test]
    fn test_regex_group_and_index() {
        let config = json!({"regex": {"search": "(\\d+) jobs"}});
        assert_eq!(run(config, json!("found 42 jobs")).unwrap(), Some(json!("42")));

        let config = json!({"regex": {"search": "#(\\d+)", "index": 1}});
        assert_eq!(run(config, json!("#1 #2 #3")).unwrap(), Some(json!("2")));

        let config = json!({"regex": {"match": "salary", "search": "(\\d+)"}});
        assert_eq!(run(config, json!("no number 12")).unwrap(), None);
    }

    #[test]
    fn test_convert() {
        assert_eq!(run(json!({"convert": "int"}), json!("1,234")).unwrap(), Some(json!(1234)));
        assert!(run(json!({"convert": "int"}), json!("abc")).is_err());
        assert_eq!(run(json!({"convert": "html_to_text"}), json!("<p>Hello <b>world</b></p>")).unwrap(), Some(json!("Hello world")));
        assert_eq!(run(json!({"convert": "iso_string_to_date"}), json!("2024-05-01")).unwrap(), Some(json!("2024-05-01")));
        assert_eq!(run(json!({"convert": {"type": "string_to_json"}}), json!("{\"a\": 1}")).unwrap(), Some(json!({"a": 1})));
        assert_eq!(run(json!({"convert": {"type": "string_to_json", "default": "None"}}), json!("{oops")).unwrap(), None);
        assert!(run(json!({"convert": "bogus"}), json!("x")).is_err());
    }

    #[test]
    fn test_relative_date() {
        let now = Local.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        assert_eq!(parse_relative("2d ago", now).unwrap(), Local.with_ymd_and_hms(2024, 5, 8, 12, 0, 0).unwrap());
        assert_eq!(parse_relative("3h ago", now).unwrap(), Local.with_ymd_and_hms(2024, 5, 10, 9, 0, 0).unwrap());
        assert!(parse_relative("yesterday", now).is_none());
    }

    #[test]
    fn test_split_join_validate() {
        assert_eq!(run(json!({"split": {"with": "|", "index": 1}}), json!("a|b|c")).unwrap(), Some(json!("b")));
        assert_eq!(run(json!({"string_join": ", "}), json!(["a", "b"])).unwrap(), Some(json!("a, b")));
        assert_eq!(run(json!({"validate": {"@": true}}), json!("no mail")).unwrap(), None);
        assert_eq!(run(json!({"validate": {"@": true}}), json!("a@b")).unwrap(), Some(json!("a@b")));
    }

    #[test]
    fn test_optional_policies() {
        let mut item = Item::new();
        item.set("title", "fallback title");

        assert_eq!(pipeline(json!({})).apply(None, &item).unwrap(), None);
        assert!(pipeline(json!({"optional": false})).apply(None, &item).is_err());
        assert_eq!(pipeline(json!({"optional": true})).apply(None, &item).unwrap(), None);
        assert_eq!(pipeline(json!({"optional": {"fallback": "title"}})).apply(None, &item).unwrap(), Some(json!("fallback title")));
        assert_eq!(pipeline(json!({"optional": {"value": 7}})).apply(None, &item).unwrap(), Some(json!(7)));
    }
}
