//! A small sandboxed expression language for conditions and computed fields.
//!
//! Supported: number, string, boolean and null literals; dotted item paths
//! (`job.tags.0`, optional with a leading `?`); `or and not ! && ||`;
//! comparisons `== != < <= > >= in` (and `not in`); arithmetic `+ - * / %`;
//! parentheses. There are no function calls and no access to anything but
//! the item.

mod parser;

use std::cmp::Ordering;

use serde_json::Value;

use crate::{Result, error::ActionError, pipeline::template, runtime::Item};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinOp {
    fn is_comparison(&self) -> bool {
        matches!(self, BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge)
    }

    fn symbol(&self) -> &'static str {
        match self {
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::In => "in",
            BinOp::NotIn => "not in",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path(String),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

/// Truthiness: null, false, zero and empty strings, lists and maps are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(list) => !list.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(value: &Value) -> Option<Num> {
        let n = value.as_number()?;
        n.as_i64().map(Num::Int).or_else(|| n.as_f64().map(Num::Float))
    }

    fn float(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

fn unsupported(
    op: BinOp,
    left: &Value,
    right: &Value,
) -> ActionError {
    ActionError::error(format!("unsupported operand types for {}: {} and {}", op.symbol(), type_name(left), type_name(right)))
}

fn loose_eq(
    left: &Value,
    right: &Value,
) -> bool {
    match (Num::of(left), Num::of(right)) {
        (Some(Num::Int(a)), Some(Num::Int(b))) => a == b,
        (Some(a), Some(b)) => a.float() == b.float(),
        _ => left == right,
    }
}

fn ordering(
    left: &Value,
    right: &Value,
) -> Option<Ordering> {
    match (Num::of(left), Num::of(right), left, right) {
        (Some(Num::Int(a)), Some(Num::Int(b)), _, _) => Some(a.cmp(&b)),
        (Some(a), Some(b), _, _) => a.float().partial_cmp(&b.float()),
        (_, _, Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn arithmetic(
    op: BinOp,
    left: &Value,
    right: &Value,
) -> std::result::Result<Value, ActionError> {
    if op == BinOp::Add {
        match (left, right) {
            (Value::String(a), Value::String(b)) => return Ok(Value::String(format!("{}{}", a, b))),
            (Value::Array(a), Value::Array(b)) => return Ok(Value::Array(a.iter().chain(b.iter()).cloned().collect())),
            _ => {}
        }
    }
    let (Some(a), Some(b)) = (Num::of(left), Num::of(right)) else {
        return Err(unsupported(op, left, right));
    };
    let zero = matches!(b, Num::Int(0)) || matches!(b, Num::Float(f) if f == 0.0);
    if zero && matches!(op, BinOp::Div | BinOp::Rem) {
        return Err(ActionError::error("division by zero"));
    }
    if let (Num::Int(x), Num::Int(y)) = (a, b) {
        let exact = match op {
            BinOp::Add => x.checked_add(y),
            BinOp::Sub => x.checked_sub(y),
            BinOp::Mul => x.checked_mul(y),
            BinOp::Rem => x.checked_rem_euclid(y).map(|r| if y < 0 && r != 0 { r + y } else { r }),
            _ => None,
        };
        if let Some(n) = exact {
            return Ok(Value::from(n));
        }
    }
    let (x, y) = (a.float(), b.float());
    let result = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => x / y,
        _ => x - y * (x / y).floor(),
    };
    Ok(Value::from(result))
}

fn contains(
    needle: &Value,
    haystack: &Value,
) -> std::result::Result<bool, ActionError> {
    match (needle, haystack) {
        (Value::String(n), Value::String(h)) => Ok(h.contains(n.as_str())),
        (_, Value::Array(list)) => Ok(list.iter().any(|v| loose_eq(v, needle))),
        (Value::String(n), Value::Object(map)) => Ok(map.contains_key(n)),
        _ => Err(unsupported(BinOp::In, needle, haystack)),
    }
}

impl Expr {
    pub fn parse(src: &str) -> Result<Expr> {
        parser::parse(src)
    }

    pub fn eval(
        &self,
        item: &Item,
    ) -> std::result::Result<Value, ActionError> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Path(path) => template::resolve(item, path),
            Expr::Not(inner) => Ok(Value::Bool(!truthy(&inner.eval(item)?))),
            Expr::Neg(inner) => {
                let value = inner.eval(item)?;
                match Num::of(&value) {
                    Some(Num::Int(i)) => Ok(i.checked_neg().map(Value::from).unwrap_or_else(|| Value::from(-(i as f64)))),
                    Some(Num::Float(f)) => Ok(Value::from(-f)),
                    None => Err(ActionError::error(format!("bad operand type for unary -: {}", type_name(&value)))),
                }
            }
            Expr::And(left, right) => {
                let value = left.eval(item)?;
                if truthy(&value) { right.eval(item) } else { Ok(value) }
            }
            Expr::Or(left, right) => {
                let value = left.eval(item)?;
                if truthy(&value) { Ok(value) } else { right.eval(item) }
            }
            Expr::Binary(op, left, right) => {
                let (l, r) = (left.eval(item)?, right.eval(item)?);
                match op {
                    BinOp::Eq => Ok(Value::Bool(loose_eq(&l, &r))),
                    BinOp::Ne => Ok(Value::Bool(!loose_eq(&l, &r))),
                    BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                        let ord = ordering(&l, &r).ok_or_else(|| unsupported(*op, &l, &r))?;
                        Ok(Value::Bool(match op {
                            BinOp::Lt => ord == Ordering::Less,
                            BinOp::Le => ord != Ordering::Greater,
                            BinOp::Gt => ord == Ordering::Greater,
                            _ => ord != Ordering::Less,
                        }))
                    }
                    BinOp::In => contains(&l, &r).map(Value::Bool),
                    BinOp::NotIn => contains(&l, &r).map(|found| Value::Bool(!found)),
                    _ => arithmetic(*op, &l, &r),
                }
            }
        }
    }

    pub fn is_true(
        &self,
        item: &Item,
    ) -> std::result::Result<bool, ActionError> {
        self.eval(item).map(|v| truthy(&v))
    }
}

/// Parses and evaluates `src` in one go, reporting syntax errors as `error` severity.
pub fn evaluate(
    src: &str,
    item: &Item,
) -> std::result::Result<Value, ActionError> {
    Expr::parse(src).map_err(|e| ActionError::error(e.to_string()))?.eval(item)
}

/// Expression source that may embed `${...}` templates.
///
/// Static text is parsed once; templated text is rendered and parsed on every
/// evaluation.
#[derive(Debug, Clone)]
pub enum ExprSource {
    Compiled(Expr),
    Templated(String),
}

impl ExprSource {
    pub fn new(text: &str) -> Result<Self> {
        if text.contains("${") {
            Ok(ExprSource::Templated(text.to_string()))
        } else {
            Ok(ExprSource::Compiled(Expr::parse(text)?))
        }
    }

    pub fn eval(
        &self,
        item: &Item,
    ) -> std::result::Result<Value, ActionError> {
        match self {
            ExprSource::Compiled(expr) => expr.eval(item),
            ExprSource::Templated(text) => evaluate(&template::render(text, item)?, item),
        }
    }

    pub fn is_true(
        &self,
        item: &Item,
    ) -> std::result::Result<bool, ActionError> {
        self.eval(item).map(|v| truthy(&v))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn eval(
        src: &str,
        item: Value,
    ) -> Value {
        evaluate(src, &Item::from_value(item).unwrap()).unwrap()
    }

    #[test]
    fn test_boolean_logic() {
        let item = json!({"a": 1, "b": 0, "name": "rust"});
        assert_eq!(eval("a and b", item.clone()), json!(0));
        assert_eq!(eval("b or name", item.clone()), json!("rust"));
        assert_eq!(eval("not b && a == 1", item.clone()), json!(true));
        assert_eq!(eval("!(a || b)", item), json!(false));
    }

    #[test]
    fn test_comparisons() {
        let item = json!({"count": 5, "title": "Senior Rust Engineer", "tags": ["rust", "remote"]});
        assert_eq!(eval("count >= 5", item.clone()), json!(true));
        assert_eq!(eval("count == 5.0", item.clone()), json!(true));
        assert_eq!(eval("'Rust' in title", item.clone()), json!(true));
        assert_eq!(eval("'go' not in tags", item.clone()), json!(true));
        assert_eq!(eval("1 < count < 3", item.clone()), json!(false));
        assert_eq!(eval("title != null", item), json!(true));
    }

    #[test]
    fn test_arithmetic() {
        let item = json!({"page": 3, "size": 20});
        assert_eq!(eval("page * size + 1", item.clone()), json!(61));
        assert_eq!(eval("size / 8", item.clone()), json!(2.5));
        assert_eq!(eval("-7 % 3", item.clone()), json!(2));
        assert_eq!(eval("'p' + 'q'", item.clone()), json!("pq"));
        assert_eq!(eval("-(page - 5)", item), json!(2));
    }

    #[test]
    fn test_errors() {
        let item = Item::from_value(json!({"a": 1})).unwrap();
        assert!(evaluate("a / 0", &item).is_err());
        assert!(evaluate("a + 'x'", &item).is_err());
        assert!(evaluate("missing == 1", &item).is_err());
        assert_eq!(evaluate("?missing == null", &item).unwrap(), json!(true));
        assert!(evaluate("a <", &item).is_err());
    }

    #[test]
    fn test_truthy() {
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!([])));
        assert!(!truthy(&json!(0.0)));
        assert!(truthy(&json!({"a": 1})));
        assert!(truthy(&json!("false")));
    }

    #[test]
    fn test_expr_source_templated() {
        let item = Item::from_value(json!({"limit": 3, "count": 5, "op": ">"})).unwrap();
        let source = ExprSource::new("count ${op} limit").unwrap();
        assert!(matches!(source, ExprSource::Templated(_)));
        assert!(source.is_true(&item).unwrap());

        let fixed = ExprSource::new("count < limit").unwrap();
        assert!(!fixed.is_true(&item).unwrap());
        assert!(ExprSource::new("count <").is_err());
    }
}
