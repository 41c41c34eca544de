use serde_json::Value;

use crate::{Result, ScrapeflowError};

use super::{BinOp, Expr};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(Value),
    Path(String),
    And,
    Or,
    Not,
    In,
    Op(BinOp),
    LParen,
    RParen,
}

fn syntax(
    src: &str,
    message: impl std::fmt::Display,
) -> ScrapeflowError {
    ScrapeflowError::Pipeline(format!("invalid expression '{}': {}", src, message))
}

fn keyword(word: &str) -> Option<Token> {
    Some(match word {
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        "in" => Token::In,
        "true" | "True" => Token::Literal(Value::Bool(true)),
        "false" | "False" => Token::Literal(Value::Bool(false)),
        "null" | "None" => Token::Literal(Value::Null),
        _ => return None,
    })
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let chars = src.chars().collect::<Vec<_>>();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '+' | '-' | '*' | '/' | '%' => {
                tokens.push(Token::Op(match c {
                    '+' => BinOp::Add,
                    '-' => BinOp::Sub,
                    '*' => BinOp::Mul,
                    '/' => BinOp::Div,
                    _ => BinOp::Rem,
                }));
                i += 1;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Op(BinOp::Eq));
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Op(BinOp::Ne));
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '<' | '>' => {
                let inclusive = next == Some('=');
                tokens.push(Token::Op(match (c, inclusive) {
                    ('<', true) => BinOp::Le,
                    ('<', false) => BinOp::Lt,
                    (_, true) => BinOp::Ge,
                    (_, false) => BinOp::Gt,
                }));
                i += if inclusive { 2 } else { 1 };
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '\'' | '"' => {
                let mut text = String::new();
                let mut j = i + 1;
                loop {
                    match chars.get(j) {
                        None => return Err(syntax(src, "unterminated string")),
                        Some(&q) if q == c => break,
                        Some('\\') => {
                            let escaped = chars.get(j + 1).ok_or_else(|| syntax(src, "unterminated string"))?;
                            text.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                other => *other,
                            });
                            j += 2;
                        }
                        Some(&ch) => {
                            text.push(ch);
                            j += 1;
                        }
                    }
                }
                tokens.push(Token::Literal(Value::String(text)));
                i = j + 1;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let is_float = chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit());
                if is_float {
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let text = chars[start..i].iter().collect::<String>();
                let value = if is_float {
                    text.parse::<f64>().map(Value::from).map_err(|e| syntax(src, e))?
                } else {
                    match text.parse::<i64>() {
                        Ok(n) => Value::from(n),
                        Err(_) => text.parse::<f64>().map(Value::from).map_err(|e| syntax(src, e))?,
                    }
                };
                tokens.push(Token::Literal(value));
            }
            c if c == '?' || c == '_' || c.is_alphabetic() => {
                let start = i;
                i += 1;
                while i < chars.len() {
                    let ch = chars[i];
                    let dotted = ch == '.' && chars.get(i + 1).is_some_and(|n| n.is_alphanumeric() || *n == '_');
                    if ch.is_alphanumeric() || ch == '_' || dotted {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let word = chars[start..i].iter().collect::<String>();
                if word == "?" {
                    return Err(syntax(src, "expected a path after '?'"));
                }
                tokens.push(keyword(&word).unwrap_or(Token::Path(word)));
            }
            other => return Err(syntax(src, format!("unexpected character '{}'", other))),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(
        &self,
        offset: usize,
    ) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(
        &mut self,
        token: &Token,
    ) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut left = self.and_expr()?;
        while self.eat(&Token::Or) {
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut left = self.not_expr()?;
        while self.eat(&Token::And) {
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr> {
        if self.eat(&Token::Not) {
            return Ok(Expr::Not(Box::new(self.not_expr()?)));
        }
        self.comparison()
    }

    fn comparison_op(&mut self) -> Option<BinOp> {
        let (op, width) = match (self.peek(), self.peek_at(1)) {
            (Some(Token::Op(op)), _) if op.is_comparison() => (*op, 1),
            (Some(Token::In), _) => (BinOp::In, 1),
            (Some(Token::Not), Some(Token::In)) => (BinOp::NotIn, 2),
            _ => return None,
        };
        self.pos += width;
        Some(op)
    }

    /// Chained comparisons read like `a < b < c` meaning `a < b and b < c`.
    fn comparison(&mut self) -> Result<Expr> {
        let mut left = self.additive()?;
        let mut chain: Option<Expr> = None;
        while let Some(op) = self.comparison_op() {
            let right = self.additive()?;
            let link = Expr::Binary(op, Box::new(left), Box::new(right.clone()));
            chain = Some(match chain {
                Some(previous) => Expr::And(Box::new(previous), Box::new(link)),
                None => link,
            });
            left = right;
        }
        Ok(chain.unwrap_or(left))
    }

    fn additive(&mut self) -> Result<Expr> {
        let mut left = self.multiplicative()?;
        while let Some(Token::Op(op @ (BinOp::Add | BinOp::Sub))) = self.peek().cloned() {
            self.pos += 1;
            let right = self.multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        while let Some(Token::Op(op @ (BinOp::Mul | BinOp::Div | BinOp::Rem))) = self.peek().cloned() {
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat(&Token::Op(BinOp::Sub)) {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Some(Token::Literal(value)) => Ok(Expr::Literal(value)),
            Some(Token::Path(path)) => Ok(Expr::Path(path)),
            Some(Token::LParen) => {
                let inner = self.or_expr()?;
                if !self.eat(&Token::RParen) {
                    return Err(syntax(self.src, "missing ')'"));
                }
                Ok(inner)
            }
            Some(token) => Err(syntax(self.src, format!("unexpected {:?}", token))),
            None => Err(syntax(self.src, "unexpected end")),
        }
    }
}

pub(super) fn parse(src: &str) -> Result<Expr> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Err(syntax(src, "empty expression"));
    }
    let mut parser = Parser {
        src,
        tokens,
        pos: 0,
    };
    let expr = parser.or_expr()?;
    if let Some(token) = parser.peek() {
        return Err(syntax(src, format!("unexpected {:?}", token)));
    }
    Ok(expr)
}
