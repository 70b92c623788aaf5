//! Filter expression language
//!
//! Small boolean language used by the `drop`, `include` and `metadata`
//! filters:
//!
//! ```text
//! expr  := and ('||' and)*
//! and   := term ('&&' term)*
//! term  := '!' term | '(' expr ')' | field op value
//! op    := '==' | '!=' | '<' | '<=' | '>' | '>=' | '~='
//! ```
//!
//! Fields are `level`, `providerName`, `timestamp`, `context.<key>` or a
//! payload key (dotted paths reach into nested objects). `~=` is substring
//! match. Values are bare words, numbers or quoted strings.
//!
//! ```text
//! level >= Warning && providerName != "noisy-lib"
//! http.status >= 500 || (msg ~= timeout && !context.retry == "true")
//! ```
//!
//! Expressions are parsed once at build time; a parse error is a
//! configuration error.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use virta_core::{Event, Level};

/// Parse failure with the byte offset where it happened
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} at offset {offset}")]
pub struct ExpressionError {
    pub message: String,
    pub offset: usize,
}

impl ExpressionError {
    fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

/// A parsed, ready-to-evaluate expression
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Node,
}

impl Expression {
    /// Parse `source`
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ExpressionError::new("empty expression", 0));
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            end: source.len(),
        };
        let root = parser.expr()?;
        if let Some(tok) = parser.peek() {
            return Err(ExpressionError::new(
                format!("unexpected {}", tok.kind),
                tok.offset,
            ));
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    /// Evaluate against one event
    pub fn matches(&self, event: &Event) -> bool {
        self.root.eval(event)
    }

    /// The text this expression was parsed from
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

// ============================================================================
// AST
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Or(Vec<Node>),
    And(Vec<Node>),
    Not(Box<Node>),
    Compare(Comparison),
}

#[derive(Debug, Clone, PartialEq)]
enum Comparison {
    Level(Op, Level),
    Timestamp(Op, DateTime<Utc>),
    ProviderName(Op, String),
    Context(String, Op, String),
    Payload(String, Op, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
}

impl Op {
    fn test(self, ordering: Ordering) -> bool {
        match self {
            Op::Eq => ordering == Ordering::Equal,
            Op::Ne => ordering != Ordering::Equal,
            Op::Lt => ordering == Ordering::Less,
            Op::Le => ordering != Ordering::Greater,
            Op::Gt => ordering == Ordering::Greater,
            Op::Ge => ordering != Ordering::Less,
            // Only meaningful for strings; handled before ordering
            Op::Contains => ordering == Ordering::Equal,
        }
    }

    fn compare_str(self, actual: &str, expected: &str) -> bool {
        match self {
            Op::Contains => actual.contains(expected),
            _ => self.test(actual.cmp(expected)),
        }
    }
}

impl Node {
    fn eval(&self, event: &Event) -> bool {
        match self {
            Node::Or(nodes) => nodes.iter().any(|n| n.eval(event)),
            Node::And(nodes) => nodes.iter().all(|n| n.eval(event)),
            Node::Not(node) => !node.eval(event),
            Node::Compare(cmp) => cmp.eval(event),
        }
    }
}

impl Comparison {
    fn eval(&self, event: &Event) -> bool {
        match self {
            Comparison::Level(op, level) => op.test(event.level.cmp(level)),
            Comparison::Timestamp(op, ts) => op.test(event.timestamp.cmp(ts)),
            Comparison::ProviderName(op, expected) => op.compare_str(&event.provider_name, expected),
            Comparison::Context(key, op, expected) => match event.context(key) {
                Some(actual) => op.compare_str(actual, expected),
                None => *op == Op::Ne,
            },
            Comparison::Payload(path, op, expected) => match event.field_path(path) {
                Some(actual) => compare_value(actual, *op, expected),
                None => *op == Op::Ne,
            },
        }
    }
}

/// Compare a payload value with a literal, numerically when both sides are
/// numbers
fn compare_value(actual: &Value, op: Op, expected: &str) -> bool {
    match actual {
        Value::Number(n) => match (n.as_f64(), expected.parse::<f64>()) {
            (Some(a), Ok(b)) if op != Op::Contains => {
                a.partial_cmp(&b).is_some_and(|ordering| op.test(ordering))
            }
            _ => op.compare_str(&n.to_string(), expected),
        },
        Value::String(s) => op.compare_str(s, expected),
        Value::Bool(b) => op.compare_str(if *b { "true" } else { "false" }, expected),
        Value::Null => op.compare_str("null", expected),
        other => op.compare_str(&other.to_string(), expected),
    }
}

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Word(String),
    Quoted(String),
    Op(Op),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Word(w) => write!(f, "'{w}'"),
            TokenKind::Quoted(q) => write!(f, "\"{q}\""),
            TokenKind::Op(_) => f.write_str("operator"),
            TokenKind::And => f.write_str("'&&'"),
            TokenKind::Or => f.write_str("'||'"),
            TokenKind::Not => f.write_str("'!'"),
            TokenKind::LParen => f.write_str("'('"),
            TokenKind::RParen => f.write_str("')'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '-' | ':' | '+' | '/' | '@')
}

fn tokenize(source: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let two: String = source[offset..].chars().take(2).collect();
        let kind = match two.as_str() {
            "&&" => Some(TokenKind::And),
            "||" => Some(TokenKind::Or),
            "==" => Some(TokenKind::Op(Op::Eq)),
            "!=" => Some(TokenKind::Op(Op::Ne)),
            "<=" => Some(TokenKind::Op(Op::Le)),
            ">=" => Some(TokenKind::Op(Op::Ge)),
            "~=" => Some(TokenKind::Op(Op::Contains)),
            _ => None,
        };
        if let Some(kind) = kind {
            chars.next();
            chars.next();
            tokens.push(Token { kind, offset });
            continue;
        }

        let single = match c {
            '<' => Some(TokenKind::Op(Op::Lt)),
            '>' => Some(TokenKind::Op(Op::Gt)),
            '!' => Some(TokenKind::Not),
            '(' => Some(TokenKind::LParen),
            ')' => Some(TokenKind::RParen),
            _ => None,
        };
        if let Some(kind) = single {
            chars.next();
            tokens.push(Token { kind, offset });
            continue;
        }

        if c == '"' || c == '\'' {
            chars.next();
            let mut text = String::new();
            let mut closed = false;
            while let Some((_, ch)) = chars.next() {
                if ch == '\\' {
                    if let Some((_, escaped)) = chars.next() {
                        text.push(escaped);
                    }
                } else if ch == c {
                    closed = true;
                    break;
                } else {
                    text.push(ch);
                }
            }
            if !closed {
                return Err(ExpressionError::new("unterminated string", offset));
            }
            tokens.push(Token {
                kind: TokenKind::Quoted(text),
                offset,
            });
            continue;
        }

        if is_word_char(c) {
            let mut word = String::new();
            while let Some(&(_, ch)) = chars.peek() {
                if !is_word_char(ch) {
                    break;
                }
                word.push(ch);
                chars.next();
            }
            tokens.push(Token {
                kind: TokenKind::Word(word),
                offset,
            });
            continue;
        }

        return Err(ExpressionError::new(format!("unexpected character '{c}'"), offset));
    }

    Ok(tokens)
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek().is_some_and(|t| &t.kind == kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> Result<Node, ExpressionError> {
        let mut nodes = vec![self.and()?];
        while self.eat(&TokenKind::Or) {
            nodes.push(self.and()?);
        }
        Ok(if nodes.len() == 1 {
            nodes.remove(0)
        } else {
            Node::Or(nodes)
        })
    }

    fn and(&mut self) -> Result<Node, ExpressionError> {
        let mut nodes = vec![self.term()?];
        while self.eat(&TokenKind::And) {
            nodes.push(self.term()?);
        }
        Ok(if nodes.len() == 1 {
            nodes.remove(0)
        } else {
            Node::And(nodes)
        })
    }

    fn term(&mut self) -> Result<Node, ExpressionError> {
        let Some(tok) = self.next() else {
            return Err(ExpressionError::new("unexpected end of expression", self.end));
        };
        match tok.kind {
            TokenKind::Not => Ok(Node::Not(Box::new(self.term()?))),
            TokenKind::LParen => {
                let inner = self.expr()?;
                if !self.eat(&TokenKind::RParen) {
                    let offset = self.peek().map_or(self.end, |t| t.offset);
                    return Err(ExpressionError::new("expected ')'", offset));
                }
                Ok(inner)
            }
            TokenKind::Word(field) => self.comparison(field, tok.offset),
            other => Err(ExpressionError::new(
                format!("expected a field name, found {other}"),
                tok.offset,
            )),
        }
    }

    fn comparison(&mut self, field: String, field_offset: usize) -> Result<Node, ExpressionError> {
        let op = match self.next() {
            Some(Token {
                kind: TokenKind::Op(op),
                ..
            }) => op,
            Some(tok) => {
                return Err(ExpressionError::new(
                    format!("expected an operator after '{field}', found {}", tok.kind),
                    tok.offset,
                ))
            }
            None => {
                return Err(ExpressionError::new(
                    format!("expected an operator after '{field}'"),
                    self.end,
                ))
            }
        };

        let (value, value_offset) = match self.next() {
            Some(Token {
                kind: TokenKind::Word(w) | TokenKind::Quoted(w),
                offset,
            }) => (w, offset),
            Some(tok) => {
                return Err(ExpressionError::new(
                    format!("expected a value, found {}", tok.kind),
                    tok.offset,
                ))
            }
            None => return Err(ExpressionError::new("expected a value", self.end)),
        };

        let cmp = match field.as_str() {
            "level" => {
                if op == Op::Contains {
                    return Err(ExpressionError::new("'~=' cannot be used on level", field_offset));
                }
                let level = value
                    .parse::<Level>()
                    .map_err(|e| ExpressionError::new(e.to_string(), value_offset))?;
                Comparison::Level(op, level)
            }
            "timestamp" => {
                if op == Op::Contains {
                    return Err(ExpressionError::new(
                        "'~=' cannot be used on timestamp",
                        field_offset,
                    ));
                }
                let ts = DateTime::parse_from_rfc3339(&value)
                    .map_err(|e| {
                        ExpressionError::new(format!("invalid RFC 3339 timestamp: {e}"), value_offset)
                    })?
                    .with_timezone(&Utc);
                Comparison::Timestamp(op, ts)
            }
            "providerName" => Comparison::ProviderName(op, value),
            _ => match field.strip_prefix("context.") {
                Some("") => {
                    return Err(ExpressionError::new("missing context key", field_offset));
                }
                Some(key) => Comparison::Context(key.to_string(), op, value),
                None => Comparison::Payload(field, op, value),
            },
        };
        Ok(Node::Compare(cmp))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn event(level: Level) -> Event {
        Event::new("orders", level)
            .with_field("msg", "connection timeout")
            .with_field("http", json!({"status": 503}))
            .with_field("ok", false)
            .with_context("region", "eu-north-1")
    }

    fn eval(expr: &str, ev: &Event) -> bool {
        Expression::parse(expr).unwrap().matches(ev)
    }

    // ==========================================================================
    // Evaluation
    // ==========================================================================

    #[test]
    fn level_compares_by_severity() {
        let ev = event(Level::Error);
        assert!(eval("level >= Warning", &ev));
        assert!(eval("level > 2", &ev));
        assert!(!eval("level < warning", &ev));
        assert!(eval("level == Error", &ev));
    }

    #[test]
    fn payload_numbers_compare_numerically() {
        let ev = event(Level::Informational);
        assert!(eval("http.status >= 500", &ev));
        assert!(!eval("http.status < 100", &ev));
        assert!(eval("http.status == 503", &ev));
        assert!(eval("ok == false", &ev));
    }

    #[test]
    fn strings_support_equality_and_substring() {
        let ev = event(Level::Informational);
        assert!(eval("providerName == orders", &ev));
        assert!(eval(r#"msg ~= "timeout""#, &ev));
        assert!(eval("context.region ~= eu", &ev));
        assert!(!eval("providerName != 'orders'", &ev));
    }

    #[test]
    fn missing_fields_only_satisfy_not_equal() {
        let ev = event(Level::Informational);
        assert!(!eval("absent == x", &ev));
        assert!(eval("absent != x", &ev));
        assert!(!eval("context.absent >= a", &ev));
    }

    #[test]
    fn precedence_and_grouping() {
        let ev = event(Level::Verbose);
        // && binds tighter than ||
        assert!(eval("providerName == orders || level >= Error && http.status < 0", &ev));
        assert!(!eval("(providerName == orders || level >= Error) && http.status < 0", &ev));
        assert!(eval("!(level >= Warning)", &ev));
        assert!(eval("!level >= Warning && msg ~= timeout", &ev));
    }

    #[test]
    fn timestamp_compares_chronologically() {
        let ev = event(Level::Informational)
            .with_timestamp(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        assert!(eval("timestamp > 2024-01-01T00:00:00Z", &ev));
        assert!(!eval("timestamp > '2024-06-01T00:00:00+02:00'", &ev));
    }

    // ==========================================================================
    // Parse errors
    // ==========================================================================

    #[test]
    fn rejects_malformed_expressions() {
        for bad in [
            "",
            "level >=",
            "level Warning",
            "(level >= Warning",
            "level >= Warning )",
            "level >= Loud",
            "level ~= Warning",
            "msg == \"open",
            "timestamp < yesterday",
            "&& level == 1",
            "context. == x",
            "msg == x #",
        ] {
            assert!(Expression::parse(bad).is_err(), "should reject: {bad:?}");
        }
    }

    #[test]
    fn error_reports_offset() {
        let err = Expression::parse("level >= Warning && ").unwrap_err();
        assert_eq!(err.offset, 20);
        assert!(err.message.contains("end of expression"));
    }
}
