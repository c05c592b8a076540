//! LDAP-style service filters.
//!
//! Supports the RFC 1960 subset used for service selection:
//! `(key=value)`, presence `(key=*)`, substrings `(key=pre*mid*suf)`,
//! `(key>=value)`, `(key<=value)`, approximate `(key~=value)`, and the
//! `&`, `|`, `!` combinators. Attribute names match case-insensitively.
//! `\` escapes `(`, `)`, `*` and `\` inside values.

use crate::error::{DepmanError, Result};
use crate::properties::{get_ignore_case, Properties};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A parsed filter expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    expr: Expr,
    text: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Equal(String, String),
    Approx(String, String),
    GreaterEq(String, String),
    LessEq(String, String),
    Present(String),
    Substring(String, Substring),
}

#[derive(Debug, Clone, PartialEq)]
struct Substring {
    initial: Option<String>,
    any: Vec<String>,
    last: Option<String>,
}

impl Filter {
    /// Parse a filter expression.
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        let mut parser = Parser {
            src: trimmed,
            chars: trimmed.char_indices().collect(),
            pos: 0,
            depth: 0,
        };
        let expr = parser.filter()?;
        parser.skip_ws();
        if parser.pos != parser.chars.len() {
            return Err(parser.error("trailing characters after filter"));
        }
        Ok(Self {
            expr,
            text: trimmed.to_string(),
        })
    }

    /// Whether `properties` satisfy the filter.
    pub fn matches(&self, properties: &Properties) -> bool {
        self.expr.eval(properties)
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl FromStr for Filter {
    type Err = DepmanError;

    fn from_str(s: &str) -> Result<Self> {
        Filter::parse(s)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

// ============================================================================
// Evaluation
// ============================================================================

impl Expr {
    fn eval(&self, props: &Properties) -> bool {
        match self {
            Expr::And(items) => items.iter().all(|e| e.eval(props)),
            Expr::Or(items) => items.iter().any(|e| e.eval(props)),
            Expr::Not(inner) => !inner.eval(props),
            Expr::Present(key) => get_ignore_case(props, key).is_some(),
            Expr::Equal(key, want) => with_value(props, key, |v| compare(v, want) == Some(Ordering::Equal)),
            Expr::GreaterEq(key, want) => with_value(props, key, |v| {
                matches!(compare(v, want), Some(Ordering::Greater | Ordering::Equal))
            }),
            Expr::LessEq(key, want) => with_value(props, key, |v| {
                matches!(compare(v, want), Some(Ordering::Less | Ordering::Equal))
            }),
            Expr::Approx(key, want) => with_value(props, key, |v| match v {
                Value::String(s) => normalize(s) == normalize(want),
                other => compare(other, want) == Some(Ordering::Equal),
            }),
            Expr::Substring(key, sub) => with_value(props, key, |v| match v {
                Value::String(s) => sub.matches(s),
                _ => false,
            }),
        }
    }
}

/// Apply `test` to the property, or to each element if it is an array.
fn with_value(props: &Properties, key: &str, test: impl Fn(&Value) -> bool) -> bool {
    match get_ignore_case(props, key) {
        Some(Value::Array(items)) => items.iter().any(&test),
        Some(v) => test(v),
        None => false,
    }
}

/// Compare a property value with a filter literal, coercing the literal to
/// the property's type.
fn compare(value: &Value, literal: &str) -> Option<Ordering> {
    match value {
        Value::String(s) => Some(s.as_str().cmp(literal)),
        Value::Bool(b) => literal
            .trim()
            .parse::<bool>()
            .ok()
            .filter(|l| l == b)
            .map(|_| Ordering::Equal),
        Value::Number(n) => {
            let literal = literal.trim();
            if let (Some(v), Ok(l)) = (n.as_i64(), literal.parse::<i64>()) {
                return Some(v.cmp(&l));
            }
            let l = literal.parse::<f64>().ok()?;
            n.as_f64()?.partial_cmp(&l)
        }
        _ => None,
    }
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

impl Substring {
    fn matches(&self, s: &str) -> bool {
        let mut rest = s;
        if let Some(initial) = &self.initial {
            match rest.strip_prefix(initial.as_str()) {
                Some(r) => rest = r,
                None => return false,
            }
        }
        for part in &self.any {
            match rest.find(part.as_str()) {
                Some(idx) => rest = &rest[idx + part.len()..],
                None => return false,
            }
        }
        match &self.last {
            Some(last) => rest.ends_with(last.as_str()),
            None => true,
        }
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Deepest accepted nesting of `(...)` groups.
const MAX_DEPTH: usize = 256;

struct Parser<'a> {
    src: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, reason: &str) -> DepmanError {
        DepmanError::InvalidFilter {
            filter: self.src.to_string(),
            reason: format!("{} at position {}", reason, self.pos),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, want: char) -> Result<()> {
        match self.bump() {
            Some(c) if c == want => Ok(()),
            Some(c) => Err(self.error(&format!("expected '{}', found '{}'", want, c))),
            None => Err(self.error(&format!("expected '{}', found end of input", want))),
        }
    }

    fn filter(&mut self) -> Result<Expr> {
        if self.depth == MAX_DEPTH {
            return Err(self.error("filter nested too deeply"));
        }
        self.depth += 1;
        let expr = self.group();
        self.depth -= 1;
        expr
    }

    fn group(&mut self) -> Result<Expr> {
        self.skip_ws();
        self.expect('(')?;
        self.skip_ws();
        let expr = match self.peek() {
            Some('&') => {
                self.bump();
                Expr::And(self.filter_list()?)
            }
            Some('|') => {
                self.bump();
                Expr::Or(self.filter_list()?)
            }
            Some('!') => {
                self.bump();
                Expr::Not(Box::new(self.filter()?))
            }
            Some(_) => self.item()?,
            None => return Err(self.error("unexpected end of input")),
        };
        self.skip_ws();
        self.expect(')')?;
        Ok(expr)
    }

    fn filter_list(&mut self) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() != Some('(') {
                break;
            }
            items.push(self.filter()?);
        }
        if items.is_empty() {
            return Err(self.error("empty filter list"));
        }
        Ok(items)
    }

    fn item(&mut self) -> Result<Expr> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, '=' | '~' | '<' | '>' | '(' | ')') {
                break;
            }
            self.pos += 1;
        }
        let key: String = self.chars[start..self.pos]
            .iter()
            .map(|(_, c)| *c)
            .collect::<String>()
            .trim()
            .to_string();
        if key.is_empty() {
            return Err(self.error("missing attribute name"));
        }

        let op = match self.bump() {
            Some('=') => '=',
            Some(c @ ('~' | '<' | '>')) => {
                self.expect('=')?;
                c
            }
            _ => return Err(self.error("expected comparison operator")),
        };

        let pieces = self.value()?;
        match op {
            '=' => Ok(Self::equality(key, pieces)),
            _ => {
                if pieces.len() != 1 {
                    return Err(self.error("wildcard not allowed with this operator"));
                }
                let value = pieces.into_iter().next().unwrap_or_default();
                Ok(match op {
                    '~' => Expr::Approx(key, value),
                    '>' => Expr::GreaterEq(key, value),
                    _ => Expr::LessEq(key, value),
                })
            }
        }
    }

    /// Value pieces split on unescaped `*`.
    fn value(&mut self) -> Result<Vec<String>> {
        let mut pieces = vec![String::new()];
        loop {
            match self.peek() {
                Some(')') | None => break,
                Some('(') => return Err(self.error("unescaped '(' in value")),
                Some('*') => {
                    self.pos += 1;
                    pieces.push(String::new());
                }
                Some('\\') => {
                    self.pos += 1;
                    let c = self
                        .bump()
                        .ok_or_else(|| self.error("dangling escape"))?;
                    if let Some(last) = pieces.last_mut() {
                        last.push(c);
                    }
                }
                Some(c) => {
                    self.pos += 1;
                    if let Some(last) = pieces.last_mut() {
                        last.push(c);
                    }
                }
            }
        }
        Ok(pieces)
    }

    fn equality(key: String, mut pieces: Vec<String>) -> Expr {
        if pieces.len() == 1 {
            return Expr::Equal(key, pieces.remove(0));
        }
        if pieces.len() == 2 && pieces.iter().all(String::is_empty) {
            return Expr::Present(key);
        }
        let last = pieces.pop().filter(|s| !s.is_empty());
        let mut iter = pieces.into_iter();
        let initial = iter.next().filter(|s| !s.is_empty());
        let any = iter.filter(|s| !s.is_empty()).collect();
        Expr::Substring(key, Substring { initial, any, last })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::props;
    use serde_json::json;

    fn f(text: &str) -> Filter {
        Filter::parse(text).unwrap()
    }

    #[test]
    fn test_equality() {
        let p = props([("testkey", "testvalue")]);
        assert!(f("(testkey=testvalue)").matches(&p));
        assert!(!f("(testkey=other)").matches(&p));
        assert!(!f("(missing=testvalue)").matches(&p));
    }

    #[test]
    fn test_attribute_name_case_insensitive() {
        let p = props([("TestKey", "v")]);
        assert!(f("(testkey=v)").matches(&p));
    }

    #[test]
    fn test_presence_and_substring() {
        let p = props([("name", "depman-core")]);
        assert!(f("(name=*)").matches(&p));
        assert!(!f("(other=*)").matches(&p));
        assert!(f("(name=dep*)").matches(&p));
        assert!(f("(name=*core)").matches(&p));
        assert!(f("(name=d*-*e)").matches(&p));
        assert!(!f("(name=*x*)").matches(&p));
    }

    #[test]
    fn test_numeric_and_ordering() {
        let p = props([("port", json!(8080)), ("ratio", json!(0.5))]);
        assert!(f("(port=8080)").matches(&p));
        assert!(f("(port>=8000)").matches(&p));
        assert!(!f("(port<=8000)").matches(&p));
        assert!(f("(ratio<=0.75)").matches(&p));
    }

    #[test]
    fn test_boolean_and_array() {
        let p = props([("enabled", json!(true)), ("tags", json!(["a", "b"]))]);
        assert!(f("(enabled=true)").matches(&p));
        assert!(!f("(enabled=false)").matches(&p));
        assert!(f("(tags=b)").matches(&p));
        assert!(!f("(tags=c)").matches(&p));
    }

    #[test]
    fn test_combinators() {
        let p = props([("a", "1"), ("b", "2")]);
        assert!(f("(&(a=1)(b=2))").matches(&p));
        assert!(!f("(&(a=1)(b=3))").matches(&p));
        assert!(f("(|(a=9)(b=2))").matches(&p));
        assert!(f("(!(a=9))").matches(&p));
        assert!(f(" ( & (a=1) (!(b=3)) ) ").matches(&p));
    }

    #[test]
    fn test_approx() {
        let p = props([("title", "Hello World")]);
        assert!(f("(title~=helloworld)").matches(&p));
    }

    #[test]
    fn test_escapes() {
        let p = props([("expr", "a*(b)")]);
        assert!(f(r"(expr=a\*\(b\))").matches(&p));
    }

    #[test]
    fn test_invalid_filters() {
        for bad in ["", "testkey=testvalue", "(testkey=testvalue", "(=v)", "(&)", "(a=1))", "(a>1)"] {
            let err = Filter::parse(bad).unwrap_err();
            assert!(matches!(err, DepmanError::InvalidFilter { .. }), "{}", bad);
        }
    }

    fn nested_not(depth: usize) -> String {
        format!("{}(a=b){}", "(!".repeat(depth), ")".repeat(depth))
    }

    #[test]
    fn test_nesting_is_capped() {
        let p = props([("a", "b")]);
        assert!(!f(&nested_not(255)).matches(&p));
        assert!(f(&nested_not(254)).matches(&p));

        let err = Filter::parse(&nested_not(256)).unwrap_err();
        assert!(err.to_string().contains("nested too deeply"));
        let err = Filter::parse(&nested_not(200_000)).unwrap_err();
        assert!(matches!(err, DepmanError::InvalidFilter { .. }));
    }

    #[test]
    fn test_display_round_trips_text() {
        let filter: Filter = "(testkey=testvalue)".parse().unwrap();
        assert_eq!(filter.to_string(), "(testkey=testvalue)");
    }
}
