//! 元数据过滤表达式
//!
//! 语法：`clause (and clause)*`，clause 为 `field op value`，op ∈ `== != > >= < <= like`。
//! value 可为双引号字符串、整数、浮点数或 true/false；like 以 `%` 匹配任意串、`_` 匹配单字符。
//! 字段 `text` 指向片段正文；片段没有的字段一律不匹配。

use std::cmp::Ordering;
use std::fmt;

use regex::Regex;

use crate::core::RagError;
use crate::rag::{EvidencePassage, Scalar};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone)]
enum Clause {
    Compare {
        field: String,
        op: CompareOp,
        value: Scalar,
    },
    Like {
        field: String,
        pattern: Regex,
    },
}

/// 已解析的过滤表达式（子句之间为 and 关系）
#[derive(Debug, Clone)]
pub struct Filter {
    source: String,
    clauses: Vec<Clause>,
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Filter {
    pub fn parse(expr: &str) -> Result<Self, RagError> {
        let tokens = lex(expr)?;
        let mut clauses = Vec::new();
        let mut iter = tokens.into_iter().peekable();

        loop {
            let field = match iter.next() {
                Some(Token::Ident(name)) => name,
                other => return Err(invalid(expr, format!("expected field, found {:?}", other))),
            };
            let op = match iter.next() {
                Some(Token::Op(op)) => Some(op),
                Some(Token::Like) => None,
                other => {
                    return Err(invalid(expr, format!("expected operator, found {:?}", other)))
                }
            };
            let value = match iter.next() {
                Some(Token::Value(v)) => v,
                other => return Err(invalid(expr, format!("expected value, found {:?}", other))),
            };

            let clause = match (op, value) {
                (Some(op), value) => Clause::Compare { field, op, value },
                (None, Scalar::Str(pattern)) => Clause::Like {
                    field,
                    pattern: like_to_regex(&pattern).map_err(|e| invalid(expr, e.to_string()))?,
                },
                (None, other) => {
                    return Err(invalid(expr, format!("like needs a string pattern, found {other}")))
                }
            };
            clauses.push(clause);

            match iter.next() {
                None => break,
                Some(Token::And) => continue,
                Some(other) => {
                    return Err(invalid(expr, format!("expected `and`, found {:?}", other)))
                }
            }
        }

        Ok(Self {
            source: expr.trim().to_string(),
            clauses,
        })
    }

    /// 片段是否满足所有子句
    pub fn matches(&self, passage: &EvidencePassage) -> bool {
        self.clauses.iter().all(|clause| clause.matches(passage))
    }
}

impl Clause {
    fn matches(&self, passage: &EvidencePassage) -> bool {
        match self {
            Clause::Compare { field, op, value } => {
                let Some(actual) = field_value(passage, field) else {
                    return false;
                };
                match compare(&actual, value) {
                    Some(ordering) => match op {
                        CompareOp::Eq => ordering == Ordering::Equal,
                        CompareOp::Ne => ordering != Ordering::Equal,
                        CompareOp::Gt => ordering == Ordering::Greater,
                        CompareOp::Ge => ordering != Ordering::Less,
                        CompareOp::Lt => ordering == Ordering::Less,
                        CompareOp::Le => ordering != Ordering::Greater,
                    },
                    None => false,
                }
            }
            Clause::Like { field, pattern } => match field_value(passage, field) {
                Some(Scalar::Str(s)) => pattern.is_match(&s),
                _ => false,
            },
        }
    }
}

fn field_value(passage: &EvidencePassage, field: &str) -> Option<Scalar> {
    if field == "text" {
        return Some(Scalar::Str(passage.text.clone()));
    }
    passage.metadata.get(field).cloned()
}

/// 同类比较：数值之间按 f64，字符串按字典序，布尔 false < true
fn compare(actual: &Scalar, expected: &Scalar) -> Option<Ordering> {
    match (actual, expected) {
        (Scalar::Str(a), Scalar::Str(b)) => Some(a.cmp(b)),
        (Scalar::Bool(a), Scalar::Bool(b)) => Some(a.cmp(b)),
        (a, b) => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

fn like_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut re = String::from("(?s)^");
    for c in pattern.chars() {
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re)
}

fn invalid(expr: &str, reason: String) -> RagError {
    RagError::InvalidFilter(format!("{reason} in `{expr}`"))
}

#[derive(Debug, Clone)]
enum Token {
    Ident(String),
    Op(CompareOp),
    Like,
    And,
    Value(Scalar),
}

fn lex(expr: &str) -> Result<Vec<Token>, RagError> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '"' {
            let mut value = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err(invalid(expr, "unterminated string".to_string())),
                    Some('\\') => {
                        if let Some(next) = chars.get(i + 1) {
                            value.push(*next);
                        }
                        i += 2;
                    }
                    Some('"') => {
                        i += 1;
                        break;
                    }
                    Some(other) => {
                        value.push(*other);
                        i += 1;
                    }
                }
            }
            tokens.push(Token::Value(Scalar::Str(value)));
        } else if "=!<>".contains(c) {
            let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
            let (op, width) = match two.as_str() {
                "==" => (CompareOp::Eq, 2),
                "!=" => (CompareOp::Ne, 2),
                ">=" => (CompareOp::Ge, 2),
                "<=" => (CompareOp::Le, 2),
                _ if c == '>' => (CompareOp::Gt, 1),
                _ if c == '<' => (CompareOp::Lt, 1),
                _ => return Err(invalid(expr, format!("unknown operator near `{two}`"))),
            };
            tokens.push(Token::Op(op));
            i += width;
        } else if c.is_ascii_digit() || c == '-' || c == '.' {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let literal: String = chars[start..i].iter().collect();
            let value = if literal.contains('.') {
                literal.parse::<f64>().map(Scalar::Float).ok()
            } else {
                literal.parse::<i64>().map(Scalar::Int).ok()
            }
            .ok_or_else(|| invalid(expr, format!("bad number `{literal}`")))?;
            tokens.push(Token::Value(value));
        } else if c.is_alphanumeric() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            let token = match word.to_ascii_lowercase().as_str() {
                "and" => Token::And,
                "like" => Token::Like,
                "true" => Token::Value(Scalar::Bool(true)),
                "false" => Token::Value(Scalar::Bool(false)),
                _ => Token::Ident(word),
            };
            tokens.push(token);
        } else {
            return Err(invalid(expr, format!("unexpected character `{c}`")));
        }
    }

    if tokens.is_empty() {
        return Err(invalid(expr, "empty expression".to_string()));
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(text: &str, meta: &[(&str, Scalar)]) -> EvidencePassage {
        let mut p = EvidencePassage::new(text, 0.5, "src");
        for (k, v) in meta {
            p.metadata.insert(k.to_string(), v.clone());
        }
        p
    }

    fn ai_1956() -> EvidencePassage {
        passage(
            "Artificial intelligence was founded as an academic discipline in 1956.",
            &[
                ("category", Scalar::Str("AI".into())),
                ("year", Scalar::Int(1956)),
                ("importance", Scalar::Int(90)),
            ],
        )
    }

    #[test]
    fn test_conjunction() {
        let f = Filter::parse(r#"category == "AI" and importance > 85"#).unwrap();
        assert!(f.matches(&ai_1956()));
        let f = Filter::parse(r#"category == "AI" and importance > 95"#).unwrap();
        assert!(!f.matches(&ai_1956()));
    }

    #[test]
    fn test_numeric_ops_mix_int_and_float() {
        assert!(Filter::parse("year >= 1956").unwrap().matches(&ai_1956()));
        assert!(Filter::parse("year < 1956.5").unwrap().matches(&ai_1956()));
        assert!(!Filter::parse("year != 1956").unwrap().matches(&ai_1956()));
    }

    #[test]
    fn test_like_on_text() {
        let f = Filter::parse(r#"text like "%academic%""#).unwrap();
        assert!(f.matches(&ai_1956()));
        let f = Filter::parse(r#"text like "%Turing%""#).unwrap();
        assert!(!f.matches(&ai_1956()));
    }

    #[test]
    fn test_like_prefix_and_escaping() {
        let p = passage("x", &[("color", Scalar::Str("red.dark".into()))]);
        assert!(Filter::parse(r#"color like "red%""#).unwrap().matches(&p));
        assert!(Filter::parse(r#"color like "red_dark""#).unwrap().matches(&p));
        let q = passage("x", &[("color", Scalar::Str("redXdark".into()))]);
        assert!(!Filter::parse(r#"color like "red.dark""#).unwrap().matches(&q));
    }

    #[test]
    fn test_unknown_field_never_matches() {
        assert!(!Filter::parse("missing == 1").unwrap().matches(&ai_1956()));
        assert!(!Filter::parse("missing != 1").unwrap().matches(&ai_1956()));
    }

    #[test]
    fn test_type_mismatch_never_matches() {
        assert!(!Filter::parse(r#"year == "1956""#).unwrap().matches(&ai_1956()));
    }

    #[test]
    fn test_bool_equality() {
        let p = passage("x", &[("reviewed", Scalar::Bool(true))]);
        assert!(Filter::parse("reviewed == true").unwrap().matches(&p));
        assert!(Filter::parse("reviewed != false").unwrap().matches(&p));
    }

    #[test]
    fn test_bool_ordering() {
        let reviewed = passage("x", &[("reviewed", Scalar::Bool(true))]);
        let draft = passage("y", &[("reviewed", Scalar::Bool(false))]);
        assert!(Filter::parse("reviewed > false").unwrap().matches(&reviewed));
        assert!(!Filter::parse("reviewed < false").unwrap().matches(&reviewed));
        assert!(Filter::parse("reviewed < true").unwrap().matches(&draft));
        assert!(!Filter::parse("reviewed >= true").unwrap().matches(&draft));
        assert!(Filter::parse("reviewed <= false").unwrap().matches(&draft));
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["", "year >", "year 1956", r#"name == "open"#, "a == 1 or b == 2", "x ~ 1"] {
            assert!(
                matches!(Filter::parse(bad), Err(RagError::InvalidFilter(_))),
                "expected parse error for {bad:?}"
            );
        }
    }
}
