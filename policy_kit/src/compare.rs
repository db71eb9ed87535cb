//! Comparison operators shared by assertions and filter-table conditions.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::value::Value;

/// Operator applied between an actual and an expected value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    #[serde(alias = "==", alias = "equals")]
    Eq,
    #[serde(alias = "!=", alias = "not_equal")]
    Ne,
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = ">=")]
    Ge,
    #[serde(alias = "<")]
    Lt,
    #[serde(alias = "<=")]
    Le,
    /// Regular expression match against the string form
    Match,
    /// List membership or substring
    Include,
    /// Loose comparison: numeric strings, case-insensitive strings, octal modes
    Cmp,
    /// Actual is one of the expected list
    BeIn,
    /// Actual is null, an empty string, list or map; `expected` is ignored
    Empty,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "eq",
            CompareOp::Ne => "ne",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Match => "match",
            CompareOp::Include => "include",
            CompareOp::Cmp => "cmp",
            CompareOp::BeIn => "be_in",
            CompareOp::Empty => "empty",
        };
        write!(f, "{}", s)
    }
}

/// Evaluate `actual <op> expected`
///
/// Returns `Err` only for malformed expectations (bad regex, non-list
/// `be_in`); a type mismatch is an ordinary `false`.
pub fn compare(actual: &Value, op: CompareOp, expected: &Value) -> Result<bool, String> {
    match op {
        CompareOp::Eq => Ok(strict_eq(actual, expected)),
        CompareOp::Ne => Ok(!strict_eq(actual, expected)),
        CompareOp::Gt | CompareOp::Ge | CompareOp::Lt | CompareOp::Le => {
            Ok(ordered(actual, op, expected))
        }
        CompareOp::Match => {
            let pattern = expected
                .as_str()
                .ok_or_else(|| format!("match expects a string pattern, got {}", expected.type_name()))?;
            let re = Regex::new(pattern).map_err(|e| format!("invalid pattern '{}': {}", pattern, e))?;
            Ok(match actual {
                Value::Null => false,
                Value::String(s) => re.is_match(s),
                other => re.is_match(&other.to_string()),
            })
        }
        CompareOp::Include => Ok(match actual {
            Value::List(items) => match expected {
                Value::List(wanted) => wanted.iter().all(|w| items.iter().any(|i| loose_eq(i, w))),
                single => items.iter().any(|i| loose_eq(i, single)),
            },
            Value::String(s) => expected.as_str().map(|e| s.contains(e)).unwrap_or(false),
            Value::Map(map) => expected.as_str().map(|k| map.contains_key(k)).unwrap_or(false),
            _ => false,
        }),
        CompareOp::Cmp => Ok(loose_eq(actual, expected)),
        CompareOp::BeIn => match expected {
            Value::List(items) => Ok(items.iter().any(|i| loose_eq(actual, i))),
            other => Err(format!("be_in expects a list, got {}", other.type_name())),
        },
        CompareOp::Empty => Ok(actual.is_empty()),
    }
}

fn strict_eq(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Integer(a), Value::Float(b)) | (Value::Float(b), Value::Integer(a)) => {
            (*a as f64 - b).abs() < f64::EPSILON
        }
        _ => actual == expected,
    }
}

fn ordered(actual: &Value, op: CompareOp, expected: &Value) -> bool {
    let ordering = match (actual.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => match (actual.as_str(), expected.as_str()) {
            (Some(a), Some(b)) => Some(a.cmp(b)),
            _ => None,
        },
    };
    let Some(ordering) = ordering else {
        return false;
    };
    match op {
        CompareOp::Gt => ordering.is_gt(),
        CompareOp::Ge => ordering.is_ge(),
        CompareOp::Lt => ordering.is_lt(),
        CompareOp::Le => ordering.is_le(),
        _ => false,
    }
}

/// `cmp` semantics: numbers compare numerically (octal strings like "0644"
/// included), strings case-insensitively, booleans against "true"/"false"
fn loose_eq(actual: &Value, expected: &Value) -> bool {
    if strict_eq(actual, expected) {
        return true;
    }
    match (actual, expected) {
        (Value::String(a), Value::String(b)) => {
            if a.eq_ignore_ascii_case(b) {
                return true;
            }
            match (parse_octal(a), parse_octal(b)) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        (Value::Integer(i), Value::String(s)) | (Value::String(s), Value::Integer(i)) => {
            s.trim().parse::<i64>().map(|n| n == *i).unwrap_or(false)
                || parse_octal(s).map(|n| n == *i).unwrap_or(false)
        }
        (Value::Float(f), Value::String(s)) | (Value::String(s), Value::Float(f)) => s
            .trim()
            .parse::<f64>()
            .map(|n| (n - f).abs() < f64::EPSILON)
            .unwrap_or(false),
        (Value::Boolean(b), Value::String(s)) | (Value::String(s), Value::Boolean(b)) => {
            s.trim().eq_ignore_ascii_case(if *b { "true" } else { "false" })
        }
        _ => false,
    }
}

fn parse_octal(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.len() > 1 && s.starts_with('0') && s.chars().all(|c| ('0'..='7').contains(&c)) {
        i64::from_str_radix(s, 8).ok()
    } else {
        None
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_coerces_numeric_strings() {
        assert!(compare(&Value::from("10"), CompareOp::Gt, &Value::Integer(9)).unwrap());
        assert!(!compare(&Value::Null, CompareOp::Gt, &Value::Integer(0)).unwrap());
    }

    #[test]
    fn test_cmp_handles_octal_modes() {
        assert!(compare(&Value::from("0644"), CompareOp::Cmp, &Value::Integer(0o644)).unwrap());
        assert!(compare(&Value::from("0644"), CompareOp::Cmp, &Value::from("0o644")).is_ok());
        assert!(!compare(&Value::from("0644"), CompareOp::Cmp, &Value::from("0600")).unwrap());
        assert!(compare(&Value::from("Enforcing"), CompareOp::Cmp, &Value::from("enforcing")).unwrap());
    }

    #[test]
    fn test_include_on_lists_and_strings() {
        let list = Value::from(vec!["sshd", "cron"]);
        assert!(compare(&list, CompareOp::Include, &Value::from("cron")).unwrap());
        assert!(!compare(&list, CompareOp::Include, &Value::from("nginx")).unwrap());
        assert!(compare(&Value::from("Protocol 2"), CompareOp::Include, &Value::from("2")).unwrap());
    }

    #[test]
    fn test_bad_regex_is_an_error() {
        assert!(compare(&Value::from("x"), CompareOp::Match, &Value::from("(")).is_err());
    }

    #[test]
    fn test_be_in_requires_list() {
        assert!(compare(&Value::from("a"), CompareOp::BeIn, &Value::from(vec!["a", "b"])).unwrap());
        assert!(compare(&Value::from("a"), CompareOp::BeIn, &Value::from("a")).is_err());
    }

    #[test]
    fn test_empty_ignores_expected() {
        assert!(compare(&Value::List(vec![]), CompareOp::Empty, &Value::Null).unwrap());
        assert!(!compare(&Value::from("x"), CompareOp::Empty, &Value::Null).unwrap());
    }
}
