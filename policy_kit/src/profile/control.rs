//! Control model as declared in `controls/*.toml`.
//!
//! ```toml
//! [[control]]
//! id = "sshd-01"
//! title = "sshd_config is owned by root"
//! impact = 0.7
//! tags = { cis = "5.2.1" }
//!
//! [[control.test]]
//! resource = "file"
//! params = { path = "/etc/ssh/sshd_config" }
//! assert = [
//!   { matcher = "exist" },
//!   { property = "owner", op = "eq", expected = "root" },
//!   { property = "mode", op = "cmp", expected = "0600" },
//! ]
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::compare::CompareOp;
use crate::filter_table::Condition;
use crate::value::Value;

/// Impact of a control that declares none
pub const DEFAULT_IMPACT: f64 = 0.5;

/// File and line a control or test was declared at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeLocation {
    pub file: String,
    pub line: usize,
}

impl CodeLocation {
    pub fn new(file: impl Into<String>, line: usize) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for CodeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Control {
    pub id: String,
    pub title: Option<String>,
    pub desc: Option<String>,
    /// In `[0, 1]`
    pub impact: f64,
    pub tags: BTreeMap<String, Value>,
    pub tests: Vec<TestBlock>,
    pub location: CodeLocation,
}

/// One `describe` block: a resource binding plus its assertions
#[derive(Debug, Clone, PartialEq)]
pub struct TestBlock {
    pub resource: String,
    pub params: Value,
    pub title: Option<String>,
    /// Row conditions applied to the resource's table before asserting
    pub conditions: Vec<Condition>,
    pub assertions: Vec<Assertion>,
    pub location: CodeLocation,
}

/// A single expectation on a test block's subject
///
/// Either a `matcher` (`exist`, `be_empty`, or a resource-specific one such
/// as `have_statement`) or a `property` compared with `op` against
/// `expected` / `expected_input`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Assertion {
    #[serde(default)]
    pub matcher: Option<String>,
    #[serde(default)]
    pub property: Option<String>,
    #[serde(default)]
    pub op: Option<CompareOp>,
    #[serde(default)]
    pub expected: Option<Value>,
    /// Name of a profile input supplying the expected value
    #[serde(default)]
    pub expected_input: Option<String>,
    /// Arguments for resource-specific matchers
    #[serde(default)]
    pub criteria: Option<Value>,
    /// `should_not`
    #[serde(default)]
    pub negate: bool,
}

impl Assertion {
    pub fn matcher(name: &str) -> Self {
        Self {
            matcher: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn property(property: &str, op: CompareOp, expected: impl Into<Value>) -> Self {
        Self {
            property: Some(property.to_string()),
            op: Some(op),
            expected: Some(expected.into()),
            ..Default::default()
        }
    }

    pub fn negated(mut self) -> Self {
        self.negate = !self.negate;
        self
    }

    /// `should`/`should_not` phrase used in result descriptions
    pub fn describe(&self) -> String {
        let verb = if self.negate { "should not" } else { "should" };
        match (&self.matcher, &self.property) {
            (Some(matcher), Some(property)) => format!("{} {} {}", property, verb, matcher),
            (Some(matcher), None) => match &self.criteria {
                Some(args) => format!("{} {} {}", verb, matcher, args),
                None => format!("{} {}", verb, matcher),
            },
            (None, Some(property)) => {
                let op = self.op.unwrap_or(CompareOp::Eq);
                let expected = match (&self.expected_input, &self.expected) {
                    (Some(input), _) => format!("input({})", input),
                    (None, Some(v)) => v.to_string(),
                    (None, None) => String::new(),
                };
                format!("{} {} {} {}", property, verb, op, expected).trim_end().to_string()
            }
            (None, None) => verb.to_string(),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assertion_descriptions() {
        assert_eq!(Assertion::matcher("exist").describe(), "should exist");
        assert_eq!(Assertion::matcher("exist").negated().describe(), "should not exist");
        assert_eq!(
            Assertion::property("mode", CompareOp::Cmp, "0600").describe(),
            "mode should cmp \"0600\""
        );
        let input = Assertion {
            property: Some("max_age".into()),
            op: Some(CompareOp::Le),
            expected_input: Some("max_password_age".into()),
            ..Default::default()
        };
        assert_eq!(input.describe(), "max_age should <= input(max_password_age)");
    }

    #[test]
    fn test_assertion_rejects_unknown_keys() {
        let parsed: Result<Assertion, _> = toml::from_str("matcher = \"exist\"\nshould = true\n");
        assert!(parsed.is_err());
    }
}
