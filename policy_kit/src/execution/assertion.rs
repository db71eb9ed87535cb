//! Assertion evaluation against a resource instance or a filtered table.

use std::collections::BTreeMap;

use crate::compare::{compare, CompareOp};
use crate::error::AssertionError;
use crate::filter_table::{Condition, DynTable};
use crate::profile::Assertion;
use crate::resources::ResourceInstance;
use crate::value::Value;

/// What an assertion looks at
pub enum Subject<'a> {
    Resource(&'a ResourceInstance),
    /// Rows of the instance's table left after `where` conditions
    Table {
        instance: &'a ResourceInstance,
        table: Box<dyn DynTable>,
    },
}

impl<'a> Subject<'a> {
    /// Apply `conditions`; no conditions means the resource itself
    pub fn new(instance: &'a ResourceInstance, conditions: &[Condition]) -> Result<Self, AssertionError> {
        if conditions.is_empty() {
            return Ok(Subject::Resource(instance));
        }
        let table = match instance.resource().and_then(|r| r.table()) {
            Some(table) => table?,
            None => {
                return Err(AssertionError::Invalid(format!(
                    "resource '{}' has no table to filter with where",
                    instance.name()
                )))
            }
        };
        let table = table.filter_conditions(conditions).map_err(AssertionError::Invalid)?;
        Ok(Subject::Table { instance, table })
    }

    fn property(&self, property: &str) -> Result<Value, AssertionError> {
        match self {
            Subject::Resource(instance) => instance.get(property),
            Subject::Table { table, .. } => match property {
                "count" => Ok(Value::Integer(table.len() as i64)),
                "entries" => Ok(Value::List(table.entries())),
                field => table
                    .column(field)
                    .map(Value::List)
                    .map_err(|e| AssertionError::Accessor {
                        property: field.to_string(),
                        reason: e.to_string(),
                    }),
            },
        }
    }

    fn exists(&self) -> Result<bool, AssertionError> {
        match self {
            Subject::Resource(instance) => instance.exists(),
            Subject::Table { table, .. } => Ok(table.len() > 0),
        }
    }

    fn instance(&self) -> &ResourceInstance {
        match self {
            Subject::Resource(instance) | Subject::Table { instance, .. } => instance,
        }
    }
}

/// Result of a completed evaluation; `message` explains a failure
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub passed: bool,
    pub message: Option<String>,
}

impl Outcome {
    fn decide(raw: bool, negate: bool, failure: impl FnOnce() -> String) -> Self {
        let passed = raw != negate;
        Self {
            passed,
            message: if passed { None } else { Some(failure()) },
        }
    }
}

fn expected_value(assertion: &Assertion, inputs: &BTreeMap<String, Value>) -> Result<Value, AssertionError> {
    match &assertion.expected_input {
        Some(name) => inputs
            .get(name)
            .cloned()
            .ok_or_else(|| AssertionError::UnknownInput(name.clone())),
        None => Ok(assertion.expected.clone().unwrap_or_default()),
    }
}

fn not(negate: bool) -> &'static str {
    if negate {
        "not "
    } else {
        ""
    }
}

/// Evaluate one assertion
///
/// `Err` means the assertion could not be evaluated (`error` result);
/// `Ok` with `passed == false` is an ordinary failure.
pub fn evaluate(
    subject: &Subject<'_>,
    assertion: &Assertion,
    inputs: &BTreeMap<String, Value>,
) -> Result<Outcome, AssertionError> {
    let negate = assertion.negate;

    match (assertion.matcher.as_deref(), assertion.property.as_deref()) {
        (Some("exist"), None) => {
            let exists = subject.exists()?;
            Ok(Outcome::decide(exists, negate, || {
                format!("expected {} {}to exist", subject.instance().describe(), not(negate))
            }))
        }
        (Some("be_empty"), Some(property)) => {
            let actual = subject.property(property)?;
            Ok(Outcome::decide(actual.is_empty(), negate, || {
                format!("expected {} {}to be empty, got {}", property, not(negate), actual)
            }))
        }
        (Some("be_empty"), None) => match subject {
            Subject::Table { table, .. } => {
                let count = table.len();
                Ok(Outcome::decide(count == 0, negate, || {
                    format!("expected no matching rows {}to exist, got {}", not(negate), count)
                }))
            }
            Subject::Resource(_) => Err(AssertionError::Invalid(
                "be_empty needs a property or where conditions".to_string(),
            )),
        },
        (Some(matcher), None) => {
            let args = match &assertion.criteria {
                Some(criteria) => criteria.clone(),
                None => expected_value(assertion, inputs)?,
            };
            let instance = subject.instance();
            let outcome = instance
                .resource()
                .and_then(|r| r.matches(matcher, &args))
                .ok_or_else(|| AssertionError::UnknownMatcher(matcher.to_string()))?;
            let matched = outcome?;
            Ok(Outcome::decide(matched, negate, || {
                format!("expected {} {}to {} {}", instance.describe(), not(negate), matcher, args)
            }))
        }
        (None, Some(property)) => {
            let op = assertion.op.unwrap_or(CompareOp::Eq);
            let expected = expected_value(assertion, inputs)?;
            let actual = subject.property(property)?;
            let matched = compare(&actual, op, &expected).map_err(AssertionError::Invalid)?;
            Ok(Outcome::decide(matched, negate, || {
                if op == CompareOp::Empty {
                    format!("expected {} {}to be empty, got {}", property, not(negate), actual)
                } else {
                    format!("expected {} {}{} {}, got {}", property, not(negate), op, expected, actual)
                }
            }))
        }
        (Some(matcher), Some(_)) => Err(AssertionError::Invalid(format!(
            "matcher '{}' does not take a property",
            matcher
        ))),
        (None, None) => Err(AssertionError::Invalid(
            "assertion needs a matcher or a property".to_string(),
        )),
    }
}
