//! `policy_document`: a JSON access policy (`Version` + `Statement` list).
//!
//! ```toml
//! resource = "policy_document"
//! params = { path = "/etc/app/bucket-policy.json" }
//! assert = [
//!   { matcher = "have_statement", criteria = { Effect = "Allow", Action = "/^s3:Get/" } },
//! ]
//! ```
//!
//! ## Statement matching
//!
//! Criteria keys are `Action`, `Effect`, `Resource` and `Sid`. Statements
//! are normalized before matching: keys are lowercased, a lone statement
//! object becomes a one-element list and scalar `Action`/`Resource` values
//! become lists. A criterion written as `/pattern/` is a regular expression.
//!
//! | Criterion value | Matches when |
//! |-----------------|--------------|
//! | string | any statement value equals it |
//! | `/regex/` | any statement value matches |
//! | list of strings | the value set equals the list set |
//! | list of `/regex/` | every value matches every pattern |

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use regex::Regex;

use super::{param, ConstructError, ConstructResult, Resource, StructuredConfig};
use crate::error::AssertionError;
use crate::transport::Connection;
use crate::value::Value;

const EXPECTED_CRITERIA: &[&str] = &["Action", "Effect", "Resource", "Sid"];
const UNIMPLEMENTED_CRITERIA: &[&str] = &["Conditional", "NotAction", "NotPrincipal", "NotResource", "Principal"];

pub struct PolicyDocumentResource {
    source: String,
    document: Option<Value>,
    statements: Vec<BTreeMap<String, Value>>,
}

pub fn construct(params: &Value, conn: &Arc<Connection>) -> ConstructResult {
    let inline = params.get("document");
    let (source, text) = match inline.as_str() {
        Some(text) => ("inline document".to_string(), Some(text.to_string())),
        None => {
            let path = param(params, "path").ok_or_else(|| {
                ConstructError::Failed("policy_document requires 'path' or 'document'".to_string())
            })?;
            let text = conn.transport().read_file(&path)?;
            (path, text)
        }
    };

    let document = match text {
        Some(text) => {
            let parsed: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
                ConstructError::Failed(format!("unable to parse policy {}: {}", source, e))
            })?;
            Some(Value::from(parsed))
        }
        None => None,
    };
    let statements = document.as_ref().map(normalize_statements).unwrap_or_default();

    Ok(Box::new(PolicyDocumentResource {
        source,
        document,
        statements,
    }))
}

/// Lowercase statement keys and coerce `action`/`resource` into lists
fn normalize_statements(document: &Value) -> Vec<BTreeMap<String, Value>> {
    let raw = match document.get("Statement") {
        Value::List(items) => items,
        single @ Value::Map(_) => vec![single],
        _ => Vec::new(),
    };

    raw.into_iter()
        .filter_map(|statement| match statement {
            Value::Map(fields) => Some(
                fields
                    .into_iter()
                    .map(|(key, value)| {
                        let key = key.to_ascii_lowercase();
                        let value = match (key.as_str(), value) {
                            ("action" | "resource", Value::List(items)) => Value::List(items),
                            ("action" | "resource", other) => Value::List(vec![other]),
                            (_, other) => other,
                        };
                        (key, value)
                    })
                    .collect(),
            ),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Criteria
// ============================================================================

enum Criterion {
    Literal(String),
    Pattern(Regex),
    Literals(Vec<String>),
    Patterns(Vec<Regex>),
    Unsupported,
}

#[derive(Default)]
struct Criteria {
    action: Option<Criterion>,
    effect: Option<String>,
    resource: Option<Criterion>,
    sid: Option<Criterion>,
}

/// `/re/` form of a criterion string
fn as_pattern(s: &str) -> Option<&str> {
    s.strip_prefix('/').and_then(|rest| rest.strip_suffix('/'))
}

fn compile(pattern: &str) -> Result<Regex, AssertionError> {
    Regex::new(pattern).map_err(|e| AssertionError::Invalid(format!("invalid pattern '/{}/': {}", pattern, e)))
}

fn parse_criterion(value: &Value) -> Result<Criterion, AssertionError> {
    match value {
        Value::String(s) => match as_pattern(s) {
            Some(p) => Ok(Criterion::Pattern(compile(p)?)),
            None => Ok(Criterion::Literal(s.clone())),
        },
        Value::List(items) => {
            let strings: Option<Vec<&str>> = items.iter().map(Value::as_str).collect();
            let Some(strings) = strings else {
                return Ok(Criterion::Unsupported);
            };
            if !strings.is_empty() && strings.iter().all(|s| as_pattern(s).is_some()) {
                let patterns = strings
                    .iter()
                    .filter_map(|s| as_pattern(s))
                    .map(compile)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Criterion::Patterns(patterns))
            } else if strings.iter().all(|s| as_pattern(s).is_none()) {
                Ok(Criterion::Literals(strings.into_iter().map(str::to_string).collect()))
            } else {
                Ok(Criterion::Unsupported)
            }
        }
        _ => Ok(Criterion::Unsupported),
    }
}

fn validate_criteria(raw: &Value) -> Result<Criteria, AssertionError> {
    let Value::Map(raw) = raw else {
        return Err(AssertionError::Invalid(
            "have_statement criteria must be a table".to_string(),
        ));
    };

    if let Some(key) = UNIMPLEMENTED_CRITERIA.iter().find(|k| raw.contains_key(**k)) {
        return Err(AssertionError::Invalid(format!(
            "Criterion '{}' is not supported for performing have_statement queries.",
            key
        )));
    }

    let unknown: Vec<&str> = raw
        .keys()
        .map(String::as_str)
        .filter(|k| !EXPECTED_CRITERIA.contains(k))
        .collect();
    if !unknown.is_empty() {
        return Err(AssertionError::Invalid(format!(
            "Unrecognized criteria {} to have_statement.  Recognized criteria: {}",
            unknown.join(", "),
            EXPECTED_CRITERIA.join(", ")
        )));
    }

    let mut criteria = Criteria::default();
    if let Some(effect) = raw.get("Effect") {
        match effect.as_str() {
            Some(e @ ("Allow" | "Deny")) => criteria.effect = Some(e.to_string()),
            _ => {
                return Err(AssertionError::Invalid(format!(
                    "Criterion 'Effect' for have_statement must be one of 'Allow' or 'Deny' - got '{}'",
                    plain(effect)
                )))
            }
        }
    }
    criteria.action = raw.get("Action").map(parse_criterion).transpose()?;
    criteria.resource = raw.get("Resource").map(parse_criterion).transpose()?;
    criteria.sid = raw.get("Sid").map(parse_criterion).transpose()?;
    Ok(criteria)
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn strings(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::List(items)) => items.iter().map(plain).collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![plain(other)],
    }
}

fn sid_matches(statement: &BTreeMap<String, Value>, sid: &Criterion) -> bool {
    let actual = statement.get("sid").and_then(Value::as_str);
    match (sid, actual) {
        (Criterion::Literal(want), Some(have)) => want == have,
        (Criterion::Pattern(re), Some(have)) => re.is_match(have),
        _ => false,
    }
}

fn array_matches(statement: &BTreeMap<String, Value>, field: &str, criterion: &Option<Criterion>) -> bool {
    let Some(criterion) = criterion else {
        return true;
    };
    let values = strings(statement.get(field));
    match criterion {
        Criterion::Literal(want) => values.iter().any(|v| v == want),
        Criterion::Pattern(re) => values.iter().any(|v| re.is_match(v)),
        Criterion::Literals(wanted) => {
            values.iter().collect::<BTreeSet<_>>() == wanted.iter().collect::<BTreeSet<_>>()
        }
        Criterion::Patterns(patterns) => values.iter().all(|v| patterns.iter().all(|re| re.is_match(v))),
        Criterion::Unsupported => false,
    }
}

impl PolicyDocumentResource {
    /// True when any statement satisfies every given criterion
    pub fn has_statement(&self, raw_criteria: &Value) -> Result<bool, AssertionError> {
        if self.document.is_none() {
            return Ok(false);
        }
        let criteria = validate_criteria(raw_criteria)?;

        Ok(self
            .statements
            .iter()
            .filter(|s| criteria.sid.as_ref().map(|sid| sid_matches(s, sid)).unwrap_or(true))
            .any(|statement| {
                let effect_ok = criteria
                    .effect
                    .as_deref()
                    .map(|e| statement.get("effect").and_then(Value::as_str) == Some(e))
                    .unwrap_or(true);
                effect_ok
                    && array_matches(statement, "action", &criteria.action)
                    && array_matches(statement, "resource", &criteria.resource)
            }))
    }
}

impl StructuredConfig for PolicyDocumentResource {
    fn document(&self) -> &Value {
        self.document.as_ref().unwrap_or(&Value::Null)
    }
}

impl Resource for PolicyDocumentResource {
    fn describe(&self) -> String {
        format!("Policy {}", self.source)
    }

    fn exists(&self) -> Result<bool, AssertionError> {
        Ok(self.document.is_some())
    }

    fn get(&self, property: &str) -> Result<Value, AssertionError> {
        if self.document.is_none() {
            return Ok(Value::Null);
        }
        Ok(match property {
            "statement_count" => Value::Integer(self.statements.len() as i64),
            "version" => self.lookup("Version"),
            "statements" => Value::List(
                self.statements
                    .iter()
                    .map(|s| Value::Map(s.clone()))
                    .collect(),
            ),
            path => self.lookup(path),
        })
    }

    fn matches(&self, matcher: &str, args: &Value) -> Option<Result<bool, AssertionError>> {
        match matcher {
            "have_statement" => Some(self.has_statement(args)),
            _ => None,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use crate::transport::TargetDescriptor;

    const POLICY: &str = r#"{
        "Version": "2012-10-17",
        "Statement": [
            {"Sid": "ReadOnly", "Effect": "Allow", "Action": ["s3:GetObject", "s3:ListBucket"], "Resource": "arn:aws:s3:::logs/*"},
            {"Sid": "DenyDelete", "Effect": "Deny", "Action": "s3:DeleteObject", "Resource": "*"}
        ]
    }"#;

    fn conn(mock: MockTransport) -> Arc<Connection> {
        Arc::new(Connection::new(
            TargetDescriptor::parse("mock://").unwrap(),
            Box::new(mock),
        ))
    }

    fn policy() -> Box<dyn Resource> {
        let mock = MockTransport::new().with_file("/policy.json", POLICY);
        construct(&Value::from("/policy.json"), &conn(mock)).ok().unwrap()
    }

    fn criteria(pairs: &[(&str, Value)]) -> Value {
        Value::Map(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
    }

    fn has(policy: &dyn Resource, pairs: &[(&str, Value)]) -> Result<bool, AssertionError> {
        policy.matches("have_statement", &criteria(pairs)).unwrap()
    }

    #[test]
    fn test_properties() {
        let p = policy();
        assert_eq!(p.get("statement_count").unwrap(), Value::Integer(2));
        assert_eq!(p.get("version").unwrap(), Value::from("2012-10-17"));
        assert!(p.exists().unwrap());
    }

    #[test]
    fn test_scalar_and_regex_criteria() {
        let p = policy();
        assert!(has(p.as_ref(), &[("Effect", "Allow".into()), ("Action", "s3:GetObject".into())]).unwrap());
        assert!(has(p.as_ref(), &[("Action", "/^s3:Delete/".into())]).unwrap());
        assert!(!has(p.as_ref(), &[("Effect", "Allow".into()), ("Action", "s3:DeleteObject".into())]).unwrap());
        // scalar Resource was coerced into a list
        assert!(has(p.as_ref(), &[("Resource", "*".into())]).unwrap());
    }

    #[test]
    fn test_list_criteria_are_setwise() {
        let p = policy();
        let exact = Value::from(vec!["s3:ListBucket", "s3:GetObject"]);
        assert!(has(p.as_ref(), &[("Action", exact)]).unwrap());
        let partial = Value::from(vec!["s3:GetObject"]);
        assert!(!has(p.as_ref(), &[("Action", partial)]).unwrap());
        let patterns = Value::from(vec!["/^s3:/", "/Object$|Bucket$/"]);
        assert!(has(p.as_ref(), &[("Sid", "ReadOnly".into()), ("Action", patterns)]).unwrap());
    }

    #[test]
    fn test_sid_focus() {
        let p = policy();
        assert!(!has(p.as_ref(), &[("Sid", "ReadOnly".into()), ("Effect", "Deny".into())]).unwrap());
        assert!(has(p.as_ref(), &[("Sid", "/^Deny/".into()), ("Effect", "Deny".into())]).unwrap());
    }

    #[test]
    fn test_invalid_criteria() {
        let p = policy();
        let err = has(p.as_ref(), &[("Principal", "*".into())]).unwrap_err();
        assert_eq!(
            err,
            AssertionError::Invalid(
                "Criterion 'Principal' is not supported for performing have_statement queries.".into()
            )
        );
        assert!(has(p.as_ref(), &[("Colour", "red".into())]).is_err());
        assert!(has(p.as_ref(), &[("Effect", "Maybe".into())]).is_err());
    }

    #[test]
    fn test_single_statement_object() {
        let mut params = BTreeMap::new();
        params.insert(
            "document".to_string(),
            Value::from(r#"{"Statement": {"Effect": "Allow", "Action": "ec2:*", "Resource": "*"}}"#),
        );
        let p = construct(&Value::Map(params), &conn(MockTransport::new())).ok().unwrap();
        assert_eq!(p.get("statement_count").unwrap(), Value::Integer(1));
        assert!(has(p.as_ref(), &[("Action", "ec2:*".into())]).unwrap());
    }

    #[test]
    fn test_missing_document() {
        let p = construct(&Value::from("/absent.json"), &conn(MockTransport::new())).ok().unwrap();
        assert!(!p.exists().unwrap());
        assert!(!has(p.as_ref(), &[("Effect", "Allow".into())]).unwrap());
        assert_eq!(p.get("statement_count").unwrap(), Value::Null);
    }
}
