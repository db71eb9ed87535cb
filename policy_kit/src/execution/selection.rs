//! Control selection filters.
//!
//! Each filter entry is either a literal control id or a `/regex/`. An
//! empty filter selects everything. Controls that don't match are removed
//! before execution and never show up in results or statistics.

use std::collections::BTreeSet;

use regex::Regex;

use crate::error::AuditError;

#[derive(Debug, Clone, Default)]
pub struct ControlSelector {
    ids: BTreeSet<String>,
    patterns: Vec<Regex>,
}

impl ControlSelector {
    /// Select every control
    pub fn all() -> Self {
        Self::default()
    }

    pub fn parse<S: AsRef<str>>(filters: &[S]) -> Result<Self, AuditError> {
        let mut selector = Self::default();
        for filter in filters {
            let filter = filter.as_ref().trim();
            if filter.is_empty() {
                continue;
            }
            match filter.strip_prefix('/').and_then(|f| f.strip_suffix('/')) {
                Some(pattern) => {
                    let re = Regex::new(pattern).map_err(|e| AuditError::InvalidControlFilter {
                        filter: filter.to_string(),
                        reason: e.to_string(),
                    })?;
                    selector.patterns.push(re);
                }
                None => {
                    selector.ids.insert(filter.to_string());
                }
            }
        }
        Ok(selector)
    }

    pub fn is_all(&self) -> bool {
        self.ids.is_empty() && self.patterns.is_empty()
    }

    pub fn matches(&self, id: &str) -> bool {
        self.is_all() || self.ids.contains(id) || self.patterns.iter().any(|re| re.is_match(id))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_selects_all() {
        let selector = ControlSelector::parse::<&str>(&[]).unwrap();
        assert!(selector.is_all());
        assert!(selector.matches("anything"));
    }

    #[test]
    fn test_literal_ids_are_exact() {
        let selector = ControlSelector::parse(&["db_1"]).unwrap();
        assert!(selector.matches("db_1"));
        assert!(!selector.matches("db_10"));
    }

    #[test]
    fn test_regex_and_literal_mixed() {
        let selector = ControlSelector::parse(&["/^db_/", "web_2"]).unwrap();
        assert!(selector.matches("db_1"));
        assert!(selector.matches("web_2"));
        assert!(!selector.matches("web_1"));
    }

    #[test]
    fn test_bad_regex_is_rejected() {
        let err = ControlSelector::parse(&["/([/"]).unwrap_err();
        assert!(matches!(err, AuditError::InvalidControlFilter { .. }));
    }
}
