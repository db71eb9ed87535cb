//! # Filter Tables
//!
//! Immutable, chainable row/column views shared by every list-style resource.
//!
//! A row schema is a plain struct implementing [`TableRow`], usually declared
//! with [`table_row!`]. The table keeps one shared snapshot of the rows and a
//! list of selected indices, so filtering never copies or re-fetches data and
//! never changes row order.
//!
//! ```ignore
//! table_row! {
//!     pub struct ProcessRow {
//!         pid: i64,
//!         user: String,
//!         command: String,
//!     }
//! }
//!
//! let table = FilterTable::new(rows);
//! let root = table.filter(|row| row.get("user") == Value::from("root"));
//! let pids: Vec<i64> = root.project(|r| r.pid);
//! let commands = root.column("command")?;
//! ```

use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::compare::{compare, CompareOp};
use crate::value::Value;

/// A row with a fixed, ordered field list
pub trait TableRow: Send + Sync {
    /// Declared field names, in schema order
    const FIELDS: &'static [&'static str];

    /// Value of a declared field; undeclared names yield `Value::Null`
    fn field(&self, name: &str) -> Value;
}

/// Declare a row struct and derive its [`TableRow`] schema from the fields
#[macro_export]
macro_rules! table_row {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $($(#[$fmeta:meta])* $field:ident : $ty:ty),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        $vis struct $name {
            $($(#[$fmeta])* pub $field: $ty),*
        }

        impl $crate::filter_table::TableRow for $name {
            const FIELDS: &'static [&'static str] = &[$(stringify!($field)),*];

            fn field(&self, name: &str) -> $crate::value::Value {
                match name {
                    $(stringify!($field) => $crate::value::Value::from(self.$field.clone()),)*
                    _ => $crate::value::Value::Null,
                }
            }
        }
    };
}

/// Projection of a field the schema does not declare
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown field '{field}' (available: {})", .available.join(", "))]
pub struct UnknownField {
    pub field: String,
    pub available: Vec<&'static str>,
}

/// Per-row name bindings handed to `filter` predicates
pub struct RowBindings<'a, R: TableRow> {
    row: &'a R,
}

impl<'a, R: TableRow> RowBindings<'a, R> {
    /// Bound value of a field; absent fields bind to `Value::Null`
    pub fn get(&self, name: &str) -> Value {
        if R::FIELDS.contains(&name) {
            self.row.field(name)
        } else {
            Value::Null
        }
    }

    /// Typed access to the underlying row
    pub fn row(&self) -> &'a R {
        self.row
    }
}

/// Declarative row condition, as written in control files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    #[serde(default = "default_condition_op")]
    pub op: CompareOp,
    #[serde(default)]
    pub value: Value,
}

fn default_condition_op() -> CompareOp {
    CompareOp::Eq
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.op, self.value)
    }
}

/// Immutable table over a shared row snapshot
pub struct FilterTable<R: TableRow> {
    rows: Arc<Vec<R>>,
    selected: Arc<Vec<usize>>,
}

impl<R: TableRow> Clone for FilterTable<R> {
    fn clone(&self) -> Self {
        Self {
            rows: Arc::clone(&self.rows),
            selected: Arc::clone(&self.selected),
        }
    }
}

impl<R: TableRow + fmt::Debug> fmt::Debug for FilterTable<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.rows()).finish()
    }
}

impl<R: TableRow + PartialEq> PartialEq for FilterTable<R> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.rows().zip(other.rows()).all(|(a, b)| a == b)
    }
}

impl<R: TableRow> FilterTable<R> {
    /// Build a table over freshly fetched rows
    pub fn new(rows: Vec<R>) -> Self {
        let selected = (0..rows.len()).collect();
        Self {
            rows: Arc::new(rows),
            selected: Arc::new(selected),
        }
    }

    /// An empty table, used by skipped resources
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn fields(&self) -> &'static [&'static str] {
        R::FIELDS
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    /// `exists?`: the table has at least one row
    pub fn exists(&self) -> bool {
        !self.is_empty()
    }

    /// Selected rows in original order
    pub fn rows(&self) -> impl Iterator<Item = &R> + '_ {
        self.selected.iter().filter_map(move |&i| self.rows.get(i))
    }

    /// Rows matching `predicate`, keeping order; the snapshot is shared
    pub fn filter<F>(&self, predicate: F) -> Self
    where
        F: Fn(&RowBindings<'_, R>) -> bool,
    {
        let selected: Vec<usize> = self
            .selected
            .iter()
            .copied()
            .filter(|&i| {
                self.rows
                    .get(i)
                    .map(|row| predicate(&RowBindings { row }))
                    .unwrap_or(false)
            })
            .collect();
        Self {
            rows: Arc::clone(&self.rows),
            selected: Arc::new(selected),
        }
    }

    /// Rows satisfying every condition
    ///
    /// A malformed condition (bad regex, non-list `be_in`) matches no row and
    /// is reported back as an error.
    pub fn filter_conditions(&self, conditions: &[Condition]) -> Result<Self, String> {
        for condition in conditions {
            // Surface malformed expectations once instead of per row.
            compare(&Value::Null, condition.op, &condition.value)?;
        }
        Ok(self.filter(|row| {
            conditions.iter().all(|c| {
                compare(&row.get(&c.field), c.op, &c.value).unwrap_or(false)
            })
        }))
    }

    /// Values of one declared field across the selected rows
    pub fn column(&self, field: &str) -> Result<Vec<Value>, UnknownField> {
        if !R::FIELDS.contains(&field) {
            return Err(UnknownField {
                field: field.to_string(),
                available: R::FIELDS.to_vec(),
            });
        }
        Ok(self.rows().map(|row| row.field(field)).collect())
    }

    /// Typed projection across the selected rows
    pub fn project<T, F>(&self, f: F) -> Vec<T>
    where
        F: Fn(&R) -> T,
    {
        self.rows().map(f).collect()
    }

    /// All selected rows as field maps, for reporting
    pub fn entries(&self) -> Vec<Value> {
        self.rows()
            .map(|row| {
                Value::Map(
                    R::FIELDS
                        .iter()
                        .map(|f| (f.to_string(), row.field(f)))
                        .collect(),
                )
            })
            .collect()
    }
}

/// Object-safe view of a [`FilterTable`], used where the row type is erased
pub trait DynTable: Send + Sync {
    fn fields(&self) -> &'static [&'static str];
    fn len(&self) -> usize;
    fn filter_conditions(&self, conditions: &[Condition]) -> Result<Box<dyn DynTable>, String>;
    fn column(&self, field: &str) -> Result<Vec<Value>, UnknownField>;
    fn entries(&self) -> Vec<Value>;
}

impl<R: TableRow + 'static> DynTable for FilterTable<R> {
    fn fields(&self) -> &'static [&'static str] {
        R::FIELDS
    }

    fn len(&self) -> usize {
        FilterTable::len(self)
    }

    fn filter_conditions(&self, conditions: &[Condition]) -> Result<Box<dyn DynTable>, String> {
        Ok(Box::new(FilterTable::filter_conditions(self, conditions)?))
    }

    fn column(&self, field: &str) -> Result<Vec<Value>, UnknownField> {
        FilterTable::column(self, field)
    }

    fn entries(&self) -> Vec<Value> {
        FilterTable::entries(self)
    }
}

/// Row data fetched at most once per owning resource instance
///
/// A failed fetch is cached too, so every accessor sees the same error.
pub struct CachedTable<R: TableRow, E: Clone = String> {
    cell: OnceLock<Result<FilterTable<R>, E>>,
}

impl<R: TableRow, E: Clone> Default for CachedTable<R, E> {
    fn default() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }
}

impl<R: TableRow, E: Clone> CachedTable<R, E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached table, running `fetch` only on first access
    pub fn get_or_fetch<F>(&self, fetch: F) -> Result<&FilterTable<R>, E>
    where
        F: FnOnce() -> Result<Vec<R>, E>,
    {
        self.cell
            .get_or_init(|| fetch().map(FilterTable::new))
            .as_ref()
            .map_err(Clone::clone)
    }
}
