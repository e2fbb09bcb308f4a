//! Query building blocks shared by the store and the live-view core.
//!
//! A [`Filter`] is evaluated twice: by the store, as bind parameters of the
//! initial read, and by live views, locally against every feed event (feeds
//! carry the whole collection).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Record;

/// Row predicate.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    /// Matches every record.
    #[default]
    All,
    /// `field = value`.
    Eq { field: String, value: Value },
    /// All inner filters must match.
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut left), Filter::And(right)) => {
                left.extend(right);
                Filter::And(left)
            }
            (Filter::And(mut left), f) => {
                left.push(f);
                Filter::And(left)
            }
            (f, Filter::And(mut right)) => {
                right.insert(0, f);
                Filter::And(right)
            }
            (a, b) => Filter::And(vec![a, b]),
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq { field, value } => record.get(field).is_some_and(|v| loosely_equal(v, value)),
            Filter::And(filters) => filters.iter().all(|f| f.matches(record)),
        }
    }

    /// Flatten into `(field, value)` equality terms.
    pub fn terms(&self) -> Vec<(&str, &Value)> {
        match self {
            Filter::All => Vec::new(),
            Filter::Eq { field, value } => vec![(field.as_str(), value)],
            Filter::And(filters) => filters.iter().flat_map(|f| f.terms()).collect(),
        }
    }
}

/// Scalars compare by their textual form so that an id held as a string
/// matches the same id held as a number.
fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(x), Value::Number(y)) | (Value::Number(y), Value::String(x)) => {
            *x == y.to_string()
        }
        _ => a == b,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// Sort order for an initial read. Feeds are never trusted for order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Desc,
        }
    }
}
