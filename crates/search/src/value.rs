//! The typed value model shared by evaluation and facet descriptions.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ExpressionError, ExpressionResult};

/// Calendar date format used for rendering and parsing dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Fallback instant formats accepted in addition to RFC 3339.
const INSTANT_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// The kind of a [`SearchValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchValueKind {
    String,
    Number,
    Boolean,
    Date,
    Instant,
}

impl SearchValueKind {
    /// Returns true for date and instant kinds.
    pub fn is_temporal(self) -> bool {
        matches!(self, SearchValueKind::Date | SearchValueKind::Instant)
    }

    /// Returns true when `<`, `>` and friends are defined for the kind.
    pub fn is_orderable(self) -> bool {
        !matches!(self, SearchValueKind::Boolean)
    }
}

impl fmt::Display for SearchValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SearchValueKind::String => "STRING",
            SearchValueKind::Number => "NUMBER",
            SearchValueKind::Boolean => "BOOLEAN",
            SearchValueKind::Date => "DATE",
            SearchValueKind::Instant => "INSTANT",
        };
        f.write_str(name)
    }
}

/// A single typed value.
///
/// Missing data is never a `SearchValue`; terms return `Option<SearchValue>`
/// and use `None` for absent records and SQL `NULL`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SearchValue {
    String(String),
    Number(f64),
    Boolean(bool),
    Date(NaiveDate),
    Instant(DateTime<Utc>),
}

impl SearchValue {
    /// Returns the kind of this value.
    pub fn kind(&self) -> SearchValueKind {
        match self {
            SearchValue::String(_) => SearchValueKind::String,
            SearchValue::Number(_) => SearchValueKind::Number,
            SearchValue::Boolean(_) => SearchValueKind::Boolean,
            SearchValue::Date(_) => SearchValueKind::Date,
            SearchValue::Instant(_) => SearchValueKind::Instant,
        }
    }

    /// Returns the string payload, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SearchValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Same-kind equality. Different kinds are an error.
    pub fn equals(&self, other: &SearchValue) -> ExpressionResult<bool> {
        match (self, other) {
            (SearchValue::Boolean(a), SearchValue::Boolean(b)) => Ok(a == b),
            _ => Ok(self.compare(other)? == Ordering::Equal),
        }
    }

    /// Strict ordering, `self > other`.
    pub fn greater_than(&self, other: &SearchValue) -> ExpressionResult<bool> {
        Ok(self.ordered(other, ">")? == Ordering::Greater)
    }

    /// Non-strict ordering, `self >= other`.
    pub fn greater_than_or_equal(&self, other: &SearchValue) -> ExpressionResult<bool> {
        Ok(self.ordered(other, ">=")? != Ordering::Less)
    }

    /// Case-insensitive substring test. Only defined for strings.
    pub fn contains(&self, other: &SearchValue) -> ExpressionResult<bool> {
        match (self, other) {
            (SearchValue::String(haystack), SearchValue::String(needle)) => Ok(haystack
                .to_lowercase()
                .contains(&needle.to_lowercase())),
            _ => Err(ExpressionError::ContainsOnNonString {
                left: self.kind(),
                right: other.kind(),
            }),
        }
    }

    /// Converts the value to another kind.
    ///
    /// Strings parse with the same formats values render with. Conversions
    /// that would lose information (an instant to a date) are rejected.
    pub fn parse_to(&self, target: SearchValueKind) -> ExpressionResult<SearchValue> {
        if self.kind() == target {
            return Ok(self.clone());
        }
        let converted = match (self, target) {
            (_, SearchValueKind::String) => Some(SearchValue::String(self.to_string())),
            (SearchValue::String(s), SearchValueKind::Date) => {
                NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
                    .ok()
                    .map(SearchValue::Date)
            }
            (SearchValue::String(s), SearchValueKind::Instant) => {
                parse_instant(s).map(SearchValue::Instant)
            }
            (SearchValue::String(s), SearchValueKind::Number) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(SearchValue::Number),
            (SearchValue::String(s), SearchValueKind::Boolean) => {
                match s.trim().to_ascii_lowercase().as_str() {
                    "true" => Some(SearchValue::Boolean(true)),
                    "false" => Some(SearchValue::Boolean(false)),
                    _ => None,
                }
            }
            (SearchValue::Date(d), SearchValueKind::Instant) => d
                .and_hms_opt(0, 0, 0)
                .map(|dt| SearchValue::Instant(dt.and_utc())),
            _ => None,
        };
        converted.ok_or_else(|| ExpressionError::ValueConversion {
            value: self.to_string(),
            target,
        })
    }

    fn ordered(&self, other: &SearchValue, operator: &str) -> ExpressionResult<Ordering> {
        if let SearchValue::Boolean(_) = self {
            return Err(ExpressionError::UnsupportedOperator {
                operator: operator.to_string(),
                kind: SearchValueKind::Boolean,
            });
        }
        self.compare(other)
    }

    fn compare(&self, other: &SearchValue) -> ExpressionResult<Ordering> {
        let ordering = match (self, other) {
            (SearchValue::String(a), SearchValue::String(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
            (SearchValue::Number(a), SearchValue::Number(b)) => a.partial_cmp(b),
            (SearchValue::Boolean(a), SearchValue::Boolean(b)) => Some(a.cmp(b)),
            (SearchValue::Date(a), SearchValue::Date(b)) => Some(a.cmp(b)),
            (SearchValue::Instant(a), SearchValue::Instant(b)) => Some(a.cmp(b)),
            _ => None,
        };
        ordering.ok_or_else(|| ExpressionError::IncompatibleKinds {
            left: self.kind(),
            right: other.kind(),
        })
    }
}

impl fmt::Display for SearchValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchValue::String(s) => f.write_str(s),
            SearchValue::Number(n) => write!(f, "{}", n),
            SearchValue::Boolean(b) => write!(f, "{}", b),
            SearchValue::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            SearchValue::Instant(i) => {
                f.write_str(&i.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
        }
    }
}

/// Parses an instant from RFC 3339, a zone-less timestamp (taken as UTC) or a
/// bare date (midnight UTC).
pub fn parse_instant(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in INSTANT_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// One selectable option of an enumerated facet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetChoice {
    pub value: String,
    pub label: String,
}

impl FacetChoice {
    /// A choice whose label is its value.
    pub fn plain(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            label: value.clone(),
            value,
        }
    }
}

/// Describes one queryable field for UI autocompletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchValueTypeDefinition {
    pub kind: SearchValueKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<FacetChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SearchValueTypeDefinition {
    /// A free-form field of the given kind.
    pub fn of(kind: SearchValueKind) -> Self {
        Self {
            kind,
            choices: Vec::new(),
            description: None,
        }
    }

    /// Sets the enumerated choices.
    pub fn with_choices(mut self, choices: Vec<FacetChoice>) -> Self {
        self.choices = choices;
        self
    }

    /// Sets a human-readable description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
