//! Declarative request parameter validation.
//!
//! A [`RuleSet`] is a table of field rules (parameter name, location, length
//! bounds) built once at startup and consulted by the validation middleware
//! before a handler runs. Lengths are counted in characters of the decoded
//! value. The first violated rule is reported as a [`ValidationError`].
//!
//! A path parameter the matched route does not capture counts as an empty
//! segment. A query key given more than once is collected into a list, which
//! no length rule accepts.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;

use crate::config::{
    KEYWORD_MAX_LENGTH, KEYWORD_MIN_LENGTH, KEYWORD_PARAM, OPTIONAL_QUERY_MAX_LENGTH,
    OPTIONAL_QUERY_PARAM,
};

/// Where a parameter is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    Path,
    Query,
}

impl ParamLocation {
    /// Prefix used in error messages ("params/keyword", "querystring/q").
    fn prefix(self) -> &'static str {
        match self {
            ParamLocation::Path => "params",
            ParamLocation::Query => "querystring",
        }
    }
}

impl fmt::Display for ParamLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamLocation::Path => f.write_str("path"),
            ParamLocation::Query => f.write_str("query"),
        }
    }
}

/// Length constraint on a single request parameter.
///
/// A rule with `min_length > 0` makes the parameter required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRule {
    name: String,
    location: ParamLocation,
    min_length: usize,
    max_length: usize,
}

impl FieldRule {
    pub fn new(
        name: impl Into<String>,
        location: ParamLocation,
        min_length: usize,
        max_length: usize,
    ) -> Result<Self, RuleError> {
        let name = name.into();
        if min_length > max_length {
            return Err(RuleError::InvertedBounds {
                name,
                location,
                min: min_length,
                max: max_length,
            });
        }
        Ok(Self {
            name,
            location,
            min_length,
            max_length,
        })
    }

    pub fn path(name: impl Into<String>, min_length: usize, max_length: usize) -> Result<Self, RuleError> {
        Self::new(name, ParamLocation::Path, min_length, max_length)
    }

    pub fn query(name: impl Into<String>, min_length: usize, max_length: usize) -> Result<Self, RuleError> {
        Self::new(name, ParamLocation::Query, min_length, max_length)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> ParamLocation {
        self.location
    }

    pub fn min_length(&self) -> usize {
        self.min_length
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn required(&self) -> bool {
        self.min_length > 0
    }

    /// Check a single (possibly absent) value against this rule.
    fn check(&self, value: Option<&QueryValue>) -> Result<(), ValidationError> {
        let violation = match value {
            None if self.required() => Some(Violation::Missing),
            None => None,
            Some(QueryValue::Repeated(_)) => Some(Violation::Repeated),
            Some(QueryValue::Single(value)) => {
                let actual = value.chars().count();
                if actual < self.min_length {
                    Some(Violation::TooShort {
                        min: self.min_length,
                        actual,
                    })
                } else if actual > self.max_length {
                    Some(Violation::TooLong {
                        max: self.max_length,
                        actual,
                    })
                } else {
                    None
                }
            }
        };

        match violation {
            Some(violation) => Err(ValidationError {
                field: self.name.clone(),
                location: self.location,
                violation,
            }),
            None => Ok(()),
        }
    }
}

/// Immutable table of field rules for one route.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<FieldRule>,
}

impl RuleSet {
    /// Build a rule set, rejecting two rules for the same parameter.
    pub fn new(rules: Vec<FieldRule>) -> Result<Self, RuleError> {
        for (i, rule) in rules.iter().enumerate() {
            let duplicate = rules[..i]
                .iter()
                .any(|other| other.name == rule.name && other.location == rule.location);
            if duplicate {
                return Err(RuleError::Duplicate {
                    name: rule.name.clone(),
                    location: rule.location,
                });
            }
        }
        Ok(Self { rules })
    }

    /// Rules for the keyword echo route: a required 1-10 character `keyword`
    /// path segment and an optional `optionalParameter1` of at most 10.
    pub fn keyword_lookup() -> Self {
        Self {
            rules: vec![
                FieldRule {
                    name: KEYWORD_PARAM.to_string(),
                    location: ParamLocation::Path,
                    min_length: KEYWORD_MIN_LENGTH,
                    max_length: KEYWORD_MAX_LENGTH,
                },
                FieldRule {
                    name: OPTIONAL_QUERY_PARAM.to_string(),
                    location: ParamLocation::Query,
                    min_length: 0,
                    max_length: OPTIONAL_QUERY_MAX_LENGTH,
                },
            ],
        }
    }

    pub fn rules(&self) -> &[FieldRule] {
        &self.rules
    }

    /// Validate decoded path parameters and query pairs.
    ///
    /// Path rules are evaluated before query rules, each group in declaration
    /// order. Every parameter is echoed in the result, ruled or not.
    pub fn validate(
        &self,
        path: &HashMap<String, String>,
        query: &[(String, String)],
    ) -> Result<ValidatedParams, ValidationError> {
        let mut validated = ValidatedParams {
            params: path.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            query: BTreeMap::new(),
        };
        for (key, value) in query {
            match validated.query.get_mut(key) {
                Some(existing) => existing.push(value.clone()),
                None => {
                    validated
                        .query
                        .insert(key.clone(), QueryValue::Single(value.clone()));
                }
            }
        }

        for rule in self.rules.iter().filter(|r| r.location == ParamLocation::Path) {
            let segment = validated.params.get(&rule.name).cloned().unwrap_or_default();
            rule.check(Some(&QueryValue::Single(segment)))?;
        }
        for rule in self.rules.iter().filter(|r| r.location == ParamLocation::Query) {
            rule.check(validated.query.get(&rule.name))?;
        }

        Ok(validated)
    }
}

/// Value of one query key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum QueryValue {
    Single(String),
    /// The key appeared more than once; values in request order
    Repeated(Vec<String>),
}

impl QueryValue {
    fn push(&mut self, value: String) {
        match self {
            QueryValue::Single(first) => {
                *self = QueryValue::Repeated(vec![std::mem::take(first), value]);
            }
            QueryValue::Repeated(values) => values.push(value),
        }
    }

    pub fn as_single(&self) -> Option<&str> {
        match self {
            QueryValue::Single(value) => Some(value),
            QueryValue::Repeated(_) => None,
        }
    }
}

/// Parameters that passed validation, inserted into request extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidatedParams {
    #[serde(rename = "queryStringParameters")]
    pub query: BTreeMap<String, QueryValue>,
    pub params: BTreeMap<String, String>,
}

/// Which constraint a parameter violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    Missing,
    /// Query key given more than once
    Repeated,
    TooShort { min: usize, actual: usize },
    TooLong { max: usize, actual: usize },
}

/// A client-supplied parameter failed a presence or length constraint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", describe(.location, .field, .violation))]
pub struct ValidationError {
    pub field: String,
    pub location: ParamLocation,
    pub violation: Violation,
}

fn describe(location: &ParamLocation, field: &str, violation: &Violation) -> String {
    let prefix = location.prefix();
    match violation {
        Violation::Missing => format!("{} must have required property '{}'", prefix, field),
        Violation::Repeated => format!("{}/{} must be string", prefix, field),
        Violation::TooShort { min, .. } => {
            format!("{}/{} must NOT have fewer than {} characters", prefix, field, min)
        }
        Violation::TooLong { max, .. } => {
            format!("{}/{} must NOT have more than {} characters", prefix, field, max)
        }
    }
}

/// Rule table construction error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    #[error("{location} parameter '{name}': min length {min} exceeds max length {max}")]
    InvertedBounds {
        name: String,
        location: ParamLocation,
        min: usize,
        max: usize,
    },
    #[error("{location} parameter '{name}' has more than one rule")]
    Duplicate { name: String, location: ParamLocation },
}
