//! Named query parameters on top of DuckDB's positional `?` placeholders.
//!
//! A [`NamedQuery`] is built incrementally; every placeholder it emits is
//! recorded with the parameter name it stands for. Binding resolves the
//! names against [`NamedParams`] in placeholder order, so one logical
//! parameter may appear any number of times in the text.

use std::collections::BTreeMap;

use crate::backend::{BackendError, DbValue};

/// SQL text plus the parameter name behind each `?` placeholder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedQuery {
    sql: String,
    slots: Vec<String>,
}

impl NamedQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append literal SQL text. Must not contain `?`.
    pub fn push_sql(&mut self, sql: &str) -> &mut Self {
        debug_assert!(
            !sql.contains('?'),
            "placeholders must be added through push_param"
        );
        self.sql.push_str(sql);
        self
    }

    /// Append a placeholder bound to the parameter `name`.
    pub fn push_param(&mut self, name: &str) -> &mut Self {
        self.sql.push('?');
        self.slots.push(name.to_string());
        self
    }

    /// Append another query, keeping its placeholder order.
    pub fn push_query(&mut self, other: &NamedQuery) -> &mut Self {
        self.sql.push_str(&other.sql);
        self.slots.extend(other.slots.iter().cloned());
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Parameter names in placeholder order.
    pub fn slots(&self) -> &[String] {
        &self.slots
    }

    pub fn is_empty(&self) -> bool {
        self.sql.trim().is_empty()
    }

    /// Resolve every placeholder to a value, in order.
    pub fn bind(&self, params: &NamedParams) -> Result<Vec<DbValue>, BackendError> {
        self.slots
            .iter()
            .map(|name| {
                params.get(name).cloned().ok_or_else(|| {
                    BackendError::InvalidInput(format!("No value bound for parameter '{}'", name))
                })
            })
            .collect()
    }
}

/// Parameter values keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedParams {
    values: BTreeMap<String, DbValue>,
}

impl NamedParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<DbValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<DbValue>) {
        self.values.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&DbValue> {
        self.values.get(name)
    }
}
