//! Catalog gateway abstraction.
//!
//! A gateway executes statements against one server/database. Reads return
//! tabular [`Row`]s, writes return nothing on success. Every call is bounded by
//! the endpoint's timeouts and fails with a typed [`GatewayError`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use zeroize::Zeroize;

use crate::error::{GatewayError, Result};

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default per-statement timeout.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(120);

/// Default catalog database name.
pub const DEFAULT_DATABASE: &str = "SSISDB";

/// Where a gateway points and how long it waits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Server host name or address.
    pub server: String,
    /// Catalog database.
    pub database: String,
    /// Deadline for establishing a connection.
    pub connect_timeout: Duration,
    /// Deadline for each statement.
    pub query_timeout: Duration,
}

impl Endpoint {
    /// Endpoint with default database and timeouts.
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            database: DEFAULT_DATABASE.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    /// Override the database.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Override both timeouts.
    pub fn with_timeouts(mut self, connect: Duration, query: Duration) -> Self {
        self.connect_timeout = connect;
        self.query_timeout = query;
        self
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.server, self.database)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Statements
// ─────────────────────────────────────────────────────────────────────────────

/// Positional statement parameter, bound as `@P1`, `@P2`, ...
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlParam {
    Int(i64),
    Text(String),
}

/// A statement ready to send to a gateway.
///
/// The text and parameters are wiped when the statement is dropped, since a
/// statement may carry a decrypted sensitive value.
#[derive(Clone)]
pub struct Statement {
    label: &'static str,
    text: String,
    params: Vec<SqlParam>,
    sensitive: bool,
}

impl Statement {
    /// A statement with a stable label used in logs and by test gateways.
    pub fn new(label: &'static str, text: impl Into<String>) -> Self {
        Self {
            label,
            text: text.into(),
            params: Vec::new(),
            sensitive: false,
        }
    }

    /// Append a positional parameter.
    pub fn bind(mut self, param: SqlParam) -> Self {
        self.params.push(param);
        self
    }

    /// Mark the statement as carrying a sensitive value.
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }

    pub fn is_sensitive(&self) -> bool {
        self.sensitive
    }

    /// Integer parameter at `index`, if present.
    pub fn int_param(&self, index: usize) -> Option<i64> {
        match self.params.get(index) {
            Some(SqlParam::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Text parameter at `index`, if present.
    pub fn text_param(&self, index: usize) -> Option<&str> {
        match self.params.get(index) {
            Some(SqlParam::Text(v)) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Statement");
        s.field("label", &self.label);
        if self.sensitive {
            s.field("text", &"[REDACTED]");
        } else {
            s.field("text", &self.text).field("params", &self.params);
        }
        s.finish()
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        self.text.zeroize();
        for param in &mut self.params {
            if let SqlParam::Text(value) = param {
                value.zeroize();
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rows
// ─────────────────────────────────────────────────────────────────────────────

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

/// One result row with named columns.
#[derive(Debug, Clone)]
pub struct Row {
    label: &'static str,
    columns: Arc<[String]>,
    values: Vec<CatalogValue>,
}

impl Row {
    /// Build a row. `columns` and `values` must be the same length.
    pub fn new(label: &'static str, columns: Arc<[String]>, values: Vec<CatalogValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self {
            label,
            columns,
            values,
        }
    }

    fn index(&self, column: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .ok_or_else(|| self.column_error(column, "missing from result set"))
    }

    fn column_error(&self, column: &str, message: &str) -> GatewayError {
        GatewayError::Column {
            label: self.label.to_string(),
            column: column.to_string(),
            message: message.to_string(),
        }
    }

    /// Raw value of a column.
    pub fn value(&self, column: &str) -> Result<&CatalogValue> {
        let idx = self.index(column)?;
        Ok(&self.values[idx])
    }

    /// Value by position, for unnamed result columns.
    pub fn value_at(&self, index: usize) -> Option<&CatalogValue> {
        self.values.get(index)
    }

    /// Non-null integer column.
    pub fn get_i64(&self, column: &str) -> Result<i64> {
        match self.value(column)? {
            CatalogValue::Int(v) => Ok(*v),
            CatalogValue::Bool(b) => Ok(i64::from(*b)),
            CatalogValue::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| self.column_error(column, "not an integer")),
            CatalogValue::Null => Err(self.column_error(column, "unexpected NULL")),
            _ => Err(self.column_error(column, "not an integer")),
        }
    }

    /// Text column; NULL maps to `None`.
    pub fn get_opt_str(&self, column: &str) -> Result<Option<&str>> {
        match self.value(column)? {
            CatalogValue::Text(s) => Ok(Some(s)),
            CatalogValue::Null => Ok(None),
            _ => Err(self.column_error(column, "not text")),
        }
    }

    /// Non-null text column.
    pub fn get_str(&self, column: &str) -> Result<&str> {
        self.get_opt_str(column)?
            .ok_or_else(|| self.column_error(column, "unexpected NULL"))
    }

    /// Bit column. Integers are accepted as 0/1.
    pub fn get_bool(&self, column: &str) -> Result<bool> {
        match self.value(column)? {
            CatalogValue::Bool(b) => Ok(*b),
            CatalogValue::Int(v) => Ok(*v != 0),
            CatalogValue::Null => Err(self.column_error(column, "unexpected NULL")),
            _ => Err(self.column_error(column, "not a bit")),
        }
    }

    /// Binary column; NULL maps to `None`.
    pub fn get_opt_bytes(&self, column: &str) -> Result<Option<&[u8]>> {
        match self.value(column)? {
            CatalogValue::Bytes(b) => Ok(Some(b)),
            CatalogValue::Null => Ok(None),
            _ => Err(self.column_error(column, "not binary")),
        }
    }

    /// Move a text value out of the row, leaving NULL behind.
    pub fn take_str(&mut self, column: &str) -> Result<Option<String>> {
        let idx = self.index(column)?;
        match std::mem::replace(&mut self.values[idx], CatalogValue::Null) {
            CatalogValue::Text(s) => Ok(Some(s)),
            CatalogValue::Null => Ok(None),
            other => {
                self.values[idx] = other;
                Err(self.column_error(column, "not text"))
            }
        }
    }
}

/// Convenience for building rows by hand (in-memory gateway, tests).
pub fn row(label: &'static str, cells: Vec<(&str, CatalogValue)>) -> Row {
    let (columns, values): (Vec<String>, Vec<CatalogValue>) = cells
        .into_iter()
        .map(|(c, v)| (c.to_string(), v))
        .unzip();
    Row::new(label, columns.into(), values)
}

// ─────────────────────────────────────────────────────────────────────────────
// Gateway trait
// ─────────────────────────────────────────────────────────────────────────────

/// Executes statements against one catalog.
#[async_trait]
pub trait CatalogGateway: Send + Sync {
    /// Endpoint this gateway is bound to.
    fn endpoint(&self) -> &Endpoint;

    /// Run a read statement and return its first result set.
    async fn query(&self, statement: &Statement) -> Result<Vec<Row>>;

    /// Run a write statement, draining any results.
    async fn execute(&self, statement: &Statement) -> Result<()>;
}

/// Shared gateway handle.
pub type SharedGateway = Arc<dyn CatalogGateway>;
