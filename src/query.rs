use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, params_from_iter};
use std::fmt;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

/// A raw cell value as returned by query execution.
///
/// Values keep the type the database handed back; rendering turns them into
/// text only at the last moment so that value maps and format strings can
/// still look at the raw value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

impl Value {
    /// Numeric view of the value, used by fixed-point formatting.
    ///
    /// Text that parses as a number counts as numeric, since date and price
    /// columns often come back from the database as strings.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Null => None,
            Value::Int(i) => Some(*i as f64),
            Value::Real(r) => Some(*r),
            Value::Text(s) => s.trim().parse::<f64>().ok(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Declared type name of the value, as reported for inferred columns.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null | Value::Text(_) => "TEXT",
            Value::Int(_) => "INTEGER",
            Value::Real(_) => "REAL",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Int(i) => ToSqlOutput::from(*i),
            Value::Real(r) => ToSqlOutput::from(*r),
            Value::Text(s) => ToSqlOutput::from(s.as_str()),
        })
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Int(i),
            ValueRef::Real(r) => Value::Real(r),
            ValueRef::Text(t) | ValueRef::Blob(t) => {
                Value::Text(String::from_utf8_lossy(t).into_owned())
            }
        }
    }
}

/// Failures of query execution and of populating a result table.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{0}")]
    Execution(String),
    #[error("Database connection failed: {0}")]
    Connection(String),
    #[error("Row {row} has {found} values but the result has {expected} columns")]
    Shape {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("Result table was already populated")]
    AlreadyPopulated,
}

impl From<rusqlite::Error> for QueryError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Execution(value.to_string())
    }
}

/// Name and declared type of one result column.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub source_type: String,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, source_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_type: source_type.into(),
        }
    }
}

/// Columns and rows of a successful query, in the order the database
/// returned them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryOutcome {
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Vec<Value>>,
}

/// SQL text with positional parameters.
///
/// Filter values always travel as bound parameters; the SQL text itself is
/// fixed per report.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Query {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Something that can run a query and hand back a rectangular result.
pub trait QueryExecutor {
    fn execute(&self, query: &Query) -> Result<QueryOutcome, QueryError>;
}

/// Query execution against a SQLite database holding the market-data schema.
pub struct SqliteExecutor {
    conn: Mutex<Connection>,
}

impl SqliteExecutor {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, QueryError> {
        let conn =
            Connection::open(path).map_err(|e| QueryError::Connection(e.to_string()))?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self, QueryError> {
        let conn =
            Connection::open_in_memory().map_err(|e| QueryError::Connection(e.to_string()))?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Run one or more statements that produce no rows (schema, seed data).
    pub fn execute_batch(&self, sql: &str) -> Result<(), QueryError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| QueryError::Connection("Connection lock poisoned".to_string()))?;
        conn.execute_batch(sql)?;
        Ok(())
    }
}

impl QueryExecutor for SqliteExecutor {
    fn execute(&self, query: &Query) -> Result<QueryOutcome, QueryError> {
        log::debug!("executing query: {}", query.sql);

        let conn = self
            .conn
            .lock()
            .map_err(|_| QueryError::Connection("Connection lock poisoned".to_string()))?;
        let mut stmt = conn.prepare(&query.sql)?;
        let declared: Vec<(String, Option<String>)> = stmt
            .columns()
            .iter()
            .map(|c| (c.name().to_string(), c.decl_type().map(String::from)))
            .collect();

        let mut rows = Vec::new();
        let mut result = stmt.query(params_from_iter(query.params.iter()))?;
        while let Some(row) = result.next()? {
            let mut values = Vec::with_capacity(declared.len());
            for i in 0..declared.len() {
                values.push(Value::from(row.get_ref(i)?));
            }
            rows.push(values);
        }

        let columns = declared
            .into_iter()
            .enumerate()
            .map(|(i, (name, decl_type))| {
                let source_type = decl_type
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| infer_source_type(&rows, i).to_string());
                ColumnDescriptor::new(name, source_type)
            })
            .collect();

        Ok(QueryOutcome { columns, rows })
    }
}

// Expression columns have no declared type. The first non-null value
// decides; an all-null column reads as text.
fn infer_source_type(rows: &[Vec<Value>], col: usize) -> &'static str {
    rows.iter()
        .filter_map(|row| row.get(col))
        .find(|value| !value.is_null())
        .map_or("TEXT", Value::type_name)
}
