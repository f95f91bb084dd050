use crate::query::{ColumnDescriptor, Query, QueryError, QueryExecutor, QueryOutcome, Value};
use chrono::{NaiveDate, NaiveDateTime};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

lazy_static! {
    static ref FIXED_POINT_REGEX: Regex = Regex::new(r"^%0?(?:\.([0-9]+))?f$").unwrap();
}

/// Filename suggested to the browser when none is set
pub const DEFAULT_CSV_FILENAME: &str = "results.csv";

/// Largest digit count a fixed-point format may ask for
pub const MAX_FIXED_POINT_DIGITS: usize = 32;

/// Display classification of a column, also used as the cell's CSS class
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Int,
    Real,
}

impl ColumnType {
    /// Map a declared database type onto a display type.
    pub fn from_source_type(source_type: &str) -> Self {
        let upper = source_type.to_uppercase();
        if upper.contains("INT") {
            ColumnType::Int
        } else if ["REAL", "FLOA", "DOUB", "DEC", "NUMERIC"]
            .iter()
            .any(|t| upper.contains(t))
        {
            ColumnType::Real
        } else {
            ColumnType::String
        }
    }

    pub fn css_class(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Int => "int",
            ColumnType::Real => "real",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.css_class())
    }
}

impl FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "string" => Ok(ColumnType::String),
            "int" | "integer" => Ok(ColumnType::Int),
            "real" => Ok(ColumnType::Real),
            other => Err(format!("Unknown column type: {}", other)),
        }
    }
}

/// Presentation settings for one result column
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnMeta {
    /// Stable identifier; setters address columns by this index.
    pub index: usize,
    pub source_name: String,
    pub display_name: String,
    pub column_type: ColumnType,
    /// Goes into the header's `width` attribute, e.g. "10%" or "200px".
    pub width: Option<String>,
    pub value_map: Option<HashMap<String, String>>,
    pub format: Option<String>,
}

impl ColumnMeta {
    fn from_descriptor(index: usize, descriptor: ColumnDescriptor) -> Self {
        Self {
            index,
            display_name: descriptor.name.clone(),
            column_type: ColumnType::from_source_type(&descriptor.source_type),
            source_name: descriptor.name,
            width: None,
            value_map: None,
            format: None,
        }
    }

    /// Replacement label for `raw` from the value map, if there is one.
    pub fn substitute(&self, raw: &Value) -> Option<&str> {
        self.value_map
            .as_ref()
            .and_then(|map| map.get(&raw.to_string()))
            .map(String::as_str)
    }

    /// Cell text for HTML: value map first, then the format string, then the
    /// raw value.
    pub fn html_text(&self, raw: &Value) -> String {
        if let Some(label) = self.substitute(raw) {
            return label.to_string();
        }
        let formatted = self
            .format
            .as_deref()
            .and_then(fixed_point_digits)
            .and_then(|digits| raw.as_f64().map(|n| format!("{:.*}", digits, n)));

        formatted.unwrap_or_else(|| raw.to_string())
    }

    /// Cell text for CSV. Format strings do not apply here.
    pub fn csv_text(&self, raw: &Value) -> String {
        match self.substitute(raw) {
            Some(label) => label.to_string(),
            None => raw.to_string(),
        }
    }
}

/// Digit count of a fixed-point format such as `%.2f` or `%0.12f`.
///
/// A bare `%f` means six digits. More than [`MAX_FIXED_POINT_DIGITS`]
/// digits, or anything else, is not a format this table knows how to apply.
pub fn fixed_point_digits(format: &str) -> Option<usize> {
    let caps = FIXED_POINT_REGEX.captures(format.trim())?;
    let digits = match caps.get(1) {
        Some(digits) => digits.as_str().parse().ok()?,
        None => 6,
    };
    (digits <= MAX_FIXED_POINT_DIGITS).then_some(digits)
}

/// A query result held in memory with per-column presentation settings
///
/// The table is filled once, from a query or from explicit columns and rows.
/// After that only metadata and individual cell values change. Rendering
/// lives in [`crate::downloader`].
#[derive(Clone, Debug)]
pub struct ResultTable {
    columns: Vec<ColumnMeta>,
    rows: Vec<Vec<Value>>,
    populated: bool,
    error_message: Option<String>,
    show_row_numbers: bool,
    /// SQL text of the executed query, kept for debugging output.
    pub query_string: Option<String>,
    /// Printed inside the caption tag. `None` leaves the caption out.
    pub caption: Option<String>,
    /// Printed in the table footer. `None` leaves the footer out.
    pub footer: Option<String>,
    pub csv_filename: String,
}

impl Default for ResultTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultTable {
    pub fn new() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            populated: false,
            error_message: None,
            show_row_numbers: true,
            query_string: None,
            caption: None,
            footer: None,
            csv_filename: DEFAULT_CSV_FILENAME.to_string(),
        }
    }

    /// Fill the table from column descriptors and rows.
    ///
    /// Every row must have one value per column. On a shape mismatch the
    /// table keeps no rows and remembers the error for rendering. A table
    /// can only be populated once.
    pub fn populate(
        &mut self,
        columns: Vec<ColumnDescriptor>,
        rows: Vec<Vec<Value>>,
    ) -> Result<(), QueryError> {
        if self.populated {
            return Err(QueryError::AlreadyPopulated);
        }
        self.populated = true;

        if let Some((row, found)) = rows
            .iter()
            .enumerate()
            .map(|(i, r)| (i, r.len()))
            .find(|(_, len)| *len != columns.len())
        {
            let err = QueryError::Shape {
                row,
                expected: columns.len(),
                found,
            };
            self.error_message = Some(err.to_string());
            return Err(err);
        }

        self.columns = columns
            .into_iter()
            .enumerate()
            .map(|(i, descriptor)| ColumnMeta::from_descriptor(i, descriptor))
            .collect();
        self.rows = rows;
        Ok(())
    }

    /// Fill the table from the outcome of a query, storing the error message
    /// when the query failed.
    pub fn populate_from(
        &mut self,
        result: Result<QueryOutcome, QueryError>,
    ) -> Result<(), QueryError> {
        if self.populated {
            return Err(QueryError::AlreadyPopulated);
        }
        match result {
            Ok(outcome) => self.populate(outcome.columns, outcome.rows),
            Err(err) => {
                log::error!("query failed: {}", err);
                self.populated = true;
                self.error_message = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Run `query` on `executor` and populate the table with the result.
    pub fn execute_query<E: QueryExecutor + ?Sized>(
        &mut self,
        executor: &E,
        query: &Query,
    ) -> Result<(), QueryError> {
        if self.populated {
            return Err(QueryError::AlreadyPopulated);
        }
        self.query_string = Some(query.sql.clone());
        self.populate_from(executor.execute(query))
    }

    /// True once populated without an error.
    pub fn is_valid(&self) -> bool {
        self.populated && self.error_message.is_none()
    }

    pub fn is_populated(&self) -> bool {
        self.populated
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> Option<&ColumnMeta> {
        self.columns.get(index)
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Display name of a column.
    pub fn column_name(&self, index: usize) -> Option<&str> {
        self.column(index).map(|c| c.display_name.as_str())
    }

    pub fn set_column_name(&mut self, index: usize, name: impl Into<String>) -> bool {
        match self.columns.get_mut(index) {
            Some(column) => {
                column.display_name = name.into();
                true
            }
            None => false,
        }
    }

    pub fn set_column_type(&mut self, index: usize, column_type: ColumnType) -> bool {
        match self.columns.get_mut(index) {
            Some(column) => {
                column.column_type = column_type;
                true
            }
            None => false,
        }
    }

    pub fn set_column_width(&mut self, index: usize, width: impl Into<String>) -> bool {
        match self.columns.get_mut(index) {
            Some(column) => {
                column.width = Some(width.into());
                true
            }
            None => false,
        }
    }

    /// Set a value map from a JSON object whose keys are raw cell values and
    /// whose values are the labels to print instead.
    ///
    /// Returns false, leaving any previous map in place, if the index is out
    /// of bounds or `map` is not an object.
    pub fn set_column_value_map(&mut self, index: usize, map: &JsonValue) -> bool {
        let Some(object) = map.as_object() else {
            return false;
        };
        let labels = object.iter().map(|(key, label)| {
            let label = match label {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), label)
        });
        self.set_column_labels(index, labels)
    }

    /// Typed variant of [`set_column_value_map`](Self::set_column_value_map).
    pub fn set_column_labels<K, V, I>(&mut self, index: usize, labels: I) -> bool
    where
        K: ToString,
        V: ToString,
        I: IntoIterator<Item = (K, V)>,
    {
        match self.columns.get_mut(index) {
            Some(column) => {
                let map = labels
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect();
                column.value_map = Some(map);
                true
            }
            None => false,
        }
    }

    /// Set a fixed-point format (e.g. `%.12f`) applied when rendering HTML.
    pub fn set_column_format(&mut self, index: usize, format: impl Into<String>) -> bool {
        match self.columns.get_mut(index) {
            Some(column) => {
                column.format = Some(format.into());
                true
            }
            None => false,
        }
    }

    pub fn get_cell(&self, row: usize, col: usize) -> Option<&Value> {
        self.rows.get(row).and_then(|r| r.get(col))
    }

    pub fn set_cell(&mut self, row: usize, col: usize, value: impl Into<Value>) -> bool {
        match self.rows.get_mut(row).and_then(|r| r.get_mut(col)) {
            Some(cell) => {
                *cell = value.into();
                true
            }
            None => false,
        }
    }

    /// Rewrite every date or datetime in a column as `YYYY-MM-DD`.
    ///
    /// Cells that do not parse as a date are left alone. Returns false for an
    /// unknown column.
    pub fn reformat_dates(&mut self, col: usize) -> bool {
        if col >= self.column_count() {
            return false;
        }
        for row in 0..self.row_count() {
            let formatted = self
                .get_cell(row, col)
                .and_then(|value| parse_date(&value.to_string()))
                .map(|date| date.format("%Y-%m-%d").to_string());
            if let Some(text) = formatted {
                self.set_cell(row, col, text);
            }
        }
        true
    }

    /// Set the flag to show or hide the column containing row numbers.
    pub fn show_row_numbers(&mut self, show: bool) {
        self.show_row_numbers = show;
    }

    pub fn shows_row_numbers(&self) -> bool {
        self.show_row_numbers
    }
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
}
