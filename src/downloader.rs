use crate::table::ResultTable;
use csv::{QuoteStyle, Terminator, WriterBuilder};

/// Charset announced with CSV downloads
pub const CSV_CHARSET: &str = "utf-8";
pub const CSV_DELIMITER: u8 = b',';
pub const CSV_ENCLOSURE: u8 = b'"';

/// Body written instead of CSV records when the table holds no valid result
pub const CSV_SERVER_ERROR: &str = "Server Error";

/// Where rendered output goes: response headers plus a text body
pub trait ResponseSink {
    fn set_header(&mut self, name: &str, value: &str);
    fn write_str(&mut self, text: &str);
}

/// A response collected in memory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferedResponse {
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl BufferedResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of the last header set under `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl ResponseSink for BufferedResponse {
    fn set_header(&mut self, name: &str, value: &str) {
        // Replace rather than append, like a header() call with replace=true
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
    }

    fn write_str(&mut self, text: &str) {
        self.body.push_str(text);
    }
}

/// Mark the response as a CSV attachment
///
/// Sets the content type (with charset) and a content disposition that
/// makes the browser offer `filename` as the name to save under.
pub fn emit_download_headers<S: ResponseSink + ?Sized>(sink: &mut S, filename: &str) {
    sink.set_header(
        "Content-Type",
        &format!("text/csv; charset={}", CSV_CHARSET),
    );
    sink.set_header(
        "Content-Disposition",
        &format!("attachment; filename=\"{}\"", filename.replace('"', "")),
    );
}

/// Render a result table as CSV
///
/// The first record holds the column display names, followed by one record
/// per row. Value maps are applied; format strings are not. Fields are
/// quoted only when they contain the delimiter, a quote or a line break,
/// with embedded quotes doubled.
///
/// A table without a valid result produces the plain `Server Error` marker
/// and nothing else.
///
/// # Examples
/// ```
/// use option_downloads::downloader::{BufferedResponse, render_csv};
/// use option_downloads::query::{ColumnDescriptor, Value};
/// use option_downloads::table::ResultTable;
///
/// let mut table = ResultTable::new();
/// table
///     .populate(vec![ColumnDescriptor::new("id", "INTEGER")], vec![vec![Value::Int(1)]])
///     .unwrap();
/// let mut out = BufferedResponse::new();
/// render_csv(&table, &mut out);
/// assert_eq!(out.body, "id\n1\n");
/// ```
pub fn render_csv<S: ResponseSink + ?Sized>(table: &ResultTable, sink: &mut S) {
    if !table.is_valid() {
        sink.write_str(CSV_SERVER_ERROR);
        return;
    }

    match csv_records(table) {
        Ok(text) => sink.write_str(&text),
        Err(e) => {
            log::error!("failed to write CSV records: {}", e);
            sink.write_str(CSV_SERVER_ERROR);
        }
    }
}

fn csv_records(table: &ResultTable) -> Result<String, Box<dyn std::error::Error>> {
    let mut writer = WriterBuilder::new()
        .delimiter(CSV_DELIMITER)
        .quote(CSV_ENCLOSURE)
        .quote_style(QuoteStyle::Necessary)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    writer.write_record(table.columns().iter().map(|c| c.display_name.as_str()))?;

    for row in table.rows() {
        let record: Vec<String> = table
            .columns()
            .iter()
            .zip(row)
            .map(|(column, value)| column.csv_text(value))
            .collect();
        writer.write_record(&record)?;
    }

    let bytes = writer.into_inner().map_err(|e| e.to_string())?;
    Ok(String::from_utf8(bytes)?)
}

/// Render a result table as an HTML table
///
/// Emits the optional caption, a header row (with a blank leading cell when
/// row numbers are shown), the optional footer spanning every column, and
/// one body row per result row. Each cell carries its column type as CSS
/// class. When the table has no valid result a single error paragraph is
/// written instead.
pub fn render_html<S: ResponseSink + ?Sized>(table: &ResultTable, sink: &mut S) {
    if !table.is_valid() {
        sink.write_str(&format!(
            "<p class=\"resultSet\">{}</p>\n",
            escape_html(table.error_message().unwrap_or(""))
        ));
        return;
    }

    let mut html = String::from("<table class=\"resultSet\">\n");

    if let Some(caption) = &table.caption {
        html.push_str(&format!(" <caption>{}</caption>\n", escape_html(caption)));
    }

    html.push_str(" <thead><tr>\n");
    if table.shows_row_numbers() {
        html.push_str("  <th>&nbsp;</th>\n");
    }
    for column in table.columns() {
        html.push_str("  <th");
        if let Some(width) = &column.width {
            html.push_str(&format!(" width=\"{}\"", escape_html(width)));
        }
        html.push_str(&format!(">{}</th>\n", escape_html(&column.display_name)));
    }
    html.push_str(" </tr></thead>\n");

    if let Some(footer) = &table.footer {
        let mut span = table.column_count();
        if table.shows_row_numbers() {
            span += 1;
        }
        html.push_str(&format!(
            " <tfoot><tr><td colspan=\"{}\">{}</td></tr></tfoot>\n",
            span,
            escape_html(footer)
        ));
    }

    html.push_str(" <tbody>\n");
    for (i, row) in table.rows().iter().enumerate() {
        html.push_str("  <tr>\n");
        if table.shows_row_numbers() {
            html.push_str(&format!("   <td class=\"rowNo\">{}</td>\n", i + 1));
        }
        for (column, value) in table.columns().iter().zip(row) {
            html.push_str(&format!(
                "   <td class=\"{}\">{}</td>\n",
                column.column_type.css_class(),
                escape_html(&column.html_text(value))
            ));
        }
        html.push_str("  </tr>\n");
    }
    html.push_str("</tbody></table>\n");

    sink.write_str(&html);
}

/// Shorthand: render the table as HTML into a string.
pub fn to_html(table: &ResultTable) -> String {
    let mut out = BufferedResponse::new();
    render_html(table, &mut out);
    out.body
}

/// Shorthand: render the table as CSV into a string.
pub fn to_csv(table: &ResultTable) -> String {
    let mut out = BufferedResponse::new();
    render_csv(table, &mut out);
    out.body
}

/// Escape text for use in HTML element content and attribute values.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
