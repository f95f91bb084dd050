/*!
# Option Data Downloads

Browser-based preview and CSV download of equity, option and volatility
data, built in Rust.

## Overview

Report pages take filters from the query string (ticker symbol, date range,
strike range, expiry, volatility type, moneyness), run a parameterised query
against the market-data schema and show the result either as an HTML preview
table or as a CSV attachment. A per-session download tracker throttles how
many CSV downloads a visitor may request per minute.

## Architecture

### Core Layer
- **Result Table** - Column-described, row-ordered query result with display
  names, display types, widths, value maps and fixed-point formats per column
- **Renderers** - HTML table and RFC-4180 CSV output, plus attachment headers
- **Download Tracker** - Sliding-window counter per session with a sticky
  account flag, kept in a session store
- **Query Execution** - A swappable executor trait with a SQLite
  implementation that only runs parameterised queries

### Web Layer (feature `web`)
- **Technologies**: Rust, axum, tokio
- Cookie-based sessions, report pages, throttled downloads

## Modules

- **session**: Session store trait and in-memory implementation
- **tracker**: Download rate limiting per session
- **query**: Raw values, queries, query execution
- **table**: The result table and its column metadata
- **downloader**: HTML and CSV rendering
- **reports**: Filter parsing and the option chain, issuer and volatility reports
- **config**: Server configuration
- **app**: Routing and handlers

## REST Endpoints

- `/options` - Option chain data for one equity, trading date and expiry
- `/issuer` - Daily issuer prices over a date range
- `/surface` - Historical or implied volatility over a date range

Each accepts `submit=Download` to receive the same data as CSV.
*/

pub mod config;
pub mod downloader;
pub mod query;
pub mod reports;
pub mod session;
pub mod table;
pub mod tracker;

#[cfg(feature = "web")]
pub mod app;

/// Re-export the everyday types so they are easy to reach
pub use config::{AppConfig, ConfigError};
pub use downloader::{
    BufferedResponse, ResponseSink, emit_download_headers, render_csv, render_html,
};
pub use query::{
    ColumnDescriptor, Query, QueryError, QueryExecutor, QueryOutcome, SqliteExecutor, Value,
};
pub use session::{MemorySessionStore, SessionStore};
pub use table::{ColumnMeta, ColumnType, ResultTable};
pub use tracker::{DownloadTracker, RateLimitState, TrackerState};
