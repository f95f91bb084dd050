use crate::config::AppConfig;
use crate::query::{Query, QueryError, QueryExecutor, SqliteExecutor, Value};
use crate::table::{ColumnType, ResultTable};
use chrono::{Duration, NaiveDate};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;

lazy_static! {
    static ref TICKER_STRIP_REGEX: Regex = Regex::new(r"(?i)[^a-z0-9.$/ \-!]").unwrap();
    static ref DATE_ENTRY_REGEX: Regex = Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$").unwrap();
    static ref PARENTHESISED_REGEX: Regex = Regex::new(r" \W.*\W").unwrap();
}

/// Market-data schema the reports query
pub const SCHEMA: &str = include_str!("schema.sql");

/// Date format used for every date shown or downloaded
pub const DATE_YYYYMMDD: &str = "%Y-%m-%d";

/// Digits shown for volatility figures in previews
pub const VOLATILITY_DIGITS_SHOW: usize = 12;

/// Moneyness filters offered besides the normal 100%
pub const MONEYNESS_VALUES: [i64; 4] = [95, 90, 85, 80];

/// Create the market-data tables if they do not exist yet.
pub fn init_schema(executor: &SqliteExecutor) -> Result<(), QueryError> {
    executor.execute_batch(SCHEMA)
}

/// Whether a report is shown in the browser or downloaded as CSV
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Preview,
    Download,
}

impl OutputMode {
    pub fn row_limit(&self, config: &AppConfig) -> u32 {
        match self {
            OutputMode::Preview => config.max_preview_rows,
            OutputMode::Download => config.max_download_rows,
        }
    }
}

/// Query-string parameters shared by the report pages
///
/// Everything arrives as optional text; the filter constructors decide what
/// is usable and collect messages for what is not.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportParams {
    #[serde(rename = "eqID")]
    pub eq_id: Option<String>,
    pub ticker: Option<String>,
    pub current_date: Option<String>,
    pub exp_date: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub low_strike: Option<String>,
    pub high_strike: Option<String>,
    pub data_type: Option<String>,
    #[serde(default, rename = "volType", alias = "volType[]")]
    pub vol_types: Vec<String>,
    pub moneyness: Option<String>,
    pub submit: Option<String>,
}

impl ReportParams {
    pub fn wants_download(&self) -> bool {
        self.submit.as_deref() == Some("Download")
    }

    pub fn output_mode(&self) -> OutputMode {
        if self.wants_download() {
            OutputMode::Download
        } else {
            OutputMode::Preview
        }
    }

    pub fn eq_id(&self) -> Option<i64> {
        self.eq_id.as_deref().and_then(parse_int)
    }
}

fn parse_int(text: &str) -> Option<i64> {
    text.trim().parse().ok()
}

/// Remove anything that isn't alphanumeric, period, $, /, space, dash or
/// exclamation mark, and uppercase the rest.
pub fn sanitize_ticker(value: &str) -> String {
    TICKER_STRIP_REGEX.replace_all(value, "").to_uppercase()
}

/// Validate a submitted `YYYY-MM-DD` date.
///
/// Returns `default` when nothing was submitted. A malformed or impossible
/// date also returns `default` and adds a message to `errors`.
pub fn parse_date_entry(
    key: &str,
    submitted: Option<&str>,
    default: NaiveDate,
    errors: &mut Vec<String>,
) -> NaiveDate {
    let Some(value) = submitted else {
        return default;
    };

    if !DATE_ENTRY_REGEX.is_match(value) {
        errors.push(format!("The {} submitted must be in the format YYYY-mm-dd.", key));
        return default;
    }

    match NaiveDate::parse_from_str(value, DATE_YYYYMMDD) {
        Ok(date) => date,
        Err(_) => {
            errors.push(format!(
                "The {} you submitted, {}, is not a real date.",
                key, value
            ));
            default
        }
    }
}

/// Moneyness in percent; values outside 1..=100 fall back to 100.
pub fn parse_moneyness(submitted: Option<&str>) -> i64 {
    submitted
        .and_then(parse_int)
        .filter(|m| (1..=100).contains(m))
        .unwrap_or(100)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolatilityKind {
    Historical,
    Implied,
}

impl VolatilityKind {
    /// `dataType=1` selects implied volatility; anything else is historical.
    pub fn from_param(data_type: Option<&str>) -> Self {
        match data_type.and_then(parse_int) {
            Some(1) => VolatilityKind::Implied,
            _ => VolatilityKind::Historical,
        }
    }

    /// Keep the volatility types valid for this kind: adjusted historical
    /// types 14..=26, or implied terms -6..=-1 (months, negated).
    pub fn filter_vol_types(&self, submitted: &[String]) -> Vec<i64> {
        submitted
            .iter()
            .filter_map(|v| parse_int(v))
            .filter(|v| match self {
                VolatilityKind::Historical => (14..=26).contains(v),
                VolatilityKind::Implied => (-6..=-1).contains(v),
            })
            .collect()
    }
}

/// One equity matching a ticker search
#[derive(Debug, Clone, PartialEq)]
pub struct EquityMatch {
    pub ticker: String,
    pub eq_id: i64,
    pub issuer: String,
}

/// Equities whose ticker matches `ticker` (SQL `LIKE` pattern).
pub fn matching_equities<E: QueryExecutor + ?Sized>(
    executor: &E,
    ticker: &str,
) -> Result<Vec<EquityMatch>, QueryError> {
    let query = Query::new(
        "SELECT eqm.ticker, eqm.eqId, MAX(eqm.issuer) \
         FROM eqmaster eqm \
         WHERE eqm.ticker LIKE ? \
         GROUP BY eqm.ticker, eqm.eqId",
    )
    .bind(ticker);

    let outcome = executor.execute(&query)?;
    Ok(outcome
        .rows
        .into_iter()
        .filter_map(|row| match row.as_slice() {
            [ticker, Value::Int(eq_id), issuer] => Some(EquityMatch {
                ticker: ticker.to_string(),
                eq_id: *eq_id,
                issuer: issuer.to_string(),
            }),
            _ => None,
        })
        .collect())
}

/// Display names for the adjusted historical volatility types, keyed by
/// `volType`.
pub fn historical_volatility_names<E: QueryExecutor + ?Sized>(
    executor: &E,
) -> Result<BTreeMap<i64, String>, QueryError> {
    let query = Query::new(
        "SELECT volType, name, details FROM eqhvolmap WHERE volType > ? ORDER BY volType",
    )
    .bind(13i64);

    let outcome = executor.execute(&query)?;
    Ok(outcome
        .rows
        .iter()
        .filter_map(|row| match row.as_slice() {
            [Value::Int(id), _, details] => {
                Some((*id, historical_volatility_name(*id, &details.to_string())))
            }
            _ => None,
        })
        .collect())
}

/// Turn an `eqhvolmap.details` text such as
/// `"Textbook Hist volatility, 3m (63 days)"` into `"HV 3 months"`.
pub fn historical_volatility_name(vol_type: i64, details: &str) -> String {
    let term = details.split(',').nth(1).unwrap_or(details);

    // 1 month and 1 year read singular
    let term = if vol_type == 15 || vol_type == 22 {
        term.replace('m', " month").replace('y', " year")
    } else {
        term.replace('m', " months")
            .replace('w', " weeks")
            .replace('y', " years")
            .replace('d', " days")
    };

    let term = PARENTHESISED_REGEX.replace_all(&term, "");
    format!("HV {}", term.trim())
}

fn preview_labels(table: &mut ResultTable, mode: OutputMode, config: &AppConfig) {
    if mode == OutputMode::Preview {
        table.caption = Some("Preview".to_string());
        table.footer = Some(format!("Showing up to {} rows.", config.max_preview_rows));
    }
}

fn set_column_names(table: &mut ResultTable, names: &[&str]) {
    for (col, name) in names.iter().enumerate() {
        table.set_column_name(col, *name);
    }
}

/// Filters of the option chain report
#[derive(Debug, Clone, PartialEq)]
pub struct OptionChainFilters {
    pub eq_id: i64,
    pub current_date: NaiveDate,
    pub exp_date: NaiveDate,
    pub low_strike: i64,
    pub high_strike: i64,
}

impl OptionChainFilters {
    /// Build filters from request parameters. `None` until an equity has
    /// been chosen.
    pub fn from_params(
        params: &ReportParams,
        today: NaiveDate,
        errors: &mut Vec<String>,
    ) -> Option<Self> {
        let current_date =
            parse_date_entry("currentDate", params.current_date.as_deref(), today, errors);
        let exp_date = parse_date_entry(
            "expDate",
            params.exp_date.as_deref(),
            today + Duration::days(7),
            errors,
        );

        Some(Self {
            eq_id: params.eq_id()?,
            current_date,
            exp_date,
            low_strike: params.low_strike.as_deref().and_then(parse_int).unwrap_or(0),
            high_strike: params.high_strike.as_deref().and_then(parse_int).unwrap_or(1000),
        })
    }

    pub fn query(&self, limit: u32) -> Query {
        Query::new(
            "SELECT op.optId, oc.putCall, oc.strike, oc.expDate, oc.opraRoot, op.date_, \
               iv.ivBid, iv.ivAsk, iv.ivMid, iv.delta, iv.gamma, iv.theta, iv.vega, \
               iv.rho, op.volume, op.bid, op.ask, op.openInt, oc.corpAction \
             FROM optprice AS op LEFT JOIN optcontract AS oc ON oc.optId = op.optId \
               AND op.date_ BETWEEN oc.startDate AND oc.endDate \
             LEFT JOIN eqmaster AS eqm ON eqm.eqId = oc.eqId \
               AND op.date_ BETWEEN eqm.startDate AND eqm.endDate \
             LEFT JOIN ivlisted AS iv ON iv.optId = op.optId AND iv.date_ = op.date_ \
             WHERE eqm.eqId = ? \
               AND op.date_ = ? \
               AND oc.expDate = ? \
               AND oc.strike BETWEEN ? AND ? \
             LIMIT ?",
        )
        .bind(self.eq_id)
        .bind(self.current_date.format(DATE_YYYYMMDD).to_string())
        .bind(self.exp_date.format(DATE_YYYYMMDD).to_string())
        .bind(self.low_strike)
        .bind(self.high_strike)
        .bind(limit as i64)
    }
}

/// Option prices, greeks and quotes for one equity, trading date and expiry.
pub fn option_chain_table<E: QueryExecutor + ?Sized>(
    executor: &E,
    filters: &OptionChainFilters,
    mode: OutputMode,
    config: &AppConfig,
) -> ResultTable {
    let mut table = ResultTable::new();
    // A failed query is kept in the table and rendered as such
    let _ = table.execute_query(executor, &filters.query(mode.row_limit(config)));

    set_column_names(
        &mut table,
        &[
            "OptionID",
            "Put/Call",
            "Strike",
            "Exp. Date",
            "Opra Root",
            "Date",
            "IV Bid",
            "IV Ask",
            "IV Mid",
            "Delta",
            "Gamma",
            "Theta",
            "Vega",
            "Rho",
            "Volume",
            "Bid",
            "Ask",
            "Open Interest",
            "Corp. Action",
        ],
    );
    table.set_column_labels(1, [("P", "Put"), ("C", "Call")]);
    table.set_column_type(1, ColumnType::String);
    table.reformat_dates(3);
    table.reformat_dates(5);

    table.csv_filename = "optionchaindata.csv".to_string();
    preview_labels(&mut table, mode, config);
    table
}

/// Filters of the issuer price report
#[derive(Debug, Clone, PartialEq)]
pub struct IssuerFilters {
    pub eq_id: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl IssuerFilters {
    pub fn from_params(
        params: &ReportParams,
        today: NaiveDate,
        errors: &mut Vec<String>,
    ) -> Option<Self> {
        let start_date = parse_date_entry(
            "startDate",
            params.start_date.as_deref(),
            today - Duration::days(30),
            errors,
        );
        let end_date = parse_date_entry("endDate", params.end_date.as_deref(), today, errors);

        Some(Self {
            eq_id: params.eq_id()?,
            start_date,
            end_date,
        })
    }

    pub fn query(&self, limit: u32) -> Query {
        Query::new(
            "SELECT eqp.date_, eqm.ticker, eqm.eqId, eqm.issuer, eqp.open_, eqp.high, \
               eqp.low, eqp.close_, eqp.volume, eqp.bid, eqp.ask, eqp.totRtn \
             FROM eqprice eqp \
             LEFT JOIN eqmaster eqm ON eqp.eqId = eqm.eqId \
               AND eqp.date_ >= eqm.startDate AND eqp.date_ <= eqm.endDate \
             WHERE eqm.eqId = ? \
               AND eqp.date_ >= ? AND eqp.date_ <= ? \
             ORDER BY eqp.date_ \
             LIMIT ?",
        )
        .bind(self.eq_id)
        .bind(self.start_date.format(DATE_YYYYMMDD).to_string())
        .bind(self.end_date.format(DATE_YYYYMMDD).to_string())
        .bind(limit as i64)
    }
}

/// Daily prices of one issuer over a date range.
pub fn issuer_table<E: QueryExecutor + ?Sized>(
    executor: &E,
    filters: &IssuerFilters,
    mode: OutputMode,
    config: &AppConfig,
) -> ResultTable {
    let mut table = ResultTable::new();
    let _ = table.execute_query(executor, &filters.query(mode.row_limit(config)));

    set_column_names(
        &mut table,
        &[
            "Pricing Date",
            "Ticker",
            "ID",
            "Issuer Name",
            "Open",
            "High",
            "Low",
            "Closing Price",
            "Volume",
            "Bid",
            "Ask",
            "Total Return",
        ],
    );
    table.reformat_dates(0);
    table.set_column_width(3, "15%");

    table.csv_filename = "issuerdata.csv".to_string();
    preview_labels(&mut table, mode, config);
    table
}

/// Filters of the volatility surface report
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceFilters {
    pub kind: VolatilityKind,
    pub ticker: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub vol_types: Vec<i64>,
    pub moneyness: i64,
}

impl SurfaceFilters {
    pub fn from_params(params: &ReportParams, today: NaiveDate, errors: &mut Vec<String>) -> Self {
        let kind = VolatilityKind::from_param(params.data_type.as_deref());
        let ticker = params
            .ticker
            .as_deref()
            .map(sanitize_ticker)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "SPY".to_string());

        Self {
            kind,
            ticker,
            start_date: parse_date_entry(
                "startDate",
                params.start_date.as_deref(),
                today - Duration::days(30),
                errors,
            ),
            end_date: parse_date_entry("endDate", params.end_date.as_deref(), today, errors),
            vol_types: kind.filter_vol_types(&params.vol_types),
            moneyness: parse_moneyness(params.moneyness.as_deref()),
        }
    }

    pub fn query(&self, limit: u32) -> Query {
        let placeholders = vec!["?"; self.vol_types.len()].join(", ");

        let mut query = match self.kind {
            VolatilityKind::Historical => Query::new(format!(
                "SELECT eqm.ticker, hvol.volType, eqp.close_, hvol.vol, eqp.date_ AS eqp_date \
                 FROM eqprice AS eqp LEFT JOIN eqmaster AS eqm ON eqm.eqId = eqp.eqId \
                   AND eqp.date_ BETWEEN eqm.startDate AND eqm.endDate \
                 JOIN eqhvol AS hvol ON hvol.eqId = eqp.eqId \
                   AND hvol.volType IN ({}) \
                   AND hvol.date_ = eqp.date_ \
                 WHERE eqm.ticker LIKE ? AND eqp.date_ >= ? AND eqp.date_ <= ? \
                 ORDER BY eqp.date_, hvol.volType \
                 LIMIT ?",
                placeholders
            )),
            VolatilityKind::Implied => Query::new(format!(
                "SELECT eqm.ticker, ivc.expiry, ivc.strike, ivc.ivMid, ivc.date_ AS iv_date \
                 FROM ivcmpr AS ivc LEFT JOIN eqmaster AS eqm ON eqm.eqId = ivc.eqId \
                   AND ivc.date_ BETWEEN eqm.startDate AND eqm.endDate \
                 WHERE ivc.expiry IN ({}) \
                   AND ivc.strike = ? \
                   AND eqm.ticker LIKE ? AND ivc.date_ >= ? AND ivc.date_ <= ? \
                 ORDER BY ivc.date_, ivc.expiry \
                 LIMIT ?",
                placeholders
            )),
        };

        for vol_type in &self.vol_types {
            // Implied terms arrive negated; the table stores months
            query = query.bind(vol_type.abs());
        }
        if self.kind == VolatilityKind::Implied {
            query = query.bind(self.moneyness);
        }
        query
            .bind(self.ticker.clone())
            .bind(self.start_date.format(DATE_YYYYMMDD).to_string())
            .bind(self.end_date.format(DATE_YYYYMMDD).to_string())
            .bind(limit as i64)
    }
}

/// Historical or implied volatility for one ticker over a date range.
///
/// Returns `None` when no volatility type was selected, in which case the
/// page shows no table at all.
pub fn surface_table<E: QueryExecutor + ?Sized>(
    executor: &E,
    filters: &SurfaceFilters,
    mode: OutputMode,
    config: &AppConfig,
) -> Option<ResultTable> {
    if filters.vol_types.is_empty() {
        return None;
    }

    let mut table = ResultTable::new();
    let _ = table.execute_query(executor, &filters.query(mode.row_limit(config)));

    match filters.kind {
        VolatilityKind::Historical => {
            set_column_names(
                &mut table,
                &[
                    "Ticker",
                    "Indicator",
                    "Closing Price",
                    "Realized Volatility",
                    "Pricing Date",
                ],
            );
            match historical_volatility_names(executor) {
                Ok(names) => {
                    table.set_column_labels(1, names);
                }
                Err(e) => log::error!("failed to load volatility names: {}", e),
            }
            table.set_column_width(1, "20%");
        }
        VolatilityKind::Implied => {
            set_column_names(
                &mut table,
                &[
                    "Ticker",
                    "Term",
                    "Moneyness",
                    "Implied Volatility",
                    "Pricing Date",
                ],
            );
            let terms = (1..=6).map(|m| match m {
                1 => (m, "1 month".to_string()),
                _ => (m, format!("{} months", m)),
            });
            table.set_column_labels(1, terms);
        }
    }
    table.set_column_type(1, ColumnType::String);
    table.set_column_format(3, format!("%.{}f", VOLATILITY_DIGITS_SHOW));
    table.reformat_dates(4);

    table.csv_filename = "surfacedata.csv".to_string();
    preview_labels(&mut table, mode, config);
    Some(table)
}
