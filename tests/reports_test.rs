use chrono::NaiveDate;
use option_downloads::config::AppConfig;
use option_downloads::downloader::{to_csv, to_html};
use option_downloads::query::{SqliteExecutor, Value};
use option_downloads::reports::{
    self, IssuerFilters, OptionChainFilters, OutputMode, ReportParams, SurfaceFilters,
    VolatilityKind,
};
use serde_json::json;

fn date(text: &str) -> NaiveDate {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").unwrap()
}

fn seeded_database() -> SqliteExecutor {
    let executor = SqliteExecutor::open_in_memory().unwrap();
    reports::init_schema(&executor).unwrap();
    executor
        .execute_batch(
            "INSERT INTO eqmaster VALUES (1, 'SPY', 'SPDR S&P 500 ETF', '2000-01-01', '2099-12-31');
             INSERT INTO eqmaster VALUES (2, 'SPYG', 'SPDR Portfolio Growth', '2000-01-01', '2099-12-31');
             INSERT INTO eqprice VALUES (1, '2024-01-02', 470.1, 472.0, 468.5, 471.25, 1000, 471.2, 471.3, 0.01);
             INSERT INTO eqprice VALUES (1, '2024-01-03', 471.0, 473.5, 469.0, 470.5, 1200, 470.4, 470.6, -0.002);
             INSERT INTO eqprice VALUES (1, '2023-12-01', 450.0, 451.0, 449.0, 450.5, 900, 450.4, 450.6, 0.0);
             INSERT INTO optcontract VALUES (100, 1, 'P', 460.0, '2024-01-19', 'SPY', '2000-01-01', '2099-12-31', NULL);
             INSERT INTO optcontract VALUES (101, 1, 'C', 480.0, '2024-01-19', 'SPY', '2000-01-01', '2099-12-31', NULL);
             INSERT INTO optcontract VALUES (102, 1, 'C', 1500.0, '2024-01-19', 'SPY', '2000-01-01', '2099-12-31', NULL);
             INSERT INTO optprice VALUES (100, '2024-01-05', 10, 1.5, 1.6, 300);
             INSERT INTO optprice VALUES (101, '2024-01-05', 20, 2.5, 2.6, 400);
             INSERT INTO optprice VALUES (102, '2024-01-05', 1, 0.01, 0.02, 5);
             INSERT INTO ivlisted VALUES (100, '2024-01-05', 0.18, 0.2, 0.19, -0.3, 0.01, -0.05, 0.2, -0.1);
             INSERT INTO eqhvolmap VALUES (13, 'raw', 'Raw volatility, 1m (21 days)');
             INSERT INTO eqhvolmap VALUES (15, 'HV1m', 'Textbook Hist volatility, 1m (21 days)');
             INSERT INTO eqhvolmap VALUES (16, 'HV3m', 'Textbook Hist volatility, 3m (63 days)');
             INSERT INTO eqhvol VALUES (1, '2024-01-02', 16, 0.123456789);
             INSERT INTO eqhvol VALUES (1, '2024-01-03', 16, 0.125);
             INSERT INTO ivcmpr VALUES (1, '2024-01-02', 3, 100, 0.2);
             INSERT INTO ivcmpr VALUES (1, '2024-01-02', 3, 90, 0.25);",
        )
        .unwrap();
    executor
}

fn params(value: serde_json::Value) -> ReportParams {
    serde_json::from_value(value).unwrap()
}

#[test]
fn ticker_input_is_sanitized() {
    assert_eq!(reports::sanitize_ticker("spy"), "SPY");
    assert_eq!(reports::sanitize_ticker("brk.b"), "BRK.B");
    assert_eq!(reports::sanitize_ticker("x';drop table--"), "XDROP TABLE--");
    assert_eq!(reports::sanitize_ticker("<script>"), "SCRIPT");
}

#[test]
fn date_entries_are_validated() {
    println!("Test 1: date parsing");
    let default = date("2024-02-01");
    let mut errors = Vec::new();

    assert_eq!(reports::parse_date_entry("endDate", None, default, &mut errors), default);
    assert_eq!(
        reports::parse_date_entry("endDate", Some("2024-01-15"), default, &mut errors),
        date("2024-01-15")
    );
    assert!(errors.is_empty());

    reports::parse_date_entry("endDate", Some("01/15/2024"), default, &mut errors);
    reports::parse_date_entry("startDate", Some("2024-02-30"), default, &mut errors);
    assert_eq!(
        errors,
        vec![
            "The endDate submitted must be in the format YYYY-mm-dd.".to_string(),
            "The startDate you submitted, 2024-02-30, is not a real date.".to_string(),
        ]
    );
    println!("Malformed and impossible dates reported - PASS\n");
}

#[test]
fn moneyness_and_vol_types_are_range_checked() {
    assert_eq!(reports::parse_moneyness(Some("90")), 90);
    assert_eq!(reports::parse_moneyness(Some("250")), 100);
    assert_eq!(reports::parse_moneyness(Some("abc")), 100);
    assert_eq!(reports::parse_moneyness(None), 100);

    let submitted: Vec<String> = ["13", "14", "26", "27", "-1", "-6", "-7", "x"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(VolatilityKind::Historical.filter_vol_types(&submitted), vec![14, 26]);
    assert_eq!(VolatilityKind::Implied.filter_vol_types(&submitted), vec![-1, -6]);

    assert_eq!(VolatilityKind::from_param(Some("1")), VolatilityKind::Implied);
    assert_eq!(VolatilityKind::from_param(Some("0")), VolatilityKind::Historical);
    assert_eq!(VolatilityKind::from_param(None), VolatilityKind::Historical);
}

#[test]
fn params_deserialize_from_query_names() {
    let p = params(json!({
        "eqID": "1",
        "startDate": "2024-01-01",
        "volType": ["16", "17"],
        "submit": "Download"
    }));
    assert_eq!(p.eq_id(), Some(1));
    assert_eq!(p.start_date.as_deref(), Some("2024-01-01"));
    assert_eq!(p.vol_types, vec!["16", "17"]);
    assert!(p.wants_download());
    assert_eq!(p.output_mode(), OutputMode::Download);

    let p = params(json!({"volType[]": ["16"], "eqID": "2"}));
    assert_eq!(p.vol_types, vec!["16"]);
    assert_eq!(p.eq_id(), Some(2));

    let p = params(json!({"submit": "Preview"}));
    assert_eq!(p.output_mode(), OutputMode::Preview);
    assert!(p.vol_types.is_empty());
}

#[test]
fn historical_volatility_names_read_well() {
    assert_eq!(
        reports::historical_volatility_name(16, "Textbook Hist volatility, 3m (63 days)"),
        "HV 3 months"
    );
    assert_eq!(
        reports::historical_volatility_name(15, "Textbook Hist volatility, 1m (21 days)"),
        "HV 1 month"
    );
    assert_eq!(
        reports::historical_volatility_name(22, "Textbook Hist volatility, 1y (252 days)"),
        "HV 1 year"
    );
    assert_eq!(
        reports::historical_volatility_name(14, "Textbook Hist volatility, 10d (10 days)"),
        "HV 10 days"
    );

    let executor = seeded_database();
    let names = reports::historical_volatility_names(&executor).unwrap();
    assert_eq!(names.len(), 2);
    assert_eq!(names.get(&16).map(String::as_str), Some("HV 3 months"));
    assert!(!names.contains_key(&13));
}

#[test]
fn ticker_lookup_matches_like_patterns() {
    let executor = seeded_database();

    let exact = reports::matching_equities(&executor, "SPY").unwrap();
    assert_eq!(exact.len(), 1);
    assert_eq!(exact[0].eq_id, 1);
    assert_eq!(exact[0].issuer, "SPDR S&P 500 ETF");

    let prefix = reports::matching_equities(&executor, "SPY%").unwrap();
    assert_eq!(prefix.len(), 2);

    assert!(reports::matching_equities(&executor, "QQQ").unwrap().is_empty());
}

#[test]
fn issuer_report_preview() {
    println!("Test 2: issuer report");
    let executor = seeded_database();
    let config = AppConfig::default();
    let mut errors = Vec::new();
    let filters = IssuerFilters::from_params(
        &params(json!({"eqID": "1", "startDate": "2024-01-01", "endDate": "2024-01-31"})),
        date("2024-02-01"),
        &mut errors,
    )
    .unwrap();
    assert!(errors.is_empty());

    let table = reports::issuer_table(&executor, &filters, OutputMode::Preview, &config);
    assert!(table.is_valid(), "{:?}", table.error_message());
    assert_eq!(table.row_count(), 2);
    assert_eq!(table.column_count(), 12);
    assert_eq!(table.column_name(0), Some("Pricing Date"));
    assert_eq!(table.column_name(11), Some("Total Return"));
    assert_eq!(table.get_cell(0, 0), Some(&Value::from("2024-01-02")));
    assert_eq!(table.csv_filename, "issuerdata.csv");
    assert_eq!(table.caption.as_deref(), Some("Preview"));
    assert_eq!(table.footer.as_deref(), Some("Showing up to 100 rows."));

    let html = to_html(&table);
    assert!(html.contains("<th width=\"15%\">Issuer Name</th>"));
    assert!(html.contains("SPDR S&amp;P 500 ETF"));
    println!("Two rows in January - PASS\n");
}

#[test]
fn issuer_filters_need_an_equity() {
    let mut errors = Vec::new();
    let filters = IssuerFilters::from_params(
        &params(json!({"ticker": "SPY"})),
        date("2024-02-01"),
        &mut errors,
    );
    assert!(filters.is_none());
}

#[test]
fn download_respects_row_limit() {
    let executor = seeded_database();
    let config = AppConfig {
        max_download_rows: 1,
        ..AppConfig::default()
    };
    let filters = IssuerFilters {
        eq_id: 1,
        start_date: date("2023-01-01"),
        end_date: date("2024-12-31"),
    };

    let table = reports::issuer_table(&executor, &filters, OutputMode::Download, &config);
    assert_eq!(table.row_count(), 1);
    assert!(table.caption.is_none());
    assert!(table.footer.is_none());
    assert!(to_csv(&table).starts_with("Pricing Date,Ticker,ID,Issuer Name,"));
}

#[test]
fn option_chain_report_labels_put_and_call() {
    let executor = seeded_database();
    let config = AppConfig::default();
    let mut errors = Vec::new();
    let filters = OptionChainFilters::from_params(
        &params(json!({
            "eqID": "1",
            "currentDate": "2024-01-05",
            "expDate": "2024-01-19",
            "lowStrike": "0",
            "highStrike": "1000"
        })),
        date("2024-01-05"),
        &mut errors,
    )
    .unwrap();
    assert_eq!(filters.high_strike, 1000);

    let table = reports::option_chain_table(&executor, &filters, OutputMode::Download, &config);
    assert!(table.is_valid(), "{:?}", table.error_message());
    assert_eq!(table.row_count(), 2);
    assert_eq!(table.column_count(), 19);
    assert_eq!(table.column_name(1), Some("Put/Call"));
    assert_eq!(table.csv_filename, "optionchaindata.csv");

    let csv = to_csv(&table);
    assert!(csv.starts_with("OptionID,Put/Call,Strike,Exp. Date,"));
    assert!(csv.contains(",Put,"));
    assert!(csv.contains(",Call,"));
    assert!(!csv.contains("1500"));
}

#[test]
fn option_chain_defaults() {
    let mut errors = Vec::new();
    let today = date("2024-01-05");
    let filters = OptionChainFilters::from_params(
        &params(json!({"eqID": "1", "expDate": "bad"})),
        today,
        &mut errors,
    )
    .unwrap();

    assert_eq!(filters.current_date, today);
    assert_eq!(filters.exp_date, date("2024-01-12"));
    assert_eq!(filters.low_strike, 0);
    assert_eq!(filters.high_strike, 1000);
    assert_eq!(errors.len(), 1);
}

#[test]
fn historical_surface_report() {
    let executor = seeded_database();
    let config = AppConfig::default();
    let mut errors = Vec::new();
    let filters = SurfaceFilters::from_params(
        &params(json!({
            "dataType": "0",
            "volType": ["16"],
            "ticker": "spy",
            "startDate": "2024-01-01",
            "endDate": "2024-01-31"
        })),
        date("2024-02-01"),
        &mut errors,
    );
    assert_eq!(filters.ticker, "SPY");
    assert_eq!(filters.vol_types, vec![16]);

    let table = reports::surface_table(&executor, &filters, OutputMode::Preview, &config).unwrap();
    assert!(table.is_valid(), "{:?}", table.error_message());
    assert_eq!(table.row_count(), 2);
    assert_eq!(table.column_name(3), Some("Realized Volatility"));

    let html = to_html(&table);
    assert!(html.contains("<th width=\"20%\">Indicator</th>"));
    assert!(html.contains("<td class=\"string\">HV 3 months</td>"));
    assert!(html.contains(">0.123456789000</td>"));

    // Downloads carry full precision, no format applied
    let table = reports::surface_table(&executor, &filters, OutputMode::Download, &config).unwrap();
    let csv = to_csv(&table);
    assert!(csv.contains("SPY,HV 3 months,471.25,0.123456789,2024-01-02\n"));
    assert_eq!(table.csv_filename, "surfacedata.csv");
}

#[test]
fn implied_surface_report() {
    let executor = seeded_database();
    let config = AppConfig::default();
    let mut errors = Vec::new();
    let filters = SurfaceFilters::from_params(
        &params(json!({
            "dataType": "1",
            "volType": ["-3", "16"],
            "moneyness": "90",
            "startDate": "2024-01-01",
            "endDate": "2024-01-31"
        })),
        date("2024-02-01"),
        &mut errors,
    );
    assert_eq!(filters.ticker, "SPY");
    assert_eq!(filters.vol_types, vec![-3]);

    let table = reports::surface_table(&executor, &filters, OutputMode::Download, &config).unwrap();
    assert!(table.is_valid(), "{:?}", table.error_message());
    assert_eq!(table.row_count(), 1);
    assert_eq!(table.column_name(1), Some("Term"));
    assert_eq!(to_csv(&table).lines().nth(1), Some("SPY,3 months,90,0.25,2024-01-02"));
}

#[test]
fn surface_without_vol_types_has_no_table() {
    let executor = seeded_database();
    let mut errors = Vec::new();
    let filters = SurfaceFilters::from_params(&params(json!({})), date("2024-02-01"), &mut errors);

    assert!(filters.vol_types.is_empty());
    assert_eq!(filters.moneyness, 100);
    assert!(
        reports::surface_table(&executor, &filters, OutputMode::Preview, &AppConfig::default())
            .is_none()
    );
}

#[test]
fn missing_tables_render_the_database_error() {
    let executor = SqliteExecutor::open_in_memory().unwrap();
    let filters = IssuerFilters {
        eq_id: 1,
        start_date: date("2024-01-01"),
        end_date: date("2024-01-31"),
    };

    let config = AppConfig::default();
    let table = reports::issuer_table(&executor, &filters, OutputMode::Preview, &config);
    assert!(!table.is_valid());
    assert!(to_html(&table).contains("no such table"));
    assert_eq!(to_csv(&table), "Server Error");
}
