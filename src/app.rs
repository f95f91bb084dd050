#![cfg(feature = "web")]

use axum::{
    Router,
    extract::State,
    http::{HeaderName, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
};
use axum_extra::extract::Query;
use axum_extra::extract::cookie::{Cookie, CookieJar};
use chrono::{Local, NaiveDate, Utc};
use std::fs::create_dir_all;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use crate::config::AppConfig;
use crate::downloader::{
    BufferedResponse, emit_download_headers, escape_html, render_csv, render_html,
};
use crate::query::{QueryExecutor, SqliteExecutor};
use crate::reports::{
    self, DATE_YYYYMMDD, IssuerFilters, MONEYNESS_VALUES, OptionChainFilters, ReportParams,
    SurfaceFilters, VolatilityKind,
};
use crate::session::MemorySessionStore;
use crate::table::ResultTable;
use crate::tracker::DownloadTracker;

/// Name of the cookie carrying the session id
pub const SESSION_COOKIE: &str = "session";

/// Session key under which CSV downloads are counted
pub const DOWNLOAD_TRACKER: &str = "downloads";

pub struct AppState {
    pub config: AppConfig,
    pub sessions: MemorySessionStore,
    pub executor: Box<dyn QueryExecutor + Send + Sync>,
}

impl AppState {
    pub fn new(config: AppConfig, executor: impl QueryExecutor + Send + Sync + 'static) -> Self {
        let sessions = MemorySessionStore::new(Duration::from_secs(config.session_ttl_secs));
        Self {
            config,
            sessions,
            executor: Box::new(executor),
        }
    }
}

impl IntoResponse for BufferedResponse {
    fn into_response(self) -> Response {
        let mut response = self.body.into_response();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                response.headers_mut().insert(name, value);
            }
        }
        response
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(serve_index))
        .route("/options", get(serve_option_chain))
        .route("/issuer", get(serve_issuer))
        .route("/surface", get(serve_surface))
        .with_state(state)
}

pub async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = Path::new(&config.database_path).parent() {
        if !parent.as_os_str().is_empty() {
            create_dir_all(parent)?;
        }
    }

    let executor = SqliteExecutor::open(&config.database_path)?;
    reports::init_schema(&executor)?;

    let listener = TcpListener::bind(&config.bind_address).await?;
    log::info!("Listening on http://{}", config.bind_address);

    let state = Arc::new(AppState::new(config, executor));

    // Drop expired sessions once an hour
    let sweeper = Arc::clone(&state);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60 * 60));
        loop {
            interval.tick().await;
            let purged = sweeper.sessions.purge_expired();
            if purged > 0 {
                log::debug!("purged {} expired sessions", purged);
            }
        }
    });

    axum::serve(listener, router(state)).await?;

    Ok(())
}

/// Reuse the visitor's session or start a new one
fn session_for(state: &AppState, jar: CookieJar) -> (CookieJar, String) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if state.sessions.validate_session(cookie.value()) {
            let session_id = cookie.value().to_string();
            return (jar, session_id);
        }
    }

    let session_id = state.sessions.create_session();
    let cookie = Cookie::build((SESSION_COOKIE, session_id.clone()))
        .path("/")
        .http_only(true);
    (jar.add(cookie), session_id)
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n <head>\n  <title>{}</title>\n  <meta charset=\"UTF-8\">\n </head>\n <body>\n{}\n </body>\n</html>\n",
        escape_html(title),
        body
    )
}

fn error_list(errors: &[String]) -> String {
    if errors.is_empty() {
        return String::new();
    }
    let items: String = errors
        .iter()
        .map(|e| format!("<li>{}</li>\n", escape_html(e)))
        .collect();
    format!("<ul id=\"errors\">{}</ul>\n", items)
}

fn limit_exceeded_page() -> String {
    page(
        "OptionApps",
        "  <h3>Exceeded download limit.</h3>\n  <p>Sorry, you have exceeded our reasonable limit on downloads. Please contact\n   us to lift the restriction on your account.</p>",
    )
}

/// Ask the session's tracker for permission before building a download
fn download_permitted(state: &AppState, session_id: &str) -> bool {
    let tracker = DownloadTracker::new(&state.sessions, session_id, DOWNLOAD_TRACKER)
        .with_limit(state.config.download_limit)
        .with_window(state.config.download_window_secs);
    tracker.may_download(Utc::now())
}

/// Render a preview table into the page, followed by the query text when
/// `show_query_text` is on.
fn push_preview(state: &AppState, body: &mut String, table: &ResultTable) {
    render_html(table, &mut PageSink(body));
    if state.config.show_query_text {
        if let Some(sql) = &table.query_string {
            body.push_str(&format!("  <pre class=\"query\">{}</pre>\n", escape_html(sql)));
        }
    }
}

fn csv_response(session_id: &str, report: &str, table: &ResultTable) -> Response {
    log::info!(
        "session {} downloading {} ({} rows)",
        session_id,
        report,
        table.row_count()
    );
    let mut out = BufferedResponse::new();
    emit_download_headers(&mut out, &table.csv_filename);
    render_csv(table, &mut out);
    out.into_response()
}

fn refused_response() -> Response {
    (StatusCode::TOO_MANY_REQUESTS, Html(limit_exceeded_page())).into_response()
}

fn input(label: &str, name: &str, value: &str) -> String {
    format!(
        "   <label>{} <input type=\"text\" name=\"{}\" value=\"{}\" /></label><br>\n",
        escape_html(label),
        name,
        escape_html(value)
    )
}

fn hidden(name: &str, value: &str) -> String {
    format!(
        "   <input type=\"hidden\" name=\"{}\" value=\"{}\" />\n",
        name,
        escape_html(value)
    )
}

/// Form repeating the current filters as hidden fields, so the download
/// matches the preview.
fn download_form(action: &str, fields: &[(&str, String)]) -> String {
    let hidden_fields: String = fields.iter().map(|(n, v)| hidden(n, v)).collect();
    format!(
        "  <div id=\"downloadForm\">\n  <form action=\"{}\" method=\"GET\">\n{}   <input type=\"submit\" name=\"submit\" value=\"Download\" />\n  </form>\n  </div>\n",
        action, hidden_fields
    )
}

enum TickerLookup {
    Redirect(String),
    Message(String),
}

/// Resolve a ticker to an equity id when none was chosen yet
///
/// A single match redirects to the page with the id filled in; several
/// matches produce a list to choose from.
fn lookup_ticker(
    state: &AppState,
    action: &str,
    params: &ReportParams,
    carry: &[(&str, String)],
) -> Option<TickerLookup> {
    if params.eq_id().is_some() {
        return None;
    }
    let raw = params.ticker.as_deref().filter(|t| !t.trim().is_empty())?;
    let ticker = reports::sanitize_ticker(raw);

    let link = |eq_id: i64, ticker: &str| {
        let mut url = format!(
            "{}?eqID={}&ticker={}",
            action,
            eq_id,
            urlencoding::encode(ticker)
        );
        for (name, value) in carry {
            url.push_str(&format!("&{}={}", name, urlencoding::encode(value)));
        }
        url.push_str("&submit=Preview");
        url
    };

    match reports::matching_equities(state.executor.as_ref(), &ticker) {
        Ok(matches) if matches.len() == 1 => {
            Some(TickerLookup::Redirect(link(matches[0].eq_id, &matches[0].ticker)))
        }
        Ok(matches) if matches.is_empty() => Some(TickerLookup::Message(format!(
            "<p>No matching ticker symbols for {}.</p>\n",
            escape_html(raw)
        ))),
        Ok(matches) => {
            let items: String = matches
                .iter()
                .map(|m| {
                    format!(
                        "<li><a href=\"{}\">{}</a></li>\n",
                        escape_html(&link(m.eq_id, &m.ticker)),
                        escape_html(&m.issuer)
                    )
                })
                .collect();
            Some(TickerLookup::Message(format!(
                "<p>Please choose an Issuer:</p>\n<ul>\n{}</ul>\n",
                items
            )))
        }
        Err(e) => Some(TickerLookup::Message(format!(
            "<p>{}</p>\n",
            escape_html(&e.to_string())
        ))),
    }
}

async fn serve_index() -> Html<String> {
    Html(page(
        "OptionApps",
        "  <h1>Downloads</h1>\n  <ul>\n   <li><a href=\"/options\">Option Chain Data</a></li>\n   <li><a href=\"/issuer\">Issuer Data</a></li>\n   <li><a href=\"/surface\">Volatility Surface Data</a></li>\n  </ul>",
    ))
}

async fn serve_option_chain(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(params): Query<ReportParams>,
) -> Response {
    let (jar, session_id) = session_for(&state, jar);
    let mut errors = Vec::new();
    let today = today();
    let filters = OptionChainFilters::from_params(&params, today, &mut errors);

    let mode = params.output_mode();
    if let (Some(filters), reports::OutputMode::Download) = (&filters, mode) {
        if !download_permitted(&state, &session_id) {
            return (jar, refused_response()).into_response();
        }
        let table =
            reports::option_chain_table(state.executor.as_ref(), filters, mode, &state.config);
        return (jar, csv_response(&session_id, "option chain", &table)).into_response();
    }

    let current_date = params
        .current_date
        .clone()
        .unwrap_or_else(|| today.format(DATE_YYYYMMDD).to_string());
    let exp_date = params.exp_date.clone().unwrap_or_else(|| {
        (today + chrono::Duration::days(7))
            .format(DATE_YYYYMMDD)
            .to_string()
    });

    let mut choice = String::new();
    match lookup_ticker(
        &state,
        "/options",
        &params,
        &[("currentDate", current_date.clone()), ("expDate", exp_date.clone())],
    ) {
        Some(TickerLookup::Redirect(url)) => return (jar, Redirect::to(&url)).into_response(),
        Some(TickerLookup::Message(html)) => choice = html,
        None => {}
    }

    let mut body = error_list(&errors);
    body.push_str("  <form action=\"/options\" method=\"GET\">\n");
    let ticker = params.ticker.as_deref().unwrap_or("");
    let low_strike = params.low_strike.as_deref().unwrap_or("0");
    let high_strike = params.high_strike.as_deref().unwrap_or("1000");
    body.push_str(&input("Ticker Symbol", "ticker", ticker));
    body.push_str(&input("Current Date", "currentDate", &current_date));
    body.push_str(&input("Exp. Date", "expDate", &exp_date));
    body.push_str(&input("Low Strike", "lowStrike", low_strike));
    body.push_str(&input("High Strike", "highStrike", high_strike));
    body.push_str("   <input type=\"submit\" name=\"submit\" value=\"Preview\" />\n  </form>\n");
    body.push_str(&choice);

    if let Some(filters) = filters {
        body.push_str(&download_form(
            "/options",
            &[
                ("eqID", filters.eq_id.to_string()),
                ("ticker", params.ticker.clone().unwrap_or_default()),
                ("currentDate", filters.current_date.format(DATE_YYYYMMDD).to_string()),
                ("expDate", filters.exp_date.format(DATE_YYYYMMDD).to_string()),
                ("lowStrike", filters.low_strike.to_string()),
                ("highStrike", filters.high_strike.to_string()),
            ],
        ));
        let table =
            reports::option_chain_table(state.executor.as_ref(), &filters, mode, &state.config);
        body.push_str("  <div id=\"preview\">\n");
        push_preview(&state, &mut body, &table);
        body.push_str("  </div>\n");
    }

    (jar, Html(page("Option Chain Data", &body))).into_response()
}

async fn serve_issuer(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(params): Query<ReportParams>,
) -> Response {
    let (jar, session_id) = session_for(&state, jar);
    let mut errors = Vec::new();
    let today = today();
    let filters = IssuerFilters::from_params(&params, today, &mut errors);

    let mode = params.output_mode();
    if let (Some(filters), reports::OutputMode::Download) = (&filters, mode) {
        if !download_permitted(&state, &session_id) {
            return (jar, refused_response()).into_response();
        }
        let table = reports::issuer_table(state.executor.as_ref(), filters, mode, &state.config);
        return (jar, csv_response(&session_id, "issuer data", &table)).into_response();
    }

    let start_date = params.start_date.clone().unwrap_or_else(|| {
        (today - chrono::Duration::days(30))
            .format(DATE_YYYYMMDD)
            .to_string()
    });
    let end_date = params
        .end_date
        .clone()
        .unwrap_or_else(|| today.format(DATE_YYYYMMDD).to_string());

    let mut choice = String::new();
    match lookup_ticker(
        &state,
        "/issuer",
        &params,
        &[("startDate", start_date.clone()), ("endDate", end_date.clone())],
    ) {
        Some(TickerLookup::Redirect(url)) => return (jar, Redirect::to(&url)).into_response(),
        Some(TickerLookup::Message(html)) => choice = html,
        None => {}
    }

    let mut body = error_list(&errors);
    body.push_str("  <form action=\"/issuer\" method=\"GET\">\n");
    body.push_str(&input("Ticker Symbol", "ticker", params.ticker.as_deref().unwrap_or("")));
    body.push_str(&input("Start", "startDate", &start_date));
    body.push_str(&input("End", "endDate", &end_date));
    body.push_str("   <input type=\"submit\" name=\"submit\" value=\"Preview\" />\n  </form>\n");
    body.push_str(&choice);

    if let Some(filters) = filters {
        body.push_str(&download_form(
            "/issuer",
            &[
                ("eqID", filters.eq_id.to_string()),
                ("ticker", params.ticker.clone().unwrap_or_default()),
                ("startDate", filters.start_date.format(DATE_YYYYMMDD).to_string()),
                ("endDate", filters.end_date.format(DATE_YYYYMMDD).to_string()),
            ],
        ));
        let table = reports::issuer_table(state.executor.as_ref(), &filters, mode, &state.config);
        body.push_str("  <div id=\"preview\">\n  <h1>Issuer Data</h1>\n");
        push_preview(&state, &mut body, &table);
        body.push_str("  </div>\n");
    }

    (jar, Html(page("Issuer Data", &body))).into_response()
}

async fn serve_surface(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(params): Query<ReportParams>,
) -> Response {
    let (jar, session_id) = session_for(&state, jar);
    let mut errors = Vec::new();
    let filters = SurfaceFilters::from_params(&params, today(), &mut errors);

    let mode = params.output_mode();
    if mode == reports::OutputMode::Download && !filters.vol_types.is_empty() {
        if !download_permitted(&state, &session_id) {
            return (jar, refused_response()).into_response();
        }
        if let Some(table) =
            reports::surface_table(state.executor.as_ref(), &filters, mode, &state.config)
        {
            return (jar, csv_response(&session_id, "surface data", &table)).into_response();
        }
    }

    let hvol_names = reports::historical_volatility_names(state.executor.as_ref())
        .unwrap_or_else(|e| {
            errors.push(e.to_string());
            Default::default()
        });

    let mut body = error_list(&errors);
    body.push_str("  <form action=\"/surface\" method=\"GET\">\n");

    let checked = |on: bool| if on { " checked=\"checked\"" } else { "" };
    body.push_str(&format!(
        "   <label><input type=\"radio\" name=\"dataType\" value=\"0\"{} /> \
         Historical Volatility</label><br>\n",
        checked(filters.kind == VolatilityKind::Historical)
    ));
    body.push_str(&format!(
        "   <label><input type=\"radio\" name=\"dataType\" value=\"1\"{} /> \
         Implied Volatility</label><br>\n",
        checked(filters.kind == VolatilityKind::Implied)
    ));

    for (id, name) in &hvol_names {
        body.push_str(&format!(
            "   <label><input type=\"checkbox\" name=\"volType\" value=\"{}\"{} />{}</label><br>\n",
            id,
            checked(
                filters.kind == VolatilityKind::Historical && filters.vol_types.contains(id)
            ),
            escape_html(name)
        ));
    }
    for months in 1..=6i64 {
        let id = -months;
        body.push_str(&format!(
            "   <label><input type=\"checkbox\" name=\"volType\" value=\"{}\"{} />\
             {} month{}</label><br>\n",
            id,
            checked(
                filters.kind == VolatilityKind::Implied && filters.vol_types.contains(&id)
            ),
            months,
            if months == 1 { "" } else { "s" }
        ));
    }

    for value in std::iter::once(100).chain(MONEYNESS_VALUES) {
        body.push_str(&format!(
            "   <label><input type=\"radio\" name=\"moneyness\" value=\"{}\"{} />{}%</label><br>\n",
            value,
            checked(filters.moneyness == value),
            value
        ));
    }

    let start_date = filters.start_date.format(DATE_YYYYMMDD).to_string();
    let end_date = filters.end_date.format(DATE_YYYYMMDD).to_string();
    body.push_str(&input("Start", "startDate", &start_date));
    body.push_str(&input("End", "endDate", &end_date));
    body.push_str(&input("Ticker Symbol", "ticker", &filters.ticker));
    body.push_str("   <input type=\"submit\" name=\"submit\" value=\"Preview\" />\n  </form>\n");

    let table = reports::surface_table(state.executor.as_ref(), &filters, mode, &state.config);
    if let Some(table) = table {
        let data_type = match filters.kind {
            VolatilityKind::Implied => "1",
            VolatilityKind::Historical => "0",
        };
        let mut fields = vec![
            ("dataType", data_type.to_string()),
            ("ticker", filters.ticker.clone()),
            ("startDate", start_date),
            ("endDate", end_date),
            ("moneyness", filters.moneyness.to_string()),
        ];
        fields.extend(filters.vol_types.iter().map(|v| ("volType", v.to_string())));
        body.push_str(&download_form("/surface", &fields));

        body.push_str("  <div id=\"preview\">\n");
        push_preview(&state, &mut body, &table);
        body.push_str("  </div>\n");
    }

    (jar, Html(page("Volatility Surface Data", &body))).into_response()
}

/// Renders straight into a page body under construction.
struct PageSink<'a>(&'a mut String);

impl crate::downloader::ResponseSink for PageSink<'_> {
    fn set_header(&mut self, _name: &str, _value: &str) {}

    fn write_str(&mut self, text: &str) {
        self.0.push_str(text);
    }
}
