//! Yahoo Finance data provider.
//!
//! Price history, dividends and splits come from the v8 chart API; company
//! data, statements and holders from the v10 quoteSummary modules; option
//! data from the v7 options API. ISINs are looked up through the Business
//! Insider search endpoint, the only public source Yahoo itself links to.
//!
//! Yahoo Finance has no official API and is subject to unannounced format
//! changes. Those surface as [`ProviderError::ResponseFormatChanged`].

use super::circuit_breaker::CircuitBreaker;
use super::{Provider, ProviderError};
use crate::field::{Field, FieldArgs};
use crate::value::{records_to_table, FieldValue, Scalar, Series, Table};
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const CHART_URL: &str = "https://query2.finance.yahoo.com/v8/finance/chart";
const SUMMARY_URL: &str = "https://query2.finance.yahoo.com/v10/finance/quoteSummary";
const OPTIONS_URL: &str = "https://query2.finance.yahoo.com/v7/finance/options";
const ISIN_URL: &str = "https://markets.businessinsider.com/ajax/SearchController_Suggest";

/// Upper bound on a single backoff sleep.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

const VALID_PERIODS: &[&str] = &[
    "1d", "5d", "1mo", "3mo", "6mo", "1y", "2y", "5y", "10y", "ytd", "max",
];
const VALID_INTERVALS: &[&str] = &[
    "1m", "2m", "5m", "15m", "30m", "60m", "90m", "1h", "1d", "5d", "1wk", "1mo", "3mo",
];

const INFO_MODULES: &[&str] = &[
    "assetProfile",
    "summaryProfile",
    "summaryDetail",
    "quoteType",
    "defaultKeyStatistics",
    "financialData",
    "price",
];

// ── Chart API response ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
    events: Option<Events>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

#[derive(Debug, Default, Deserialize)]
struct Events {
    #[serde(default)]
    dividends: BTreeMap<String, DividendEvent>,
    #[serde(default)]
    splits: BTreeMap<String, SplitEvent>,
}

#[derive(Debug, Deserialize)]
struct DividendEvent {
    amount: f64,
    date: i64,
}

#[derive(Debug, Deserialize)]
struct SplitEvent {
    date: i64,
    numerator: f64,
    denominator: f64,
}

/// Parsed `history` arguments with provider defaults applied.
#[derive(Debug, Clone, PartialEq)]
struct HistoryRequest {
    period: String,
    interval: String,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    auto_adjust: bool,
    actions: bool,
}

impl HistoryRequest {
    fn from_args(args: &FieldArgs) -> Result<Self, ProviderError> {
        let period = args.get_str("period").unwrap_or("1mo").to_string();
        let interval = args.get_str("interval").unwrap_or("1d").to_string();

        if !VALID_PERIODS.contains(&period.as_str()) {
            return Err(ProviderError::InvalidArgument(format!(
                "period '{period}' (valid: {})",
                VALID_PERIODS.join(", ")
            )));
        }
        if !VALID_INTERVALS.contains(&interval.as_str()) {
            return Err(ProviderError::InvalidArgument(format!(
                "interval '{interval}' (valid: {})",
                VALID_INTERVALS.join(", ")
            )));
        }

        Ok(Self {
            period,
            interval,
            start: args.get_str("start").map(parse_date).transpose()?,
            end: args.get_str("end").map(parse_date).transpose()?,
            auto_adjust: args.get_bool("auto_adjust").unwrap_or(true),
            actions: args.get_bool("actions").unwrap_or(true),
        })
    }

    /// Full daily history with events, used for dividends/splits/actions.
    fn max_daily() -> Self {
        Self {
            period: "max".into(),
            interval: "1d".into(),
            start: None,
            end: None,
            auto_adjust: true,
            actions: true,
        }
    }

    fn intraday(&self) -> bool {
        self.interval.ends_with('m') || self.interval.ends_with('h')
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        let mut q = vec![
            ("interval", self.interval.clone()),
            ("includeAdjustedClose", "true".to_string()),
            ("events", "div,splits".to_string()),
        ];
        match self.start {
            Some(start) => {
                let end = self.end.unwrap_or_else(|| Utc::now().date_naive());
                q.push(("period1", day_start(start).to_string()));
                q.push(("period2", day_end(end).to_string()));
            }
            None => q.push(("range", self.period.clone())),
        }
        q
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, ProviderError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| ProviderError::InvalidArgument(format!("date '{s}': {e}")))
}

fn day_start(d: NaiveDate) -> i64 {
    d.and_hms_opt(0, 0, 0).map_or(0, |dt| dt.and_utc().timestamp())
}

fn day_end(d: NaiveDate) -> i64 {
    d.and_hms_opt(23, 59, 59).map_or(0, |dt| dt.and_utc().timestamp())
}

fn epoch_date(ts: i64) -> Result<NaiveDate, ProviderError> {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.date_naive())
        .ok_or_else(|| ProviderError::ResponseFormatChanged(format!("invalid timestamp: {ts}")))
}

fn epoch_scalar(ts: i64, intraday: bool) -> Result<Scalar, ProviderError> {
    let dt = DateTime::from_timestamp(ts, 0)
        .ok_or_else(|| ProviderError::ResponseFormatChanged(format!("invalid timestamp: {ts}")))?;
    Ok(if intraday {
        Scalar::DateTime(dt.naive_utc())
    } else {
        Scalar::Date(dt.date_naive())
    })
}

/// Yahoo Finance data provider.
pub struct YahooProvider {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
    max_retries: u32,
    base_delay: Duration,
}

impl YahooProvider {
    pub fn new(circuit_breaker: Arc<CircuitBreaker>) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| ProviderError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            circuit_breaker,
            max_retries: 0,
            base_delay: Duration::from_millis(500),
        })
    }

    /// Retry transport failures with exponential backoff. Off by default:
    /// retry policy normally belongs to the caller.
    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_delay = base_delay;
        self
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    /// Execute a GET with circuit breaker and optional retry logic.
    fn send(
        &self,
        url: &str,
        query: &[(&str, String)],
        symbol: &str,
    ) -> Result<reqwest::blocking::Response, ProviderError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(ProviderError::CircuitBreakerTripped);
        }

        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = backoff_delay(self.base_delay, attempt);
                debug!(symbol, attempt, ?delay, "retrying yahoo request");
                std::thread::sleep(delay);
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(ProviderError::CircuitBreakerTripped);
            }

            match self.client.get(url).query(query).send() {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::FORBIDDEN {
                        // IP ban: open the breaker right away
                        self.circuit_breaker.trip();
                        warn!(symbol, "yahoo returned 403, circuit breaker tripped");
                        return Err(ProviderError::CircuitBreakerTripped);
                    }

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        self.circuit_breaker.record_failure();
                        let retry_after = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(60);
                        last_error = Some(ProviderError::RateLimited {
                            retry_after_secs: retry_after,
                        });
                        continue;
                    }

                    if status == reqwest::StatusCode::UNAUTHORIZED {
                        return Err(ProviderError::AuthenticationRequired(
                            "Yahoo Finance requires authentication".into(),
                        ));
                    }

                    if status == reqwest::StatusCode::NOT_FOUND {
                        return Err(ProviderError::SymbolNotFound {
                            symbol: symbol.to_string(),
                        });
                    }

                    if !status.is_success() {
                        self.circuit_breaker.record_failure();
                        last_error = Some(ProviderError::Other(format!("HTTP {status} for {symbol}")));
                        continue;
                    }

                    self.circuit_breaker.record_success();
                    return Ok(resp);
                }
                Err(e) => {
                    if e.is_connect() || e.is_timeout() {
                        last_error = Some(ProviderError::NetworkUnreachable(e.to_string()));
                        continue;
                    }
                    return Err(ProviderError::NetworkUnreachable(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError::Other("max retries exceeded".into())))
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        symbol: &str,
    ) -> Result<T, ProviderError> {
        self.send(url, query, symbol)?.json().map_err(|e| {
            ProviderError::ResponseFormatChanged(format!("failed to parse response for {symbol}: {e}"))
        })
    }

    fn chart(&self, symbol: &str, req: &HistoryRequest) -> Result<ChartData, ProviderError> {
        let url = endpoint(CHART_URL, symbol)?;
        let resp: ChartResponse = self.get_json(url.as_str(), &req.query(), symbol)?;
        parse_chart(symbol, resp)
    }

    fn quote_summary(&self, symbol: &str, modules: &[&str]) -> Result<Map<String, Value>, ProviderError> {
        let url = endpoint(SUMMARY_URL, symbol)?;
        let resp: Value = self.get_json(url.as_str(), &[("modules", modules.join(","))], symbol)?;
        parse_quote_summary(symbol, resp)
    }

    fn summary_module(&self, symbol: &str, module: &str) -> Result<Value, ProviderError> {
        let mut result = self.quote_summary(symbol, &[module])?;
        result
            .remove(module)
            .ok_or_else(|| ProviderError::ResponseFormatChanged(format!("module '{module}' missing")))
    }

    fn options_result(&self, symbol: &str, date: Option<NaiveDate>) -> Result<Value, ProviderError> {
        let url = endpoint(OPTIONS_URL, symbol)?;
        let query: Vec<(&str, String)> = date
            .map(|d| vec![("date", day_start(d).to_string())])
            .unwrap_or_default();
        let resp: Value = self.get_json(url.as_str(), &query, symbol)?;
        first_result(symbol, &resp["optionChain"])
    }

    fn isin(&self, symbol: &str) -> Result<FieldValue, ProviderError> {
        if symbol.contains('^') || symbol.contains('-') {
            return Ok(FieldValue::null());
        }
        let text = self
            .send(
                ISIN_URL,
                &[("max_results", "25".into()), ("query", symbol.to_string())],
                symbol,
            )?
            .text()
            .map_err(|e| ProviderError::ResponseFormatChanged(format!("isin lookup: {e}")))?;
        Ok(extract_isin(symbol, &text).map_or_else(FieldValue::null, FieldValue::from))
    }

    fn statements(&self, symbol: &str, module: &str, list_key: &str) -> Result<FieldValue, ProviderError> {
        let module_value = self.summary_module(symbol, module)?;
        let records = records_at(&module_value, list_key)?;
        Ok(FieldValue::Table(dated_table(&records, "endDate")))
    }

    fn ownership(&self, symbol: &str, module: &str) -> Result<FieldValue, ProviderError> {
        let module_value = self.summary_module(symbol, module)?;
        let records = records_at(&module_value, "ownershipList")?;
        let mut table = records_to_table(&records, Some("organization"));
        epoch_column_to_dates(&mut table, "reportDate");
        drop_column(&mut table, "maxAge");
        Ok(FieldValue::Table(table))
    }

    fn earnings(&self, symbol: &str, bucket: &str) -> Result<FieldValue, ProviderError> {
        let module_value = self.summary_module(symbol, "earnings")?;
        let chart = module_value
            .get("financialsChart")
            .ok_or_else(|| ProviderError::ResponseFormatChanged("financialsChart missing".into()))?;
        let records = records_at(chart, bucket)?;
        Ok(FieldValue::Table(records_to_table(&records, Some("date"))))
    }

    fn mapping_module(&self, symbol: &str, module: &str) -> Result<FieldValue, ProviderError> {
        let mut value = FieldValue::from_json(self.summary_module(symbol, module)?);
        if let FieldValue::Mapping(m) = &mut value {
            m.remove("maxAge");
        }
        Ok(value)
    }

    fn info(&self, symbol: &str) -> Result<FieldValue, ProviderError> {
        let modules = self.quote_summary(symbol, INFO_MODULES)?;
        let mut flat = BTreeMap::new();
        for (_, module) in modules {
            if let FieldValue::Mapping(m) = FieldValue::from_json(module) {
                flat.extend(m.into_iter().filter(|(k, _)| k != "maxAge"));
            }
        }
        Ok(FieldValue::Mapping(flat))
    }

    fn history(&self, symbol: &str, req: &HistoryRequest) -> Result<FieldValue, ProviderError> {
        let data = self.chart(symbol, req)?;
        Ok(FieldValue::Table(history_table(symbol, data, req)?))
    }

    fn option_chain(&self, symbol: &str, args: &FieldArgs) -> Result<FieldValue, ProviderError> {
        let date = args.get_str("date").map(parse_date).transpose()?;
        let result = self.options_result(symbol, date)?;
        let chain = result["options"]
            .get(0)
            .ok_or_else(|| ProviderError::ResponseFormatChanged("no option chain".into()))?;

        let side = |name: &str| -> FieldValue {
            let records: Vec<FieldValue> = chain[name]
                .as_array()
                .map(|items| items.iter().cloned().map(FieldValue::from_json).collect())
                .unwrap_or_default();
            let mut table = records_to_table(&records, Some("contractSymbol"));
            epoch_column_to_dates(&mut table, "expiration");
            epoch_column_to_dates(&mut table, "lastTradeDate");
            FieldValue::Table(table)
        };

        let mut out = BTreeMap::new();
        out.insert("calls".to_string(), side("calls"));
        out.insert("puts".to_string(), side("puts"));
        if let Some(ts) = chain["expirationDate"].as_i64() {
            out.insert("expiration".to_string(), FieldValue::Scalar(epoch_date(ts)?.into()));
        }
        Ok(FieldValue::Mapping(out))
    }

    fn expirations(&self, symbol: &str) -> Result<FieldValue, ProviderError> {
        let result = self.options_result(symbol, None)?;
        let mut series = Series::new("expiration");
        if let Some(dates) = result["expirationDates"].as_array() {
            for (i, ts) in dates.iter().filter_map(Value::as_i64).enumerate() {
                series.push(i as i64, epoch_date(ts)?);
            }
        }
        Ok(FieldValue::Series(series))
    }
}

impl Provider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn attribute(&self, entity: &str, field: Field) -> Result<FieldValue, ProviderError> {
        match field {
            Field::Info => self.info(entity),
            Field::Isin => self.isin(entity),
            Field::Options => self.expirations(entity),
            Field::Dividends | Field::Splits | Field::Actions => {
                let data = self.chart(entity, &HistoryRequest::max_daily())?;
                let events = data.events.unwrap_or_default();
                Ok(match field {
                    Field::Dividends => FieldValue::Series(dividend_series(&events)?),
                    Field::Splits => FieldValue::Series(split_series(&events)?),
                    _ => FieldValue::Table(actions_table(&events)?),
                })
            }
            Field::Financials => self.statements(entity, "incomeStatementHistory", "incomeStatementHistory"),
            Field::QuarterlyFinancials => self.statements(
                entity,
                "incomeStatementHistoryQuarterly",
                "incomeStatementHistory",
            ),
            Field::BalanceSheet => self.statements(entity, "balanceSheetHistory", "balanceSheetStatements"),
            Field::QuarterlyBalanceSheet => self.statements(
                entity,
                "balanceSheetHistoryQuarterly",
                "balanceSheetStatements",
            ),
            Field::Cashflow => self.statements(entity, "cashflowStatementHistory", "cashflowStatements"),
            Field::QuarterlyCashflow => self.statements(
                entity,
                "cashflowStatementHistoryQuarterly",
                "cashflowStatements",
            ),
            Field::Earnings => self.earnings(entity, "yearly"),
            Field::QuarterlyEarnings => self.earnings(entity, "quarterly"),
            Field::InstitutionalHolders => self.ownership(entity, "institutionOwnership"),
            Field::MutualfundHolders => self.ownership(entity, "fundOwnership"),
            Field::MajorHolders => self.mapping_module(entity, "majorHoldersBreakdown"),
            Field::Calendar => self.mapping_module(entity, "calendarEvents"),
            Field::Sustainability => self.mapping_module(entity, "esgScores"),
            Field::Recommendations => {
                let module_value = self.summary_module(entity, "upgradeDowngradeHistory")?;
                let records = records_at(&module_value, "history")?;
                Ok(FieldValue::Table(dated_table(&records, "epochGradeDate")))
            }
            Field::History | Field::OptionChain => self.invoke(entity, field, &FieldArgs::new()),
        }
    }

    fn invoke(
        &self,
        entity: &str,
        field: Field,
        args: &FieldArgs,
    ) -> Result<FieldValue, ProviderError> {
        match field {
            Field::History => self.history(entity, &HistoryRequest::from_args(args)?),
            Field::OptionChain => self.option_chain(entity, args),
            other => Err(ProviderError::Unsupported { field: other }),
        }
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}

// ── Response parsing ────────────────────────────────────────────────

fn api_error(symbol: &str, err: ApiError) -> ProviderError {
    if err.code == "Not Found" {
        ProviderError::SymbolNotFound {
            symbol: symbol.to_string(),
        }
    } else {
        ProviderError::ResponseFormatChanged(format!("{}: {}", err.code, err.description))
    }
}

fn parse_chart(symbol: &str, resp: ChartResponse) -> Result<ChartData, ProviderError> {
    let result = match (resp.chart.result, resp.chart.error) {
        (Some(result), _) => result,
        (None, Some(err)) => return Err(api_error(symbol, err)),
        (None, None) => {
            return Err(ProviderError::ResponseFormatChanged(
                "empty result with no error".into(),
            ))
        }
    };
    result
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::ResponseFormatChanged("result array is empty".into()))
}

/// `{"x": {"result": [..], "error": ..}}` envelopes share one shape.
fn first_result(symbol: &str, envelope: &Value) -> Result<Value, ProviderError> {
    if let Some(first) = envelope["result"].get(0) {
        return Ok(first.clone());
    }
    match serde_json::from_value::<ApiError>(envelope["error"].clone()) {
        Ok(err) => Err(api_error(symbol, err)),
        Err(_) => Err(ProviderError::ResponseFormatChanged("result array is empty".into())),
    }
}

fn parse_quote_summary(symbol: &str, resp: Value) -> Result<Map<String, Value>, ProviderError> {
    match first_result(symbol, &resp["quoteSummary"])? {
        Value::Object(modules) => Ok(modules),
        _ => Err(ProviderError::ResponseFormatChanged(
            "quoteSummary result is not an object".into(),
        )),
    }
}

fn records_at(parent: &Value, key: &str) -> Result<Vec<FieldValue>, ProviderError> {
    parent
        .get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().cloned().map(FieldValue::from_json).collect())
        .ok_or_else(|| ProviderError::ResponseFormatChanged(format!("'{key}' missing or not a list")))
}

/// Records indexed by an epoch-seconds key, shown as dates.
fn dated_table(records: &[FieldValue], index_key: &str) -> Table {
    let mut table = records_to_table(records, Some(index_key));
    for idx in &mut table.index {
        if let Scalar::Int(ts) = idx {
            if let Ok(d) = epoch_date(*ts) {
                *idx = Scalar::Date(d);
            }
        }
    }
    drop_column(&mut table, "maxAge");
    table
}

fn epoch_column_to_dates(table: &mut Table, column: &str) {
    let Some(pos) = table.columns.iter().position(|c| c == column) else {
        return;
    };
    for row in &mut table.rows {
        if let Scalar::Int(ts) = row[pos] {
            if let Ok(d) = epoch_date(ts) {
                row[pos] = Scalar::Date(d);
            }
        }
    }
}

fn drop_column(table: &mut Table, column: &str) {
    if let Some(pos) = table.columns.iter().position(|c| c == column) {
        table.columns.remove(pos);
        for row in &mut table.rows {
            row.remove(pos);
        }
    }
}

fn dividend_series(events: &Events) -> Result<Series, ProviderError> {
    let mut by_date = BTreeMap::new();
    for ev in events.dividends.values() {
        by_date.insert(epoch_date(ev.date)?, ev.amount);
    }
    let mut series = Series::new("Dividends");
    for (date, amount) in by_date {
        series.push(date, amount);
    }
    Ok(series)
}

fn split_ratios(events: &Events) -> Result<BTreeMap<NaiveDate, f64>, ProviderError> {
    let mut by_date = BTreeMap::new();
    for ev in events.splits.values() {
        if ev.denominator != 0.0 {
            by_date.insert(epoch_date(ev.date)?, ev.numerator / ev.denominator);
        }
    }
    Ok(by_date)
}

fn split_series(events: &Events) -> Result<Series, ProviderError> {
    let mut series = Series::new("Stock Splits");
    for (date, ratio) in split_ratios(events)? {
        series.push(date, ratio);
    }
    Ok(series)
}

fn actions_table(events: &Events) -> Result<Table, ProviderError> {
    let dividends: BTreeMap<NaiveDate, f64> = dividend_series(events)?
        .iter()
        .filter_map(|(d, v)| match (d, v.as_f64()) {
            (Scalar::Date(d), Some(v)) => Some((*d, v)),
            _ => None,
        })
        .collect();
    let splits = split_ratios(events)?;

    let dates: BTreeSet<NaiveDate> = dividends.keys().chain(splits.keys()).copied().collect();
    let mut table = Table::new(["Dividends", "Stock Splits"]);
    for date in dates {
        table.push_row(
            date,
            vec![
                Scalar::from(dividends.get(&date).copied().unwrap_or(0.0)),
                Scalar::from(splits.get(&date).copied().unwrap_or(0.0)),
            ],
        );
    }
    Ok(table)
}

/// Build the OHLCV table the way yfinance shapes it.
fn history_table(symbol: &str, data: ChartData, req: &HistoryRequest) -> Result<Table, ProviderError> {
    let timestamps = data
        .timestamp
        .ok_or_else(|| ProviderError::ResponseFormatChanged("no timestamps".into()))?;
    let quote = data
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::ResponseFormatChanged("no quote data".into()))?;
    let adj_closes = data
        .indicators
        .adjclose
        .and_then(|v| v.into_iter().next())
        .map(|a| a.adjclose);
    let events = data.events.unwrap_or_default();

    let dividends: HashMap<NaiveDate, f64> = events
        .dividends
        .values()
        .filter_map(|ev| epoch_date(ev.date).ok().map(|d| (d, ev.amount)))
        .collect();
    let splits = split_ratios(&events)?;

    let mut columns = vec!["Open", "High", "Low", "Close"];
    if !req.auto_adjust {
        columns.push("Adj Close");
    }
    columns.push("Volume");
    if req.actions {
        columns.push("Dividends");
        columns.push("Stock Splits");
    }
    let mut table = Table::new(columns);
    let intraday = req.intraday();

    for (i, &ts) in timestamps.iter().enumerate() {
        let at = |v: &Vec<Option<f64>>| v.get(i).copied().flatten();
        let (open, high, low, close) = (at(&quote.open), at(&quote.high), at(&quote.low), at(&quote.close));
        let volume = quote.volume.get(i).copied().flatten();
        let adj_close = adj_closes.as_ref().and_then(at);

        // Skip bars where all OHLCV are None (holidays/non-trading days)
        if open.is_none() && high.is_none() && low.is_none() && close.is_none() && volume.is_none() {
            continue;
        }

        let ratio = match (req.auto_adjust, adj_close, close) {
            (true, Some(adj), Some(c)) if c != 0.0 => adj / c,
            _ => 1.0,
        };
        let scaled = |v: Option<f64>| Scalar::from(v.map(|x| x * ratio));

        let mut row = vec![scaled(open), scaled(high), scaled(low), scaled(close)];
        if !req.auto_adjust {
            row.push(Scalar::from(adj_close));
        }
        row.push(volume.map_or(Scalar::Null, |v| Scalar::Int(v as i64)));
        if req.actions {
            let day = epoch_date(ts)?;
            row.push(Scalar::from(dividends.get(&day).copied().unwrap_or(0.0)));
            row.push(Scalar::from(splits.get(&day).copied().unwrap_or(0.0)));
        }

        table.push_row(epoch_scalar(ts, intraday)?, row);
    }

    if table.is_empty() {
        return Err(ProviderError::SymbolNotFound {
            symbol: symbol.to_string(),
        });
    }

    Ok(table)
}

/// Pull the ISIN out of a Business Insider suggest response.
///
/// Entries look like `"AAPL|US0378331005|Apple Inc.|..."`.
fn extract_isin(symbol: &str, text: &str) -> Option<String> {
    let needle = format!("\"{symbol}|");
    let rest = text.split(needle.as_str()).nth(1)?;
    let entry = rest.split('"').next()?;
    let isin = entry.split('|').next()?.trim();
    let well_formed = isin.len() == 12 && isin.chars().all(|c| c.is_ascii_alphanumeric());
    well_formed.then(|| isin.to_string())
}

/// Exponential backoff for retry `attempt` (1-based), capped at [`MAX_RETRY_DELAY`].
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_RETRY_DELAY)
}

/// `{base}/{symbol}`, the symbol encoded as a single path segment.
fn endpoint(base: &str, symbol: &str) -> Result<reqwest::Url, ProviderError> {
    let mut url = reqwest::Url::parse(base)
        .map_err(|e| ProviderError::Other(format!("bad endpoint {base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| ProviderError::Other(format!("bad endpoint {base}")))?
        .push(symbol);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chart_fixture() -> ChartResponse {
        serde_json::from_value(json!({
            "chart": {
                "result": [{
                    "timestamp": [1704205800, 1704292200, 1704378600],
                    "indicators": {
                        "quote": [{
                            "open": [100.0, null, 102.0],
                            "high": [102.0, null, 104.0],
                            "low": [99.0, null, 101.0],
                            "close": [101.0, null, 103.0],
                            "volume": [1000, null, 1200]
                        }],
                        "adjclose": [{"adjclose": [50.5, null, 51.5]}]
                    },
                    "events": {
                        "dividends": {"1704378600": {"amount": 0.25, "date": 1704378600}},
                        "splits": {"1704205800": {"date": 1704205800, "numerator": 2.0, "denominator": 1.0}}
                    }
                }],
                "error": null
            }
        }))
        .unwrap()
    }

    #[test]
    fn history_args_defaults_and_validation() {
        let req = HistoryRequest::from_args(&FieldArgs::new()).unwrap();
        assert_eq!(req.period, "1mo");
        assert_eq!(req.interval, "1d");
        assert!(req.auto_adjust);

        let bad = HistoryRequest::from_args(&FieldArgs::new().with("period", "7w"));
        assert!(matches!(bad, Err(ProviderError::InvalidArgument(_))));

        let ranged = HistoryRequest::from_args(
            &FieldArgs::new()
                .with("start", "2008-01-01")
                .with("end", "2009-01-01")
                .with("interval", "1mo"),
        )
        .unwrap();
        let q = ranged.query();
        assert!(q.iter().any(|(k, _)| *k == "period1"));
        assert!(!q.iter().any(|(k, _)| *k == "range"));
    }

    #[test]
    fn intraday_detection() {
        let mut req = HistoryRequest::max_daily();
        assert!(!req.intraday());
        req.interval = "15m".into();
        assert!(req.intraday());
        req.interval = "1mo".into();
        assert!(!req.intraday());
    }

    #[test]
    fn adjusted_history_skips_empty_bars() {
        let data = parse_chart("SPY", chart_fixture()).unwrap();
        let req = HistoryRequest::max_daily();
        let table = history_table("SPY", data, &req).unwrap();

        assert_eq!(
            table.columns,
            vec!["Open", "High", "Low", "Close", "Volume", "Dividends", "Stock Splits"]
        );
        assert_eq!(table.len(), 2);
        // adj/close = 0.5
        assert_eq!(table.rows[0][3], Scalar::Float(50.5));
        assert_eq!(table.rows[0][6], Scalar::Float(2.0));
        assert_eq!(table.rows[1][5], Scalar::Float(0.25));
    }

    #[test]
    fn unadjusted_history_keeps_adj_close() {
        let data = parse_chart("SPY", chart_fixture()).unwrap();
        let req = HistoryRequest {
            auto_adjust: false,
            actions: false,
            ..HistoryRequest::max_daily()
        };
        let table = history_table("SPY", data, &req).unwrap();
        assert_eq!(table.columns, vec!["Open", "High", "Low", "Close", "Adj Close", "Volume"]);
        assert_eq!(table.rows[0][3], Scalar::Float(101.0));
        assert_eq!(table.rows[0][4], Scalar::Float(50.5));
    }

    #[test]
    fn chart_not_found_maps_to_symbol_error() {
        let resp: ChartResponse = serde_json::from_value(json!({
            "chart": {"result": null, "error": {"code": "Not Found", "description": "No data found"}}
        }))
        .unwrap();
        assert!(matches!(
            parse_chart("ZZZZ", resp),
            Err(ProviderError::SymbolNotFound { .. })
        ));
    }

    #[test]
    fn actions_union_dividends_and_splits() {
        let data = parse_chart("SPY", chart_fixture()).unwrap();
        let table = actions_table(&data.events.unwrap()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[0], vec![Scalar::Float(0.0), Scalar::Float(2.0)]);
        assert_eq!(table.rows[1], vec![Scalar::Float(0.25), Scalar::Float(0.0)]);
    }

    #[test]
    fn quote_summary_statements_become_dated_table() {
        let resp = json!({
            "quoteSummary": {
                "result": [{
                    "balanceSheetHistory": {
                        "balanceSheetStatements": [
                            {"endDate": {"raw": 1696032000, "fmt": "2023-09-30"}, "cash": {"raw": 29965000000i64}, "maxAge": 1},
                            {"endDate": {"raw": 1664496000, "fmt": "2022-09-30"}, "cash": {"raw": 23646000000i64}, "maxAge": 1}
                        ],
                        "maxAge": 86400
                    }
                }],
                "error": null
            }
        });
        let mut modules = parse_quote_summary("AAPL", resp).unwrap();
        let module = modules.remove("balanceSheetHistory").unwrap();
        let table = dated_table(&records_at(&module, "balanceSheetStatements").unwrap(), "endDate");

        assert_eq!(table.columns, vec!["cash"]);
        assert_eq!(
            table.index[0],
            Scalar::Date(NaiveDate::from_ymd_opt(2023, 9, 30).unwrap())
        );
        assert_eq!(table.rows[1][0], Scalar::Int(23_646_000_000));
    }

    #[test]
    fn isin_extraction() {
        let text = r#"mmSuggestDeliver(0, new Array("Name", "Category", "Keywords"), new Array(new Array("Apple Inc.", "Stocks", "AAPL|US0378331005|AAPL||AAPL")), 1)"#;
        assert_eq!(extract_isin("AAPL", text), Some("US0378331005".to_string()));
        assert_eq!(extract_isin("MSFT", text), None);
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 40), MAX_RETRY_DELAY);
        assert_eq!(backoff_delay(Duration::MAX, u32::MAX), MAX_RETRY_DELAY);
    }

    #[test]
    fn symbols_are_encoded_as_one_path_segment() {
        let url = endpoint(CHART_URL, "BRK B?x#y").unwrap();
        assert_eq!(
            url.as_str(),
            "https://query2.finance.yahoo.com/v8/finance/chart/BRK%20B%3Fx%23y"
        );
        assert_eq!(url.query(), None);

        let url = endpoint(OPTIONS_URL, "A/B").unwrap();
        assert!(url.as_str().ends_with("/options/A%2FB"));
    }
}
