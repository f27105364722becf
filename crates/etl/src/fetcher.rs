use crate::error::EtlError;
use crate::normalize;
use api_client::{RawTradeRecord, TradeDataSource};
use async_trait::async_trait;
use configuration::SourceConfig;
use core_types::{Commodity, MonthlyImport, YearMonth};
use database::{DbError, DbRepository};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The narrow persistence contract the fetcher writes through. Implemented
/// by `DbRepository` for production and by in-memory sinks in tests.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn upsert_commodity(&self, commodity: &Commodity) -> Result<(), DbError>;
    async fn upsert_monthly_import(&self, record: &MonthlyImport) -> Result<(), DbError>;
}

#[async_trait]
impl PersistenceSink for DbRepository {
    async fn upsert_commodity(&self, commodity: &Commodity) -> Result<(), DbError> {
        DbRepository::upsert_commodity(self, commodity).await
    }

    async fn upsert_monthly_import(&self, record: &MonthlyImport) -> Result<(), DbError> {
        DbRepository::upsert_monthly_import(self, record).await
    }
}

/// Bounded exponential backoff: `base * 2^(attempt-1)`, capped.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &SourceConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let doubled = self
            .base_delay
            .saturating_mul(1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX));
        doubled.min(self.max_delay)
    }
}

/// One page the run gave up on after exhausting its retry budget.
#[derive(Debug, Clone)]
pub struct FailedUnit {
    pub period: YearMonth,
    pub page: u32,
    pub error: String,
}

/// Outcome of one ETL run.
#[derive(Debug, Clone, Default)]
pub struct FetchSummary {
    pub commodities: usize,
    pub monthly_rows: usize,
    pub skipped_rows: usize,
    pub failed_units: Vec<FailedUnit>,
}

/// Pulls monthly partner-level import records for an inclusive period range
/// and hands normalized rows to the persistence sink.
pub struct Fetcher<'a> {
    source: &'a dyn TradeDataSource,
    sink: &'a dyn PersistenceSink,
    retry: RetryPolicy,
}

impl<'a> Fetcher<'a> {
    pub fn new(
        source: &'a dyn TradeDataSource,
        sink: &'a dyn PersistenceSink,
        retry: RetryPolicy,
    ) -> Self {
        Self { source, sink, retry }
    }

    /// Runs the ETL for every month in `[from, to]`.
    ///
    /// The range is validated before any network or database work. Source
    /// failures are contained per (period, page) unit; database failures are
    /// fatal and abort the run. If no unit of work succeeds at all, the run
    /// errors instead of silently reporting an empty summary.
    pub async fn run(&self, from: YearMonth, to: YearMonth) -> Result<FetchSummary, EtlError> {
        let months = YearMonth::range_inclusive(from, to)?;

        let mut summary = FetchSummary::default();
        let mut seen_codes: HashSet<String> = HashSet::new();
        let mut any_unit_succeeded = false;

        for month in months {
            let mut cursor: Option<String> = None;
            let mut page_no: u32 = 1;
            loop {
                match self.fetch_page_with_retry(month, cursor.as_deref()).await {
                    Ok(page) => {
                        any_unit_succeeded = true;
                        self.load_page(&page.records, &mut seen_codes, &mut summary)
                            .await?;
                        match page.next_cursor {
                            Some(next) => {
                                cursor = Some(next);
                                page_no += 1;
                            }
                            None => break,
                        }
                    }
                    Err(err) => {
                        warn!(period = %month, page = page_no, error = %err, "unit of work failed; moving on");
                        summary.failed_units.push(FailedUnit {
                            period: month,
                            page: page_no,
                            error: err.to_string(),
                        });
                        break;
                    }
                }
            }
        }

        if !any_unit_succeeded && !summary.failed_units.is_empty() {
            return Err(EtlError::SourceUnavailable);
        }

        info!(
            commodities = summary.commodities,
            monthly_rows = summary.monthly_rows,
            skipped_rows = summary.skipped_rows,
            failed_units = summary.failed_units.len(),
            "ETL run complete"
        );
        Ok(summary)
    }

    async fn fetch_page_with_retry(
        &self,
        period: YearMonth,
        cursor: Option<&str>,
    ) -> Result<api_client::responses::TradePage, api_client::error::ApiError> {
        let mut attempt: u32 = 1;
        loop {
            match self.source.fetch_page(period, cursor).await {
                Ok(page) => return Ok(page),
                Err(err) if err.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        period = %period,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient source error; backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Normalizes one page of raw rows and upserts them. Malformed rows are
    /// skipped with a logged reason and never abort the batch.
    async fn load_page(
        &self,
        records: &[RawTradeRecord],
        seen_codes: &mut HashSet<String>,
        summary: &mut FetchSummary,
    ) -> Result<(), EtlError> {
        for raw in records {
            let Some((commodity, record)) = parse_record(raw) else {
                debug!(code = ?raw.cmd_code, period = ?raw.period_str(), "skipping malformed record");
                summary.skipped_rows += 1;
                continue;
            };

            if seen_codes.insert(commodity.code.clone()) {
                self.sink.upsert_commodity(&commodity).await?;
            }
            self.sink.upsert_monthly_import(&record).await?;
            summary.monthly_rows += 1;
        }
        summary.commodities = seen_codes.len();
        Ok(())
    }
}

/// Turns one raw source row into commodity metadata plus a monthly import
/// record, or `None` when the row is malformed (no identifier digits, bad
/// period, negative value).
fn parse_record(raw: &RawTradeRecord) -> Option<(Commodity, MonthlyImport)> {
    let raw_code = raw.cmd_code.as_deref()?;
    if !normalize::has_code_digits(raw_code) {
        return None;
    }
    let code = normalize::canonical_code(raw_code);

    let period = raw.period_str()?;
    if period.len() != 6 {
        return None;
    }
    let year: i32 = period[..4].parse().ok()?;
    let month: u32 = period[4..6].parse().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }

    let value = match raw.trade_value_f64() {
        Some(v) if v < 0.0 => return None,
        Some(v) => Decimal::from_f64(v),
        None => None,
    };
    let qty = raw.quantity_f64().filter(|q| *q >= 0.0).and_then(Decimal::from_f64);
    // The source's partner-0 aggregate reports without a name.
    let partner = raw.partner().unwrap_or_else(|| "World".to_string());

    let title = raw
        .cmd_desc
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("HS {}", code));
    let description = raw
        .main_category
        .as_deref()
        .map(str::trim)
        .unwrap_or("")
        .to_string();
    let sectors = normalize::infer_sectors(&[&title, &description]);

    let commodity = Commodity {
        code: code.clone(),
        title,
        description,
        sectors,
        capex_min: None,
        capex_max: None,
    };
    let record = MonthlyImport { code, year, month, value, qty, partner };
    Some((commodity, record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use api_client::error::ApiError;
    use api_client::responses::TradePage;
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    fn ym(year: i32, month: u32) -> YearMonth {
        YearMonth::new(year, month).unwrap()
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    fn raw_record(code: &str, period: &str, value: f64, partner: &str) -> RawTradeRecord {
        RawTradeRecord {
            cmd_code: Some(code.to_string()),
            cmd_desc: Some("Static converters".to_string()),
            period: Some(json!(period)),
            trade_value: Some(json!(value)),
            partner_title: Some(partner.to_string()),
            ..Default::default()
        }
    }

    fn page(records: Vec<RawTradeRecord>, next_cursor: Option<&str>) -> TradePage {
        TradePage {
            records,
            next_cursor: next_cursor.map(str::to_string),
        }
    }

    /// Replays a scripted sequence of responses and records each call.
    #[derive(Default)]
    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<TradePage, ApiError>>>,
        calls: Mutex<Vec<(YearMonth, Option<String>)>>,
    }

    impl ScriptedSource {
        fn with(responses: Vec<Result<TradePage, ApiError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TradeDataSource for ScriptedSource {
        async fn fetch_page(
            &self,
            period: YearMonth,
            cursor: Option<&str>,
        ) -> Result<TradePage, ApiError> {
            self.calls
                .lock()
                .unwrap()
                .push((period, cursor.map(str::to_string)));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ApiError::Server(503)))
        }
    }

    /// Keyed like the database uniqueness index, so re-ingestion dedups.
    #[derive(Default)]
    struct MemorySink {
        commodities: Mutex<HashMap<String, Commodity>>,
        rows: Mutex<HashMap<(String, i32, u32, String), MonthlyImport>>,
    }

    #[async_trait]
    impl PersistenceSink for MemorySink {
        async fn upsert_commodity(&self, commodity: &Commodity) -> Result<(), DbError> {
            self.commodities
                .lock()
                .unwrap()
                .insert(commodity.code.clone(), commodity.clone());
            Ok(())
        }

        async fn upsert_monthly_import(&self, record: &MonthlyImport) -> Result<(), DbError> {
            let key = (
                record.code.clone(),
                record.year,
                record.month,
                record.partner.clone(),
            );
            self.rows.lock().unwrap().insert(key, record.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn transient_errors_retry_within_budget() {
        // Three 429s, then success on the fourth and final attempt.
        let source = ScriptedSource::with(vec![
            Err(ApiError::RateLimited),
            Err(ApiError::RateLimited),
            Err(ApiError::RateLimited),
            Ok(page(vec![raw_record("850440", "202401", 120_000.0, "China")], None)),
        ]);
        let sink = MemorySink::default();
        let fetcher = Fetcher::new(&source, &sink, fast_retry(4));

        let summary = fetcher.run(ym(2024, 1), ym(2024, 1)).await.unwrap();

        assert_eq!(source.call_count(), 4);
        assert!(summary.failed_units.is_empty());
        assert_eq!(summary.monthly_rows, 1);
        assert_eq!(sink.rows.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_record_the_unit_and_spare_siblings() {
        // January exhausts its 2-attempt budget; February succeeds.
        let source = ScriptedSource::with(vec![
            Err(ApiError::Server(503)),
            Err(ApiError::Server(503)),
            Ok(page(vec![raw_record("850440", "202402", 90_000.0, "China")], None)),
        ]);
        let sink = MemorySink::default();
        let fetcher = Fetcher::new(&source, &sink, fast_retry(2));

        let summary = fetcher.run(ym(2024, 1), ym(2024, 2)).await.unwrap();

        assert_eq!(summary.failed_units.len(), 1);
        assert_eq!(summary.failed_units[0].period, ym(2024, 1));
        assert_eq!(summary.failed_units[0].page, 1);
        assert_eq!(summary.monthly_rows, 1);
        let rows = sink.rows.lock().unwrap();
        assert!(rows.contains_key(&("850440".to_string(), 2024, 2, "China".to_string())));
    }

    #[tokio::test]
    async fn pagination_follows_the_cursor() {
        let source = ScriptedSource::with(vec![
            Ok(page(
                vec![raw_record("850440", "202401", 100.0, "China")],
                Some("abc"),
            )),
            Ok(page(
                vec![raw_record("850760", "202401", 200.0, "Japan")],
                None,
            )),
        ]);
        let sink = MemorySink::default();
        let fetcher = Fetcher::new(&source, &sink, fast_retry(4));

        let summary = fetcher.run(ym(2024, 1), ym(2024, 1)).await.unwrap();

        let calls = source.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, None);
        assert_eq!(calls[1].1.as_deref(), Some("abc"));
        drop(calls);
        assert_eq!(summary.monthly_rows, 2);
        assert_eq!(summary.commodities, 2);
    }

    #[tokio::test]
    async fn reingestion_is_idempotent_on_the_uniqueness_key() {
        let records = || {
            vec![
                raw_record("850440", "202401", 100.0, "China"),
                raw_record("850440", "202401", 40.0, "Germany"),
            ]
        };
        let sink = MemorySink::default();
        for _ in 0..2 {
            let source = ScriptedSource::with(vec![Ok(page(records(), None))]);
            let fetcher = Fetcher::new(&source, &sink, fast_retry(4));
            fetcher.run(ym(2024, 1), ym(2024, 1)).await.unwrap();
        }
        assert_eq!(sink.rows.lock().unwrap().len(), 2);
        assert_eq!(sink.commodities.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn malformed_rows_are_skipped_not_fatal() {
        let bad_code = RawTradeRecord {
            cmd_code: Some("no digits".to_string()),
            period: Some(json!("202401")),
            ..Default::default()
        };
        let bad_period = RawTradeRecord {
            cmd_code: Some("850440".to_string()),
            period: Some(json!("2024")),
            ..Default::default()
        };
        let negative_value = raw_record("850440", "202401", -5.0, "China");
        let good = raw_record("850760", "202401", 10.0, "China");

        let source = ScriptedSource::with(vec![Ok(page(
            vec![bad_code, bad_period, negative_value, good],
            None,
        ))]);
        let sink = MemorySink::default();
        let fetcher = Fetcher::new(&source, &sink, fast_retry(4));

        let summary = fetcher.run(ym(2024, 1), ym(2024, 1)).await.unwrap();

        assert_eq!(summary.skipped_rows, 3);
        assert_eq!(summary.monthly_rows, 1);
        assert_eq!(sink.rows.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_range_is_rejected_before_any_work() {
        let source = ScriptedSource::default();
        let sink = MemorySink::default();
        let fetcher = Fetcher::new(&source, &sink, fast_retry(4));

        let result = fetcher.run(ym(2024, 5), ym(2024, 1)).await;

        assert!(matches!(result, Err(EtlError::InvalidPeriodRange(_))));
        assert_eq!(source.call_count(), 0);
    }

    #[tokio::test]
    async fn total_source_loss_fails_loudly() {
        let source = ScriptedSource::with(vec![]);
        let sink = MemorySink::default();
        let fetcher = Fetcher::new(&source, &sink, fast_retry(2));

        let result = fetcher.run(ym(2024, 1), ym(2024, 2)).await;

        assert!(matches!(result, Err(EtlError::SourceUnavailable)));
        assert!(sink.rows.lock().unwrap().is_empty());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
        };
        assert_eq!(retry.delay_for(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for(2), Duration::from_millis(200));
        assert_eq!(retry.delay_for(3), Duration::from_millis(300));
        assert_eq!(retry.delay_for(4), Duration::from_millis(300));
    }

    #[test]
    fn world_partner_backfills_missing_names() {
        let mut raw = raw_record("850440", "202401", 10.0, "China");
        raw.partner_title = None;
        let (_, record) = parse_record(&raw).unwrap();
        assert_eq!(record.partner, "World");
    }
}
