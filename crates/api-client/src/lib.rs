use crate::error::ApiError;
use crate::responses::{TradePage, TradePayload};
use async_trait::async_trait;
use configuration::SourceConfig;
use core_types::YearMonth;
use reqwest::Url;
use tracing::debug;

pub mod error;
pub mod responses;

// --- Public API ---
pub use responses::RawTradeRecord;

/// The generic, abstract interface for the external trade-statistics source.
/// This trait is the contract the ETL fetcher uses, allowing the underlying
/// implementation (live or mock) to be swapped out.
#[async_trait]
pub trait TradeDataSource: Send + Sync {
    /// Fetches one page of monthly commodity-level import records for the
    /// configured reporting country. `cursor` is `None` for the first page
    /// of a period and the previously returned cursor afterwards.
    async fn fetch_page(
        &self,
        period: YearMonth,
        cursor: Option<&str>,
    ) -> Result<TradePage, ApiError>;
}

/// A concrete implementation of `TradeDataSource` for the UN Comtrade
/// preview API.
#[derive(Debug, Clone)]
pub struct ComtradeClient {
    client: reqwest::Client,
    base_url: String,
    reporter: String,
    flow: String,
    frequency: String,
}

impl ComtradeClient {
    pub fn new(config: &SourceConfig) -> Result<Self, ApiError> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            reporter: config.reporter.clone(),
            flow: config.flow.clone(),
            frequency: config.frequency.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/get/HS", self.base_url)
    }
}

/// Pulls the opaque `cursor` query parameter out of a `links.next` URL.
fn cursor_from_next_link(next: &str) -> Option<String> {
    let url = Url::parse(next).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "cursor")
        .map(|(_, value)| value.into_owned())
}

#[async_trait]
impl TradeDataSource for ComtradeClient {
    async fn fetch_page(
        &self,
        period: YearMonth,
        cursor: Option<&str>,
    ) -> Result<TradePage, ApiError> {
        let compact = period.compact();
        let mut params = vec![
            ("reporter", self.reporter.as_str()),
            ("flow", self.flow.as_str()),
            ("frequency", self.frequency.as_str()),
            ("time_period", compact.as_str()),
            ("type", "C"),
            ("classification", "HS"),
        ];
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor));
        }

        let response = self
            .client
            .get(self.endpoint())
            .query(&params)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ApiError::RateLimited);
        }
        if status.is_server_error() {
            return Err(ApiError::Server(status.as_u16()));
        }
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }

        let text = response.text().await?;
        let payload: TradePayload = serde_json::from_str(&text)
            .map_err(|e| ApiError::Deserialization(e.to_string()))?;

        if let Some(validation) = &payload.validation {
            if validation.status.as_deref() == Some("ERROR") {
                return Err(ApiError::Validation(
                    validation.message.clone().unwrap_or_default(),
                ));
            }
        }

        let records = payload.dataset.or(payload.data).unwrap_or_default();
        let next_cursor = payload
            .links
            .as_ref()
            .and_then(|links| links.next.as_deref())
            .and_then(cursor_from_next_link);
        debug!(period = %period, rows = records.len(), has_next = next_cursor.is_some(), "fetched page");

        Ok(TradePage { records, next_cursor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_is_extracted_from_next_link() {
        let next = "https://example.com/api?reporter=India&cursor=abc123";
        assert_eq!(cursor_from_next_link(next).as_deref(), Some("abc123"));
        assert_eq!(cursor_from_next_link("https://example.com/api"), None);
        assert_eq!(cursor_from_next_link("not a url"), None);
    }

    #[test]
    fn raw_record_coerces_string_and_numeric_values() {
        let json = r#"{
            "cmdCode": "850440",
            "cmdDescE": "Static converters",
            "period": 202401,
            "TradeValue": "120000.5",
            "NetWeight": 900,
            "ptTitle": "  China "
        }"#;
        let record: RawTradeRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.period_str().as_deref(), Some("202401"));
        assert_eq!(record.trade_value_f64(), Some(120000.5));
        assert_eq!(record.quantity_f64(), Some(900.0));
        assert_eq!(record.partner().as_deref(), Some("China"));
    }

    #[test]
    fn partner_falls_back_to_iso_code() {
        let record = RawTradeRecord {
            partner_iso: Some("DEU".to_string()),
            ..Default::default()
        };
        assert_eq!(record.partner().as_deref(), Some("DEU"));
        assert_eq!(RawTradeRecord::default().partner(), None);
    }
}
