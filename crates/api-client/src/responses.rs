use serde::Deserialize;
use serde_json::Value as JsonValue;

/// One parsed page from the statistics source.
#[derive(Debug, Clone, Default)]
pub struct TradePage {
    pub records: Vec<RawTradeRecord>,
    /// Opaque cursor for the next page, when the source reports one.
    pub next_cursor: Option<String>,
}

/// A raw monthly trade row as the source serializes it.
///
/// Numeric fields arrive as either JSON numbers or strings depending on the
/// endpoint revision, so they are kept loose here and coerced by accessors;
/// rows that do not coerce are the ETL layer's problem to skip.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTradeRecord {
    #[serde(rename = "cmdCode")]
    pub cmd_code: Option<String>,
    #[serde(rename = "cmdDescE")]
    pub cmd_desc: Option<String>,
    #[serde(rename = "mainCategory")]
    pub main_category: Option<String>,
    #[serde(rename = "flowCode")]
    pub flow_code: Option<String>,
    #[serde(rename = "ptTitle")]
    pub partner_title: Option<String>,
    #[serde(rename = "pt3ISO")]
    pub partner_iso: Option<String>,
    #[serde(default)]
    pub period: Option<JsonValue>,
    #[serde(rename = "TradeValue", default)]
    pub trade_value: Option<JsonValue>,
    #[serde(rename = "NetWeight", default)]
    pub net_weight: Option<JsonValue>,
    #[serde(default)]
    pub qty: Option<JsonValue>,
}

fn coerce_f64(value: Option<&JsonValue>) -> Option<f64> {
    match value? {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl RawTradeRecord {
    /// The `YYYYMM` period string, whichever way the source encoded it.
    pub fn period_str(&self) -> Option<String> {
        match self.period.as_ref()? {
            JsonValue::Number(n) => Some(n.to_string()),
            JsonValue::String(s) => Some(s.trim().to_string()),
            _ => None,
        }
    }

    pub fn trade_value_f64(&self) -> Option<f64> {
        coerce_f64(self.trade_value.as_ref())
    }

    /// Quantity: net weight when reported, otherwise the generic qty field.
    pub fn quantity_f64(&self) -> Option<f64> {
        coerce_f64(self.net_weight.as_ref()).or_else(|| coerce_f64(self.qty.as_ref()))
    }

    /// Partner display name, falling back to the ISO code.
    pub fn partner(&self) -> Option<String> {
        let title = self.partner_title.as_deref().map(str::trim).unwrap_or("");
        if !title.is_empty() {
            return Some(title.to_string());
        }
        let iso = self.partner_iso.as_deref().map(str::trim).unwrap_or("");
        if !iso.is_empty() {
            return Some(iso.to_string());
        }
        None
    }
}

/// The raw response envelope: records under `dataset` (or `data` on older
/// revisions), a pagination link, and an optional validation verdict.
#[derive(Debug, Default, Deserialize)]
pub struct TradePayload {
    #[serde(default)]
    pub dataset: Option<Vec<RawTradeRecord>>,
    #[serde(default)]
    pub data: Option<Vec<RawTradeRecord>>,
    #[serde(default)]
    pub links: Option<PayloadLinks>,
    #[serde(default)]
    pub validation: Option<PayloadValidation>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PayloadLinks {
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PayloadValidation {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
