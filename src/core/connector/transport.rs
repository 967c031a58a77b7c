use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::core::connector::nonce::NonceKeeper;
use crate::core::connector::signing::{encode_body, sign};
use crate::core::error::EngineError;
use crate::core::model::CurrencyPair;

/// Abstracts "send one signed trade-API request, get back the parsed
/// `return` payload" so the retry logic (spec.md §4.2 "Retry policy") and
/// the HTTP plumbing can be tested independently — tests substitute a
/// `mockall`-generated fake instead of hitting the network.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TradeApiTransport: Send + Sync {
    async fn call(
        &self,
        method: &'static str,
        params: Vec<(&'static str, String)>,
    ) -> Result<serde_json::Value, EngineError>;
}

/// `reqwest`-backed implementation of the BTC-e-style `tapi` endpoint.
pub struct HttpTradeApiTransport {
    http: reqwest::Client,
    url: String,
    api_key: String,
    api_secret: String,
    nonce: Arc<NonceKeeper>,
}

impl HttpTradeApiTransport {
    pub fn new(
        http: reqwest::Client,
        site: &str,
        api_key: String,
        api_secret: String,
        nonce: Arc<NonceKeeper>,
    ) -> Self {
        Self {
            http,
            url: format!("{}/tapi", site.trim_end_matches('/')),
            api_key,
            api_secret,
            nonce,
        }
    }
}

#[async_trait]
impl TradeApiTransport for HttpTradeApiTransport {
    async fn call(
        &self,
        method: &'static str,
        params: Vec<(&'static str, String)>,
    ) -> Result<serde_json::Value, EngineError> {
        let nonce = self.nonce.get().await?;
        let body = encode_body(method, nonce, &params);
        let signature = sign(&self.api_secret, &body);

        log::debug!("tapi request: method={} nonce={}", method, nonce);

        let response = self
            .http
            .post(&self.url)
            .header("Key", &self.api_key)
            .header("Sign", signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::Decode(e.to_string()))?;

        log::debug!("tapi response: {}", payload);

        let success = payload.get("success").and_then(|v| v.as_i64()).unwrap_or(0);
        if success == 1 {
            return Ok(payload
                .get("return")
                .cloned()
                .unwrap_or(serde_json::Value::Null));
        }

        let error_message = payload
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
            .to_owned();

        if EngineError::is_empty_result(&error_message) {
            Err(EngineError::EmptyResult)
        } else {
            Err(EngineError::ExchangeRejected(error_message))
        }
    }
}

/// The public (unauthenticated) ticker endpoint. No in-flight restriction:
/// concurrent calls are fine (spec.md §4.2).
#[derive(Clone)]
pub struct PublicApiClient {
    http: reqwest::Client,
    site: String,
}

impl PublicApiClient {
    pub fn new(http: reqwest::Client, site: &str) -> Self {
        Self {
            http,
            site: site.trim_end_matches('/').to_owned(),
        }
    }

    /// `GET {site}/api/3/ticker/{pair}` → last price, quantized to
    /// `pair.second.places`.
    pub async fn get_price(&self, pair: &CurrencyPair) -> Result<Decimal, EngineError> {
        let code = pair.code();
        let url = format!("{}/api/3/ticker/{}", self.site, code);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::Decode(e.to_string()))?;

        let last = payload
            .get(&code)
            .and_then(|v| v.get("last"))
            .ok_or_else(|| EngineError::Decode(format!("no `{}.last` in ticker response", code)))?;
        let last = last
            .as_str()
            .map(|s| s.to_owned())
            .or_else(|| last.as_f64().map(|f| f.to_string()))
            .ok_or_else(|| EngineError::Decode("ticker `last` is neither string nor number".into()))?;

        last.parse::<Decimal>()
            .map(|value| crate::core::model::quantize(value, pair.second.places))
            .map_err(|e| EngineError::Decode(format!("cannot parse price `{}`: {}", last, e)))
    }

    /// Server time. Per spec.md §4.2 this command "uses local clock" — there
    /// is no local-time ticker endpoint to call.
    pub fn get_server_time(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Parses an exchange UTC unix timestamp (as used in `timestamp_created`/`timestamp`).
pub fn parse_unix_timestamp(seconds: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0).single()
}
