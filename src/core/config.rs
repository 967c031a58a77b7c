use std::path::PathBuf;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::core::error::EngineError;
use crate::core::model::{Currency, CurrencyPair, TradingOptions};

/// On-disk shape of the TOML config (spec.md §6 Configuration table).
#[derive(Debug, Deserialize)]
struct RawSettings {
    exchange_site: String,
    api_key: String,
    api_secret: String,
    #[serde(default = "default_data_dir")]
    data_dir: String,
    #[serde(default = "default_order_outdate_period_days")]
    order_outdate_period_days: i64,
    #[serde(default)]
    exchange_margin: Decimal,
    trading: Vec<RawTradingOptions>,
}

#[derive(Debug, Deserialize)]
struct RawCurrency {
    name: String,
    places: u32,
}

#[derive(Debug, Deserialize)]
struct RawTradingOptions {
    first: RawCurrency,
    second: RawCurrency,
    margin: Decimal,
    #[serde(default)]
    margin_jitter: Decimal,
    min_amount: Decimal,
    deal_amount: Option<Decimal>,
    price_jump_value: Decimal,
}

fn default_data_dir() -> String {
    "data".to_owned()
}

fn default_order_outdate_period_days() -> i64 {
    35
}

/// Fully validated, in-memory configuration for one engine run.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub exchange_site: String,
    pub api_key: String,
    pub api_secret: String,
    pub data_dir: PathBuf,
    pub order_outdate_period_days: i64,
    pub trading: Vec<TradingOptions>,
}

impl EngineSettings {
    pub fn nonce_path(&self) -> PathBuf {
        self.data_dir.join("nonce")
    }
}

/// Loads and validates the TOML configuration at `path`.
///
/// `exchange_margin` (if present) is added into every pair's `margin` once,
/// here, rather than at every pricing calculation (spec.md §3, §6) —
/// mirrors the original's module-level `MARGIN = EXCHANGE_MARGIN + TRADER_MARGIN`.
pub fn load_settings(path: &str) -> Result<EngineSettings, EngineError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| EngineError::Config(format!("cannot read {}: {}", path, e)))?;
    let raw: RawSettings =
        toml::from_str(&contents).map_err(|e| EngineError::Config(format!("{}", e)))?;

    if raw.trading.is_empty() {
        return Err(EngineError::Config(
            "`trading` must list at least one pair".to_owned(),
        ));
    }

    let mut trading = Vec::with_capacity(raw.trading.len());
    for entry in raw.trading {
        if entry.first.name.is_empty() || entry.second.name.is_empty() {
            return Err(EngineError::Config(
                "currency name must not be empty".to_owned(),
            ));
        }
        if entry.min_amount <= Decimal::ZERO {
            return Err(EngineError::Config(
                "min_amount must be positive".to_owned(),
            ));
        }
        if entry.price_jump_value <= Decimal::ZERO {
            return Err(EngineError::Config(
                "price_jump_value must be positive".to_owned(),
            ));
        }

        trading.push(TradingOptions {
            pair: CurrencyPair::new(
                Currency::new(entry.first.name, entry.first.places),
                Currency::new(entry.second.name, entry.second.places),
            ),
            margin: entry.margin + raw.exchange_margin,
            margin_jitter: entry.margin_jitter,
            min_amount: entry.min_amount,
            deal_amount: entry.deal_amount,
            price_jump_value: entry.price_jump_value,
        });
    }

    Ok(EngineSettings {
        exchange_site: raw.exchange_site,
        api_key: raw.api_key,
        api_secret: raw.api_secret,
        data_dir: PathBuf::from(raw.data_dir),
        order_outdate_period_days: raw.order_outdate_period_days,
        trading,
    })
}
