use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};

/// Quantizes `value` to `places` fractional digits, half-even (banker's
/// rounding) — matches Python's `Decimal.quantize` default, which is what
/// the original exchange client relied on. Never use `Decimal::round_dp`
/// (half-up) for money math in this crate.
pub fn quantize(value: Decimal, places: u32) -> Decimal {
    value.round_dp_with_strategy(places, RoundingStrategy::MidpointNearestEven)
}

/// A currency traded on the exchange. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Currency {
    pub name: String,
    pub places: u32,
}

impl Currency {
    pub fn new(name: impl Into<String>, places: u32) -> Self {
        Self {
            name: name.into(),
            places,
        }
    }

    /// Lower-cased wire form, e.g. "btc" for `Currency::new("BTC", 6)`.
    pub fn code(&self) -> String {
        self.name.to_ascii_lowercase()
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// An ordered pair of currencies, e.g. BTC/USD. Prices are quoted in
/// `second` per unit of `first`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CurrencyPair {
    pub first: Currency,
    pub second: Currency,
}

impl CurrencyPair {
    pub fn new(first: Currency, second: Currency) -> Self {
        Self { first, second }
    }

    /// Wire encoding used by the exchange: `"<first>_<second>"`, both sides
    /// lower-cased (spec.md §4.2 "Pair string encoding").
    pub fn code(&self) -> String {
        format!("{}_{}", self.first.code(), self.second.code())
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.first, self.second)
    }
}

/// Per-pair trading configuration, immutable for the lifetime of the engine.
#[derive(Debug, Clone)]
pub struct TradingOptions {
    pub pair: CurrencyPair,
    pub margin: Decimal,
    pub margin_jitter: Decimal,
    pub min_amount: Decimal,
    pub deal_amount: Option<Decimal>,
    pub price_jump_value: Decimal,
}

impl TradingOptions {
    /// `deal_amount` defaults to `min_amount` when absent (spec.md §3).
    pub fn deal_amount(&self) -> Decimal {
        self.deal_amount.unwrap_or(self.min_amount)
    }
}

impl fmt::Display for TradingOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pair)
    }
}

/// An exchange order id. The exchange assigns these; the wire form is
/// parsed as an integer when possible, kept as a string otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OrderId {
    Numeric(i64),
    Text(String),
}

impl OrderId {
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<i64>() {
            Ok(n) => OrderId::Numeric(n),
            Err(_) => OrderId::Text(raw.to_owned()),
        }
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderId::Numeric(n) => write!(f, "{}", n),
            OrderId::Text(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Sell,
    Buy,
}

impl OrderSide {
    /// Mirrors this side (used when building the counter-offer, spec.md §4.3.3 T2).
    pub fn opposite(self) -> OrderSide {
        match self {
            OrderSide::Sell => OrderSide::Buy,
            OrderSide::Buy => OrderSide::Sell,
        }
    }

    /// Wire form used for the `Trade` trade-API method.
    pub fn wire(self) -> &'static str {
        match self {
            OrderSide::Sell => "sell",
            OrderSide::Buy => "buy",
        }
    }

    /// "sell" maps to SELL, anything else (in practice only "buy") maps to BUY.
    pub fn from_wire(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("sell") {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        }
    }
}

/// A value object describing one order. Equality and hashing are by `id`
/// alone: the exchange is the system of record, not this struct.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: OrderId,
    pub side: OrderSide,
    pub amount: Decimal,
    pub price: Decimal,
    pub created: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
}

impl PartialEq for Order {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Order {}

impl std::hash::Hash for Order {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.side {
            OrderSide::Sell => write!(f, "{} (sell {} for {})", self.id, self.amount, self.price),
            OrderSide::Buy => write!(f, "{} (buy {} for {})", self.id, self.amount, self.price),
        }
    }
}

/// Commands emitted by a Trader and consumed by the Connector.
#[derive(Debug, Clone)]
pub enum Command {
    GetServerTime,
    GetPrice {
        pair: CurrencyPair,
    },
    GetBalance {
        currency: Currency,
    },
    GetActiveOrders {
        pair: CurrencyPair,
    },
    GetCompletedOrders {
        pair: CurrencyPair,
    },
    CreateSellOrder {
        pair: CurrencyPair,
        amount: Decimal,
        price: Decimal,
    },
    CreateBuyOrder {
        pair: CurrencyPair,
        amount: Decimal,
        price: Decimal,
    },
    CancelOrder {
        order_id: OrderId,
    },
}

/// Events emitted by the Connector and consumed by Traders.
#[derive(Debug, Clone)]
pub enum Event {
    Time {
        value: DateTime<Utc>,
    },
    Price {
        pair: CurrencyPair,
        value: Decimal,
    },
    Balance {
        currency: Currency,
        value: Decimal,
    },
    ActiveOrders {
        pair: CurrencyPair,
        orders: Vec<Order>,
    },
    CompletedOrders {
        pair: CurrencyPair,
        orders: Vec<Order>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    #[test]
    fn quantize_is_half_even() {
        // 2.005 at 2 places: nearest-even keeps 2.00 (rust_decimal internally
        // represents 2.005 exactly, unlike f64, so half-even applies cleanly).
        assert_eq!(quantize(dec!(2.005), 2), dec!(2.00));
        assert_eq!(quantize(dec!(2.015), 2), dec!(2.02));
        assert_eq!(quantize(dec!(1.23456), 3), dec!(1.235));
    }

    #[test]
    fn pair_code_is_lower_cased_and_underscore_joined() {
        let pair = CurrencyPair::new(Currency::new("BTC", 6), Currency::new("USD", 3));
        assert_eq!(pair.code(), "btc_usd");
    }

    #[test]
    fn order_id_parses_numeric_when_possible() {
        assert_eq!(OrderId::parse("12345"), OrderId::Numeric(12345));
        assert_eq!(OrderId::parse("abc-1"), OrderId::Text("abc-1".to_owned()));
    }

    #[test]
    fn orders_are_equal_by_id_alone() {
        let a = Order {
            id: OrderId::Numeric(1),
            side: OrderSide::Sell,
            amount: dec!(1),
            price: dec!(100),
            created: None,
            completed: None,
        };
        let b = Order {
            id: OrderId::Numeric(1),
            side: OrderSide::Buy,
            amount: dec!(99),
            price: dec!(1),
            created: None,
            completed: None,
        };
        assert_eq!(a, b);
    }

    #[test]
    fn deal_amount_defaults_to_min_amount() {
        let options = TradingOptions {
            pair: CurrencyPair::new(Currency::new("BTC", 6), Currency::new("USD", 3)),
            margin: dec!(0.05),
            margin_jitter: dec!(0),
            min_amount: dec!(0.01),
            deal_amount: None,
            price_jump_value: dec!(0.05),
        };
        assert_eq!(options.deal_amount(), dec!(0.01));
    }
}
