use rust_decimal::Decimal;

use crate::core::connector::transport::parse_unix_timestamp;
use crate::core::error::EngineError;
use crate::core::model::{quantize, CurrencyPair, Order, OrderId, OrderSide};

/// Normalizes the `ActiveOrders`/`TradeHistory` trade-API response, which is
/// a JSON object keyed by order id, filtered down to the requested pair
/// (spec.md §4.2 "Order normalization").
///
/// `timestamp_field` is `"timestamp_created"` for active orders (→ `created`)
/// or `"timestamp"` for completed orders (→ `completed`).
pub fn normalize_orders(
    payload: &serde_json::Value,
    pair: &CurrencyPair,
    timestamp_field: &str,
    as_completed: bool,
) -> Result<Vec<Order>, EngineError> {
    let object = payload
        .as_object()
        .ok_or_else(|| EngineError::Decode("expected an object keyed by order id".to_owned()))?;

    let mut orders = Vec::new();
    for (id, data) in object {
        let order_pair = data
            .get("pair")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::Decode(format!("order {} missing `pair`", id)))?;
        if order_pair != pair.code() {
            continue;
        }

        let side = data
            .get("type")
            .and_then(|v| v.as_str())
            .map(OrderSide::from_wire)
            .ok_or_else(|| EngineError::Decode(format!("order {} missing `type`", id)))?;

        let amount = decode_decimal(data, "amount", id)?;
        let price = decode_decimal(data, "rate", id)?;

        let timestamp = data
            .get(timestamp_field)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| EngineError::Decode(format!("order {} missing `{}`", id, timestamp_field)))?;
        let when = parse_unix_timestamp(timestamp);

        let mut order = Order {
            id: OrderId::parse(id),
            side,
            amount: quantize(amount, pair.first.places),
            price: quantize(price, pair.second.places),
            created: None,
            completed: None,
        };
        if as_completed {
            order.completed = when;
        } else {
            order.created = when;
        }

        orders.push(order);
    }

    if as_completed {
        orders.sort_by(|a, b| b.completed.cmp(&a.completed));
    } else {
        orders.sort_by(|a, b| a.price.cmp(&b.price));
    }

    Ok(orders)
}

fn decode_decimal(data: &serde_json::Value, field: &str, id: &str) -> Result<Decimal, EngineError> {
    let raw = data
        .get(field)
        .ok_or_else(|| EngineError::Decode(format!("order {} missing `{}`", id, field)))?;
    let as_string = raw
        .as_str()
        .map(|s| s.to_owned())
        .or_else(|| raw.as_f64().map(|f| f.to_string()))
        .ok_or_else(|| EngineError::Decode(format!("order {} `{}` is not a number", id, field)))?;
    as_string
        .parse::<Decimal>()
        .map_err(|e| EngineError::Decode(format!("order {} `{}`: {}", id, field, e)))
}

/// Normalizes the `funds` map returned by `getInfo`/`Trade`/`CancelOrder`
/// into `(currency code, amount)` pairs.
pub fn normalize_funds(payload: &serde_json::Value) -> Result<Vec<(String, Decimal)>, EngineError> {
    let funds = payload
        .get("funds")
        .and_then(|v| v.as_object())
        .ok_or_else(|| EngineError::Decode("expected `funds` object".to_owned()))?;

    funds
        .iter()
        .map(|(currency, value)| {
            let amount = value
                .as_str()
                .map(|s| s.to_owned())
                .or_else(|| value.as_f64().map(|f| f.to_string()))
                .ok_or_else(|| EngineError::Decode(format!("funds.{} is not a number", currency)))?;
            amount
                .parse::<Decimal>()
                .map(|d| (currency.clone(), d))
                .map_err(|e| EngineError::Decode(format!("funds.{}: {}", currency, e)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use crate::core::model::Currency;

    fn btc_usd() -> CurrencyPair {
        CurrencyPair::new(Currency::new("BTC", 6), Currency::new("USD", 3))
    }

    #[test]
    fn normalizes_active_orders_sorted_by_price_ascending() {
        let payload = serde_json::json!({
            "1": {"pair": "btc_usd", "type": "sell", "amount": "0.01", "rate": "120.5",
                  "timestamp_created": 1_600_000_100i64},
            "2": {"pair": "btc_usd", "type": "buy", "amount": "0.02", "rate": "95.25",
                  "timestamp_created": 1_600_000_000i64},
            "3": {"pair": "eth_usd", "type": "sell", "amount": "1", "rate": "10",
                  "timestamp_created": 1_600_000_000i64},
        });

        let orders = normalize_orders(&payload, &btc_usd(), "timestamp_created", false).unwrap();

        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].id, OrderId::Numeric(2));
        assert_eq!(orders[0].side, OrderSide::Buy);
        assert_eq!(orders[0].price, dec!(95.250));
        assert_eq!(orders[1].id, OrderId::Numeric(1));
        assert!(orders[0].created.is_some());
    }

    #[test]
    fn normalizes_completed_orders_sorted_by_completed_descending() {
        let payload = serde_json::json!({
            "10": {"pair": "btc_usd", "type": "sell", "amount": "0.01", "rate": "100",
                   "timestamp": 1_600_000_000i64},
            "11": {"pair": "btc_usd", "type": "buy", "amount": "0.01", "rate": "100",
                   "timestamp": 1_600_000_500i64},
        });

        let orders = normalize_orders(&payload, &btc_usd(), "timestamp", true).unwrap();
        assert_eq!(orders[0].id, OrderId::Numeric(11));
        assert_eq!(orders[1].id, OrderId::Numeric(10));
        assert!(orders[0].completed.is_some());
    }

    #[test]
    fn normalizes_funds_map() {
        let payload = serde_json::json!({"funds": {"btc": "1.5", "usd": "1000.25"}});
        let mut funds = normalize_funds(&payload).unwrap();
        funds.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(funds, vec![("btc".to_owned(), dec!(1.5)), ("usd".to_owned(), dec!(1000.25))]);
    }
}
