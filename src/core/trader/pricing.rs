use rand::Rng;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use crate::core::model::{quantize, Order, OrderSide, TradingOptions};

/// An order the Trader decided to place, before it becomes a `Command`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderPlan {
    pub amount: Decimal,
    pub price: Decimal,
}

/// `uniform(-margin_jitter, +margin_jitter)`, quantized to 4 places
/// (spec.md §4.3.3 "Pricing formula").
pub fn random_margin_jitter(margin_jitter: Decimal) -> Decimal {
    if margin_jitter <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let bound = margin_jitter.to_f64().unwrap_or(0.0);
    let raw = rand::thread_rng().gen_range(-bound..=bound);
    quantize(Decimal::from_f64(raw).unwrap_or(Decimal::ZERO), 4)
}

/// Sell-side pricing/amount/affordability (spec.md §4.3.3). `None` means the
/// guard failed — caller logs "not enough funds" and emits nothing.
pub fn sell_plan(
    reference_price: Decimal,
    first_balance: Decimal,
    options: &TradingOptions,
    jitter: Decimal,
) -> Option<OrderPlan> {
    let margin = options.margin + jitter;
    let price = quantize(
        reference_price * (Decimal::ONE + margin),
        options.pair.second.places,
    );
    let amount = match options.deal_amount {
        Some(deal_amount) => deal_amount,
        None => first_balance.max(options.min_amount),
    };

    if amount <= first_balance {
        Some(OrderPlan { amount, price })
    } else {
        None
    }
}

/// Buy-side pricing/amount/affordability (spec.md §4.3.3).
pub fn buy_plan(
    reference_price: Decimal,
    second_balance: Decimal,
    options: &TradingOptions,
    jitter: Decimal,
) -> Option<OrderPlan> {
    let margin = options.margin + jitter;
    let price = quantize(
        reference_price * (Decimal::ONE - margin),
        options.pair.second.places,
    );
    let amount = match options.deal_amount {
        Some(deal_amount) => deal_amount,
        None => {
            let computed = quantize(second_balance / price, options.pair.first.places);
            options.min_amount.max(computed)
        }
    };

    if amount * price <= second_balance {
        Some(OrderPlan { amount, price })
    } else {
        None
    }
}

/// T2 — mirrors a just-completed order: side flipped, same amount, price
/// shifted by margin away from the completed fill (spec.md §4.3.3 T2).
/// A completed BUY mirrors to a SELL (price up); a completed SELL mirrors to
/// a BUY (price down). `None` means the guard failed.
pub fn mirror_plan(
    completed: &Order,
    options: &TradingOptions,
    jitter: Decimal,
    first_balance: Decimal,
    second_balance: Decimal,
) -> Option<(OrderSide, OrderPlan)> {
    let margin = options.margin + jitter;
    let amount = completed.amount;
    if amount < options.min_amount {
        return None;
    }

    match completed.side {
        OrderSide::Buy => {
            let price = quantize(
                completed.price * (Decimal::ONE + margin),
                options.pair.second.places,
            );
            if amount <= first_balance {
                Some((OrderSide::Sell, OrderPlan { amount, price }))
            } else {
                None
            }
        }
        OrderSide::Sell => {
            let price = quantize(
                completed.price * (Decimal::ONE - margin),
                options.pair.second.places,
            );
            if amount * price <= second_balance {
                Some((OrderSide::Buy, OrderPlan { amount, price }))
            } else {
                None
            }
        }
    }
}
