pub mod pricing;

use std::collections::HashSet;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{info, warn};
use rust_decimal::Decimal;
use tokio::time::{interval, Duration as TokioDuration, MissedTickBehavior};

use crate::core::bus::Bus;
use crate::core::cancellation::CancellationToken;
use crate::core::model::{Command, Event, Order, OrderId, OrderSide, TradingOptions};
use crate::core::trader::pricing::{buy_plan, mirror_plan, random_margin_jitter, sell_plan};

/// `balance(currency)` fold: `(new_balance, new_balance - previous)`, with
/// `change = 0` on the first observation (spec.md §4.3.2, property 1).
fn scan_balance(previous: Option<Decimal>, new_value: Decimal) -> (Decimal, Decimal) {
    let change = previous.map(|p| new_value - p).unwrap_or(Decimal::ZERO);
    (new_value, change)
}

/// `jumping_price` fold: the stored reference only moves when the relative
/// change against it is at least `price_jump_value` (spec.md §4.3.2).
/// Returns the (possibly unchanged) reference value.
fn scan_jumping_price(previous: Option<Decimal>, new_value: Decimal, price_jump_value: Decimal) -> Decimal {
    match previous {
        None => new_value,
        Some(p) if p.is_zero() => new_value,
        Some(p) => {
            let relative_change = (new_value - p).abs() / p;
            if relative_change >= price_jump_value {
                new_value
            } else {
                p
            }
        }
    }
}

/// `completed_orders_singly`: `latest_set - seen`, by id, then the newly
/// seen ids are folded into `seen` in place (spec.md §4.3.2, property 3).
fn completed_orders_singly(seen: &mut HashSet<OrderId>, latest: &[Order]) -> Vec<Order> {
    let mut fresh = Vec::new();
    for order in latest {
        if seen.insert(order.id.clone()) {
            fresh.push(order.clone());
        }
    }
    fresh
}

fn is_outdated(order: &Order, now: DateTime<Utc>, outdate_period: ChronoDuration) -> bool {
    match order.created {
        Some(created) => now - created > outdate_period,
        None => false,
    }
}

/// Spawns a timer that ticks immediately, then every `period`, publishing
/// `command` on the command bus until `cancellation` fires (spec.md §4.3.1).
fn spawn_timer(
    bus: Bus,
    cancellation: CancellationToken,
    period: TokioDuration,
    command: impl Fn() -> Command + Send + 'static,
) {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancellation.when_cancelled() => break,
                _ = ticker.tick() => bus.commands.publish(command()),
            }
        }
    });
}

/// Per-pair decision engine. Holds all state the reactive pipeline would
/// otherwise close over (spec.md §4.3): latest balances, the jumping-price
/// reference, the set of completed order ids already emitted, and the
/// throttle timestamp for time/price logging.
pub struct Trader {
    bus: Bus,
    options: TradingOptions,
    outdate_period: ChronoDuration,

    price_reference: Option<Decimal>,
    first_balance: Option<Decimal>,
    second_balance: Option<Decimal>,
    seen_completed: HashSet<OrderId>,
    last_logged_price_at: Option<DateTime<Utc>>,
    price_log_throttle: ChronoDuration,
    last_logged_first_balance: Option<Decimal>,
    last_logged_second_balance: Option<Decimal>,
    /// `price_reference` last evaluated for a sell/buy attempt on that side
    /// (spec.md §4.1 `combine_latest` + "distinct-by-price ensures one
    /// attempt per jump per side"). `None` while the corresponding balance
    /// hasn't produced its first value yet, so a late-arriving first balance
    /// can still replay the most recent jump once it shows up.
    sell_attempted_at: Option<Decimal>,
    buy_attempted_at: Option<Decimal>,
}

impl Trader {
    pub fn new(bus: Bus, options: TradingOptions, order_outdate_period_days: i64) -> Self {
        Self {
            bus,
            options,
            outdate_period: ChronoDuration::days(order_outdate_period_days),
            price_reference: None,
            first_balance: None,
            second_balance: None,
            seen_completed: HashSet::new(),
            last_logged_price_at: None,
            price_log_throttle: ChronoDuration::minutes(10),
            last_logged_first_balance: None,
            last_logged_second_balance: None,
            sell_attempted_at: None,
            buy_attempted_at: None,
        }
    }

    /// Starts the polling timers and runs the event loop until `cancellation`
    /// fires. Consumes `self`; there is one Trader per configured pair.
    pub async fn run(mut self, cancellation: CancellationToken) {
        let pair = self.options.pair.clone();

        spawn_timer(self.bus.clone(), cancellation.clone(), TokioDuration::from_secs(1), {
            || Command::GetServerTime
        });
        spawn_timer(self.bus.clone(), cancellation.clone(), TokioDuration::from_secs(10), {
            let pair = pair.clone();
            move || Command::GetPrice { pair: pair.clone() }
        });
        spawn_timer(self.bus.clone(), cancellation.clone(), TokioDuration::from_secs(10), {
            let pair = pair.clone();
            move || Command::GetCompletedOrders { pair: pair.clone() }
        });
        spawn_timer(self.bus.clone(), cancellation.clone(), TokioDuration::from_secs(60 * 60), {
            let pair = pair.clone();
            move || Command::GetActiveOrders { pair: pair.clone() }
        });
        spawn_timer(
            self.bus.clone(),
            cancellation.clone(),
            TokioDuration::from_secs(60 * 10),
            {
                let first = self.options.pair.first.clone();
                move || Command::GetBalance { currency: first.clone() }
            },
        );
        spawn_timer(
            self.bus.clone(),
            cancellation.clone(),
            TokioDuration::from_secs(60 * 10),
            {
                let second = self.options.pair.second.clone();
                move || Command::GetBalance { currency: second.clone() }
            },
        );

        let mut events = self.bus.events.subscribe();
        loop {
            tokio::select! {
                _ = cancellation.when_cancelled() => break,
                received = events.recv() => {
                    match received {
                        None => break,
                        Some(event) => self.handle_event(event),
                    }
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Price { pair, value } if pair == self.options.pair => self.on_price(value),
            Event::Balance { currency, value } if currency == self.options.pair.first => {
                let (balance, _change) = scan_balance(self.first_balance, value);
                if self.last_logged_first_balance != Some(balance) {
                    info!("{}: {} balance is now {}", self.options, currency, balance);
                    self.last_logged_first_balance = Some(balance);
                }
                self.first_balance = Some(balance);
                if let Some(price_reference) = self.price_reference {
                    self.try_sell(price_reference);
                }
            }
            Event::Balance { currency, value } if currency == self.options.pair.second => {
                let (balance, _change) = scan_balance(self.second_balance, value);
                if self.last_logged_second_balance != Some(balance) {
                    info!("{}: {} balance is now {}", self.options, currency, balance);
                    self.last_logged_second_balance = Some(balance);
                }
                self.second_balance = Some(balance);
                if let Some(price_reference) = self.price_reference {
                    self.try_buy(price_reference);
                }
            }
            Event::ActiveOrders { pair, orders } if pair == self.options.pair => self.on_active_orders(&orders),
            Event::CompletedOrders { pair, orders } if pair == self.options.pair => {
                self.on_completed_orders(&orders)
            }
            Event::Time { value } => self.maybe_log_time(value),
            _ => {}
        }
    }

    /// T1 — price jump. `scan_jumping_price` followed by the
    /// distinct-until-changed/skip(1) contract: a jump is only a jump when
    /// the reference actually moved and this isn't the very first tick.
    fn on_price(&mut self, price: Decimal) {
        let previous = self.price_reference;
        let new_reference = scan_jumping_price(previous, price, self.options.price_jump_value);
        let is_jump = matches!(previous, Some(p) if p != new_reference);
        self.price_reference = Some(new_reference);

        if !is_jump {
            return;
        }

        info!("{}: price jumped to {}", self.options, new_reference);
        self.try_sell(new_reference);
        self.try_buy(new_reference);
    }

    /// `combine_latest(jumping_price, first_balance)` (spec.md §4.1): fires
    /// once both sources have produced at least once, and at most once per
    /// jumped price (the distinct-by-price contract). Called both from a
    /// fresh price jump and from the first-currency balance arm, so a
    /// balance that arrives after the jump already happened still gets to
    /// evaluate the most recent jump exactly once.
    fn try_sell(&mut self, price_reference: Decimal) {
        let Some(first_balance) = self.first_balance else {
            return;
        };
        if self.sell_attempted_at == Some(price_reference) {
            return;
        }
        self.sell_attempted_at = Some(price_reference);

        let jitter = random_margin_jitter(self.options.margin_jitter);
        match sell_plan(price_reference, first_balance, &self.options, jitter) {
            Some(plan) => self.bus.commands.publish(Command::CreateSellOrder {
                pair: self.options.pair.clone(),
                amount: plan.amount,
                price: plan.price,
            }),
            None => warn!("{}: not enough funds to sell on price jump", self.options),
        }
    }

    /// `combine_latest(jumping_price, second_balance)` — see `try_sell`.
    fn try_buy(&mut self, price_reference: Decimal) {
        let Some(second_balance) = self.second_balance else {
            return;
        };
        if self.buy_attempted_at == Some(price_reference) {
            return;
        }
        self.buy_attempted_at = Some(price_reference);

        let jitter = random_margin_jitter(self.options.margin_jitter);
        match buy_plan(price_reference, second_balance, &self.options, jitter) {
            Some(plan) => self.bus.commands.publish(Command::CreateBuyOrder {
                pair: self.options.pair.clone(),
                amount: plan.amount,
                price: plan.price,
            }),
            None => warn!("{}: not enough funds to buy on price jump", self.options),
        }
    }

    /// T2 — order completion mirroring (spec.md §4.3.3).
    fn on_completed_orders(&mut self, orders: &[Order]) {
        let fresh = completed_orders_singly(&mut self.seen_completed, orders);
        info!("{}: {} newly completed order(s)", self.options, fresh.len());

        let (Some(first_balance), Some(second_balance)) = (self.first_balance, self.second_balance) else {
            return;
        };

        for completed in &fresh {
            let jitter = random_margin_jitter(self.options.margin_jitter);
            match mirror_plan(completed, &self.options, jitter, first_balance, second_balance) {
                Some((OrderSide::Sell, plan)) => self.bus.commands.publish(Command::CreateSellOrder {
                    pair: self.options.pair.clone(),
                    amount: plan.amount,
                    price: plan.price,
                }),
                Some((OrderSide::Buy, plan)) => self.bus.commands.publish(Command::CreateBuyOrder {
                    pair: self.options.pair.clone(),
                    amount: plan.amount,
                    price: plan.price,
                }),
                None => warn!("{}: not enough funds to mirror completed order {}", self.options, completed.id),
            }
        }
    }

    /// Cancellation-by-age. The original logs a distinct "no active orders
    /// found" line rather than dumping an empty list (original_source/trader.py).
    fn on_active_orders(&mut self, orders: &[Order]) {
        if orders.is_empty() {
            info!("{}: no active orders found", self.options);
            return;
        }

        let now = Utc::now();
        for order in orders {
            info!("{}: active order {}", self.options, order);
            if is_outdated(order, now, self.outdate_period) {
                info!("{}: order {} is outdated, cancelling", self.options, order.id);
                self.bus
                    .commands
                    .publish(Command::CancelOrder { order_id: order.id.clone() });
            }
        }
    }

    /// Time+price logged at most once per 10 minutes (`throttle_first`).
    fn maybe_log_time(&mut self, value: DateTime<Utc>) {
        let should_log = match self.last_logged_price_at {
            None => true,
            Some(last) => value - last >= self.price_log_throttle,
        };
        if should_log {
            self.last_logged_price_at = Some(value);
            info!(
                "{}: server time {}, reference price {:?}",
                self.options, value, self.price_reference
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use crate::core::model::{Currency, CurrencyPair};

    fn btc_usd_options() -> TradingOptions {
        TradingOptions {
            pair: CurrencyPair::new(Currency::new("BTC", 6), Currency::new("USD", 3)),
            margin: dec!(0.05),
            margin_jitter: dec!(0),
            min_amount: dec!(0.01),
            deal_amount: None,
            price_jump_value: dec!(0.05),
        }
    }

    /// Property 1 — balance stream law.
    #[test]
    fn balance_stream_emits_delta_against_previous() {
        let mut previous = None;
        let mut changes = Vec::new();
        for value in [dec!(10), dec!(12), dec!(9)] {
            let (balance, change) = scan_balance(previous, value);
            changes.push(change);
            previous = Some(balance);
        }
        assert_eq!(changes, vec![dec!(0), dec!(2), dec!(-3)]);
    }

    /// Property 2 — price-jump idempotence.
    #[test]
    fn constant_price_never_jumps() {
        let jump = dec!(0.05);
        let mut previous = None;
        let mut jumps = 0;
        for _ in 0..5 {
            let new_reference = scan_jumping_price(previous, dec!(100), jump);
            if matches!(previous, Some(p) if p != new_reference) {
                jumps += 1;
            }
            previous = Some(new_reference);
        }
        assert_eq!(jumps, 0);
    }

    #[test]
    fn price_below_jump_threshold_never_jumps() {
        let jump = dec!(0.05);
        let mut previous = Some(dec!(100));
        let mut jumps = 0;
        for _ in 0..5 {
            let new_reference = scan_jumping_price(previous, dec!(102), jump); // 2% < 5%
            if matches!(previous, Some(p) if p != new_reference) {
                jumps += 1;
            }
            previous = Some(new_reference);
        }
        assert_eq!(jumps, 0);
    }

    /// S1 from spec.md §8: 100 -> 107 is a 7% jump, emits exactly one jump.
    #[test]
    fn price_at_or_above_threshold_jumps_exactly_once() {
        let jump = dec!(0.05);
        let previous = Some(dec!(100));
        let new_reference = scan_jumping_price(previous, dec!(107), jump);
        let is_jump = matches!(previous, Some(p) if p != new_reference);
        assert!(is_jump);
        assert_eq!(new_reference, dec!(107));
    }

    /// First observation is never a jump (distinct_until_changed + skip(1)).
    #[test]
    fn first_observation_is_never_a_jump() {
        let new_reference = scan_jumping_price(None, dec!(100), dec!(0.05));
        assert_eq!(new_reference, dec!(100));
    }

    /// Property 3 — completed-orders-singly.
    #[test]
    fn each_completed_order_id_is_emitted_at_most_once() {
        let mut seen = HashSet::new();
        let order = |id| Order {
            id: OrderId::Numeric(id),
            side: OrderSide::Sell,
            amount: dec!(1),
            price: dec!(1),
            created: None,
            completed: None,
        };

        let first = completed_orders_singly(&mut seen, &[order(1), order(2)]);
        assert_eq!(first.len(), 2);

        let second = completed_orders_singly(&mut seen, &[order(2), order(3)]);
        assert_eq!(second.iter().map(|o| o.id.clone()).collect::<Vec<_>>(), vec![OrderId::Numeric(3)]);
    }

    /// Property 9 / S3 — staleness.
    #[test]
    fn orders_older_than_outdate_period_are_flagged() {
        let now = Utc::now();
        let fresh = Order {
            id: OrderId::Numeric(1),
            side: OrderSide::Sell,
            amount: dec!(1),
            price: dec!(1),
            created: Some(now - ChronoDuration::days(1)),
            completed: None,
        };
        let stale = Order {
            created: Some(now - ChronoDuration::days(40)),
            ..fresh.clone()
        };

        assert!(!is_outdated(&fresh, now, ChronoDuration::days(35)));
        assert!(is_outdated(&stale, now, ChronoDuration::days(35)));
    }

    #[tokio::test]
    async fn price_jump_emits_buy_order_matching_scenario_s1() {
        let bus = Bus::new();
        let options = btc_usd_options();
        let mut trader = Trader::new(bus.clone(), options, 35);
        trader.second_balance = Some(dec!(1000));

        let mut commands = bus.commands.subscribe();
        trader.on_price(dec!(100));
        trader.on_price(dec!(107));

        let command = commands.recv().await.expect("a command was published");
        match command {
            Command::CreateBuyOrder { amount, price, .. } => {
                assert_eq!(price, dec!(101.650));
                assert_eq!(amount, crate::core::model::quantize(dec!(1000) / dec!(101.650), 6));
            }
            other => panic!("expected CreateBuyOrder, got {:?}", other),
        }
    }

    /// `combine_latest` contract (spec.md §4.1): a price jump observed before
    /// the first balance for that side arrives must still be evaluated once
    /// that balance shows up, not dropped forever.
    #[tokio::test]
    async fn balance_arriving_after_a_jump_still_evaluates_that_jump() {
        let bus = Bus::new();
        let options = btc_usd_options();
        let mut trader = Trader::new(bus.clone(), options, 35);

        let mut commands = bus.commands.subscribe();
        trader.on_price(dec!(100));
        trader.on_price(dec!(107)); // jump happens with no balance known yet on either side

        trader.handle_event(Event::Balance {
            currency: trader.options.pair.second.clone(),
            value: dec!(1000),
        });

        let command = commands.recv().await.expect("a command was published");
        match command {
            Command::CreateBuyOrder { amount, price, .. } => {
                assert_eq!(price, dec!(101.650));
                assert_eq!(amount, crate::core::model::quantize(dec!(1000) / dec!(101.650), 6));
            }
            other => panic!("expected CreateBuyOrder, got {:?}", other),
        }

        // a second, unrelated balance tick at the same value must not re-fire
        // (distinct-by-price)
        trader.handle_event(Event::Balance {
            currency: trader.options.pair.second.clone(),
            value: dec!(1000),
        });
        let nothing_more =
            tokio::time::timeout(tokio::time::Duration::from_millis(20), commands.recv()).await;
        assert!(nothing_more.is_err(), "distinct-by-price should suppress a repeat tick");
    }

    #[tokio::test]
    async fn completed_sell_mirrors_to_buy_matching_scenario_s2() {
        let bus = Bus::new();
        let options = btc_usd_options();
        let mut trader = Trader::new(bus.clone(), options, 35);
        trader.first_balance = Some(dec!(0.01));
        trader.second_balance = Some(dec!(1000));

        let mut commands = bus.commands.subscribe();
        let completed = Order {
            id: OrderId::Numeric(1),
            side: OrderSide::Sell,
            amount: dec!(0.01),
            price: dec!(100),
            created: None,
            completed: Some(Utc::now()),
        };
        trader.on_completed_orders(&[completed]);

        let command = commands.recv().await.expect("a command was published");
        match command {
            Command::CreateBuyOrder { amount, price, .. } => {
                assert_eq!(amount, dec!(0.01));
                assert_eq!(price, dec!(95.0));
            }
            other => panic!("expected CreateBuyOrder, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn stale_active_order_emits_exactly_one_cancel_matching_scenario_s3() {
        let bus = Bus::new();
        let options = btc_usd_options();
        let mut trader = Trader::new(bus.clone(), options, 35);

        let mut commands = bus.commands.subscribe();
        let stale = Order {
            id: OrderId::Numeric(7),
            side: OrderSide::Sell,
            amount: dec!(0.01),
            price: dec!(100),
            created: Some(Utc::now() - ChronoDuration::days(40)),
            completed: None,
        };
        trader.on_active_orders(&[stale]);

        let command = commands.recv().await.expect("a command was published");
        match command {
            Command::CancelOrder { order_id } => assert_eq!(order_id, OrderId::Numeric(7)),
            other => panic!("expected CancelOrder, got {:?}", other),
        }
    }
}
