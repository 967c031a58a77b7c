pub mod nonce;
pub mod normalize;
pub mod retry;
pub mod signing;
pub mod transport;

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::mpsc;

use crate::core::bus::{Bus, EventBus};
use crate::core::cancellation::CancellationToken;
use crate::core::config::EngineSettings;
use crate::core::connector::nonce::NonceKeeper;
use crate::core::connector::transport::{HttpTradeApiTransport, PublicApiClient, TradeApiTransport};
use crate::core::error::EngineError;
use crate::core::model::{Command, CurrencyPair, Event, OrderId};

/// Trade-API commands, queued and served strictly one at a time so nonces
/// are consumed in increasing order (spec.md §4.2).
enum TradeJob {
    GetBalance {
        currency: crate::core::model::Currency,
    },
    GetActiveOrders {
        pair: CurrencyPair,
    },
    GetCompletedOrders {
        pair: CurrencyPair,
    },
    CreateSellOrder {
        pair: CurrencyPair,
        amount: rust_decimal::Decimal,
        price: rust_decimal::Decimal,
    },
    CreateBuyOrder {
        pair: CurrencyPair,
        amount: rust_decimal::Decimal,
        price: rust_decimal::Decimal,
    },
    CancelOrder {
        order_id: OrderId,
    },
}

/// Translates Trader commands into exchange API calls and exchange responses
/// back into events (spec.md §4.2). One instance is shared by every Trader.
pub struct Connector {
    bus: Bus,
    public: PublicApiClient,
    transport: Arc<dyn TradeApiTransport>,
    /// Currency registry used to quantize `funds` entries returned from
    /// `Trade`/`CancelOrder`, which report every currency touched rather
    /// than just the one a command asked about.
    currencies: HashMap<String, crate::core::model::Currency>,
}

impl Connector {
    pub async fn new(bus: Bus, settings: &EngineSettings) -> Result<Self, EngineError> {
        let nonce = Arc::new(NonceKeeper::open(settings.nonce_path()).await?);
        let http = reqwest::Client::new();
        let public = PublicApiClient::new(http.clone(), &settings.exchange_site);
        let transport: Arc<dyn TradeApiTransport> = Arc::new(HttpTradeApiTransport::new(
            http,
            &settings.exchange_site,
            settings.api_key.clone(),
            settings.api_secret.clone(),
            nonce,
        ));

        let mut currencies = HashMap::new();
        for options in &settings.trading {
            currencies.insert(options.pair.first.code(), options.pair.first.clone());
            currencies.insert(options.pair.second.code(), options.pair.second.clone());
        }

        Ok(Self {
            bus,
            public,
            transport,
            currencies,
        })
    }

    #[cfg(test)]
    pub fn with_transport(bus: Bus, transport: Arc<dyn TradeApiTransport>, site: &str) -> Self {
        let http = reqwest::Client::new();
        Self {
            bus,
            public: PublicApiClient::new(http, site),
            transport,
            currencies: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn register_currency(&mut self, currency: crate::core::model::Currency) {
        self.currencies.insert(currency.code(), currency);
    }

    /// Subscribes to the command bus synchronously. The Supervisor calls this
    /// *before* spawning the Connector's `run` task (and before spawning any
    /// Trader), since a `broadcast` publish with no subscriber yet is simply
    /// dropped — subscribing only once the spawned task happens to be polled
    /// would race the Traders' immediate first-tick commands.
    pub fn subscribe_commands(&self) -> crate::core::bus::Subscription<Command> {
        self.bus.commands.subscribe()
    }

    /// Runs until `cancellation` fires. Public-API commands are handled
    /// concurrently (one spawned task each); trade-API commands are funneled
    /// into a single serialized worker so the in-flight/nonce invariant holds.
    /// `commands` must have been obtained from `subscribe_commands` before any
    /// producer could have published.
    pub async fn run(self, mut commands: crate::core::bus::Subscription<Command>, cancellation: CancellationToken) {
        let (trade_tx, trade_rx) = mpsc::unbounded_channel::<TradeJob>();
        let events = self.bus.events.clone();
        let transport = self.transport.clone();
        let currencies = self.currencies.clone();
        let trade_worker = tokio::spawn(run_trade_worker(trade_rx, transport, events, currencies));

        loop {
            tokio::select! {
                _ = cancellation.when_cancelled() => break,
                received = commands.recv() => {
                    match received {
                        None => break,
                        Some(command) => self.dispatch(command, &trade_tx),
                    }
                }
            }
        }

        drop(trade_tx);
        let _ = trade_worker.await;
    }

    fn dispatch(&self, command: Command, trade_tx: &mpsc::UnboundedSender<TradeJob>) {
        match command {
            Command::GetServerTime => {
                let events = self.bus.events.clone();
                let public = self.public.clone();
                tokio::spawn(async move {
                    events.publish(Event::Time {
                        value: public.get_server_time(),
                    });
                });
            }
            Command::GetPrice { pair } => {
                let events = self.bus.events.clone();
                let public = self.public.clone();
                tokio::spawn(async move {
                    match public.get_price(&pair).await {
                        Ok(value) => events.publish(Event::Price { pair, value }),
                        Err(e) => warn!("cannot get price for {}: {}", pair, e),
                    }
                });
            }
            Command::GetBalance { currency } => {
                let _ = trade_tx.send(TradeJob::GetBalance { currency });
            }
            Command::GetActiveOrders { pair } => {
                let _ = trade_tx.send(TradeJob::GetActiveOrders { pair });
            }
            Command::GetCompletedOrders { pair } => {
                let _ = trade_tx.send(TradeJob::GetCompletedOrders { pair });
            }
            Command::CreateSellOrder { pair, amount, price } => {
                let _ = trade_tx.send(TradeJob::CreateSellOrder { pair, amount, price });
            }
            Command::CreateBuyOrder { pair, amount, price } => {
                let _ = trade_tx.send(TradeJob::CreateBuyOrder { pair, amount, price });
            }
            Command::CancelOrder { order_id } => {
                let _ = trade_tx.send(TradeJob::CancelOrder { order_id });
            }
        }
    }
}

async fn run_trade_worker(
    mut jobs: mpsc::UnboundedReceiver<TradeJob>,
    transport: Arc<dyn TradeApiTransport>,
    events: EventBus,
    currencies: HashMap<String, crate::core::model::Currency>,
) {
    while let Some(job) = jobs.recv().await {
        handle_trade_job(job, transport.as_ref(), &events, &currencies).await;
    }
}

async fn handle_trade_job(
    job: TradeJob,
    transport: &dyn TradeApiTransport,
    events: &EventBus,
    currencies: &HashMap<String, crate::core::model::Currency>,
) {
    match job {
        TradeJob::GetBalance { currency } => {
            match retry::with_retry("getInfo", || transport.call("getInfo", vec![])).await {
                Ok(payload) => match normalize::normalize_funds(&payload) {
                    Ok(funds) => {
                        if let Some((_, amount)) =
                            funds.into_iter().find(|(code, _)| *code == currency.code())
                        {
                            events.publish(Event::Balance {
                                value: crate::core::model::quantize(amount, currency.places),
                                currency,
                            });
                        }
                    }
                    Err(e) => warn!("cannot decode balance: {}", e),
                },
                Err(EngineError::EmptyResult) => {}
                Err(e) => warn!("cannot get balance for {}: {}", currency, e),
            }
        }
        TradeJob::GetActiveOrders { pair } => {
            let result = retry::with_retry("ActiveOrders", || transport.call("ActiveOrders", vec![])).await;
            match result {
                Ok(payload) => match normalize::normalize_orders(&payload, &pair, "timestamp_created", false) {
                    Ok(orders) => events.publish(Event::ActiveOrders { pair, orders }),
                    Err(e) => warn!("cannot decode active orders for {}: {}", pair, e),
                },
                Err(EngineError::EmptyResult) => {
                    events.publish(Event::ActiveOrders { pair, orders: vec![] })
                }
                Err(e) => warn!("cannot get active orders for {}: {}", pair, e),
            }
        }
        TradeJob::GetCompletedOrders { pair } => {
            let params = vec![("pair", pair.code()), ("count", "20".to_owned())];
            let result = retry::with_retry("TradeHistory", || transport.call("TradeHistory", params.clone())).await;
            match result {
                Ok(payload) => match normalize::normalize_orders(&payload, &pair, "timestamp", true) {
                    Ok(orders) => events.publish(Event::CompletedOrders { pair, orders }),
                    Err(e) => warn!("cannot decode completed orders for {}: {}", pair, e),
                },
                Err(EngineError::EmptyResult) => {
                    events.publish(Event::CompletedOrders { pair, orders: vec![] })
                }
                Err(e) => warn!("cannot get completed orders for {}: {}", pair, e),
            }
        }
        TradeJob::CreateSellOrder { pair, amount, price } => {
            create_order(transport, events, currencies, pair, "sell", amount, price).await;
        }
        TradeJob::CreateBuyOrder { pair, amount, price } => {
            create_order(transport, events, currencies, pair, "buy", amount, price).await;
        }
        TradeJob::CancelOrder { order_id } => {
            let params = vec![("order_id", order_id.to_string())];
            let result = retry::with_retry("CancelOrder", || transport.call("CancelOrder", params.clone())).await;
            match result {
                Ok(payload) => publish_funds(&payload, events, currencies),
                Err(EngineError::EmptyResult) => {}
                Err(e) => debug!("cannot cancel order {}: {}", order_id, e),
            }
        }
    }
}

async fn create_order(
    transport: &dyn TradeApiTransport,
    events: &EventBus,
    currencies: &HashMap<String, crate::core::model::Currency>,
    pair: CurrencyPair,
    side: &'static str,
    amount: rust_decimal::Decimal,
    price: rust_decimal::Decimal,
) {
    let params = vec![
        ("pair", pair.code()),
        ("type", side.to_owned()),
        ("rate", price.to_string()),
        ("amount", amount.to_string()),
    ];
    let result = retry::with_retry("Trade", || transport.call("Trade", params.clone())).await;
    match result {
        Ok(payload) => publish_funds(&payload, events, currencies),
        Err(EngineError::EmptyResult) => {}
        Err(e) => debug!("cannot create {} order: {}", side, e),
    }
}

/// No order event is synthesized for `Trade`/`CancelOrder` (spec.md §4.2) —
/// only the updated `funds`, for every currency the exchange happens to report.
fn publish_funds(
    payload: &serde_json::Value,
    events: &EventBus,
    currencies: &HashMap<String, crate::core::model::Currency>,
) {
    match normalize::normalize_funds(payload) {
        Ok(funds) => {
            for (code, amount) in funds {
                if let Some(currency) = currencies.get(&code) {
                    events.publish(Event::Balance {
                        currency: currency.clone(),
                        value: crate::core::model::quantize(amount, currency.places),
                    });
                }
            }
        }
        Err(e) => warn!("cannot decode updated funds: {}", e),
    }
}
