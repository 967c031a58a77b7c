use log::info;

use crate::core::bus::Bus;
use crate::core::cancellation::CancellationToken;
use crate::core::config::EngineSettings;
use crate::core::connector::Connector;
use crate::core::error::EngineError;
use crate::core::trader::Trader;

/// Thin wiring layer: builds the bus, one Connector, one Trader per
/// configured pair, starts them, and disposes Trader-then-Connector on
/// shutdown (spec.md §4.4).
pub struct Supervisor {
    bus: Bus,
    connector: Connector,
    traders: Vec<Trader>,
}

impl Supervisor {
    pub async fn new(settings: &EngineSettings) -> Result<Self, EngineError> {
        let bus = Bus::new();
        let connector = Connector::new(bus.clone(), settings).await?;
        let traders = settings
            .trading
            .iter()
            .cloned()
            .map(|options| Trader::new(bus.clone(), options, settings.order_outdate_period_days))
            .collect();

        Ok(Self {
            bus,
            connector,
            traders,
        })
    }

    /// Runs every Trader and the Connector until `cancellation` fires, then
    /// awaits their shutdown in Trader-first order before returning.
    pub async fn run(self, cancellation: CancellationToken) {
        drop(self.bus);

        // Subscribe the Connector to the command bus *before* spawning
        // anything: a `broadcast` publish with no subscriber yet is simply
        // dropped, and `tokio::spawn` gives no ordering guarantee that the
        // Connector's task would have subscribed before a Trader's immediate
        // first-tick commands land (spec.md §4.1, §4.3.1).
        let commands = self.connector.subscribe_commands();
        let connector_handle = tokio::spawn(self.connector.run(commands, cancellation.clone()));

        let trader_handles: Vec<_> = self
            .traders
            .into_iter()
            .map(|trader| tokio::spawn(trader.run(cancellation.clone())))
            .collect();

        cancellation.when_cancelled().await;
        info!("shutdown requested, disposing traders");
        for handle in trader_handles {
            let _ = handle.await;
        }
        info!("traders stopped, disposing connector");
        let _ = connector_handle.await;
        info!("supervisor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::core::model::{Currency, CurrencyPair, TradingOptions};
    use rust_decimal_macros::dec;

    fn settings() -> EngineSettings {
        EngineSettings {
            exchange_site: "https://example.test".to_owned(),
            api_key: "key".to_owned(),
            api_secret: "secret".to_owned(),
            data_dir: PathBuf::from(std::env::temp_dir().join(format!(
                "btce_mmb_supervisor_test_{}",
                std::process::id()
            ))),
            order_outdate_period_days: 35,
            trading: vec![TradingOptions {
                pair: CurrencyPair::new(Currency::new("BTC", 6), Currency::new("USD", 3)),
                margin: dec!(0.05),
                margin_jitter: dec!(0),
                min_amount: dec!(0.01),
                deal_amount: None,
                price_jump_value: dec!(0.05),
            }],
        }
    }

    #[tokio::test]
    async fn shuts_down_cleanly_once_cancellation_fires() {
        let settings = settings();
        let supervisor = Supervisor::new(&settings).await.expect("supervisor builds");
        let cancellation = CancellationToken::new();

        let run_cancellation = cancellation.clone();
        let handle = tokio::spawn(supervisor.run(run_cancellation));

        cancellation.cancel();
        tokio::time::timeout(tokio::time::Duration::from_secs(2), handle)
            .await
            .expect("supervisor should stop promptly after cancellation")
            .expect("supervisor task should not panic");

        let _ = tokio::fs::remove_dir_all(&settings.data_dir).await;
    }
}
