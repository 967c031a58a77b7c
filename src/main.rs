use anyhow::{Context, Result};
use mmb_lib::core::cancellation::CancellationToken;
use mmb_lib::core::config::load_settings;
use mmb_lib::core::logger::init_logger;
use mmb_lib::core::supervisor::Supervisor;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_owned());

    init_logger("mmb.log").context("cannot initialize logger")?;

    let settings = load_settings(&config_path)
        .with_context(|| format!("cannot load configuration from {}", config_path))?;

    let supervisor = Supervisor::new(&settings)
        .await
        .context("cannot start supervisor")?;

    let cancellation = CancellationToken::new();
    let signal_cancellation = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancellation.cancel();
        }
    });

    supervisor.run(cancellation).await;

    Ok(())
}
