use thiserror::Error;

/// Error taxonomy for the engine (see spec.md §7).
///
/// `Config`/`NonceFile` are fatal at startup. The rest are absorbed by the
/// Connector: logged and either retried, mapped to an empty result, or the
/// command is dropped after the retry budget is exhausted.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("nonce file unreadable or corrupt: {0}")]
    NonceFile(#[source] std::io::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("exchange rejected request: {0}")]
    ExchangeRejected(String),

    #[error("exchange returned an empty result")]
    EmptyResult,

    #[error("could not decode response: {0}")]
    Decode(String),
}

impl EngineError {
    /// "no orders" / "no trades" are not failures, they're the exchange's way
    /// of saying the result set is empty; the Connector must not retry these.
    pub fn is_empty_result(message: &str) -> bool {
        let normalized = message.trim().to_ascii_lowercase();
        normalized == "no orders" || normalized == "no trades"
    }
}
