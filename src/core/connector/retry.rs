use std::future::Future;

use log::{error, warn};

use crate::core::error::EngineError;

/// Bounded attempts: at most 20, a warning every 5 failures, surfaced (and
/// dropped) on the 20th (spec.md §4.2 "Retry policy"). `EngineError::EmptyResult`
/// is never retried — it's the exchange's normal way of saying "nothing here".
const MAX_ATTEMPTS: u32 = 20;
const WARN_EVERY: u32 = 5;

pub async fn with_retry<F, Fut>(label: &str, mut attempt: F) -> Result<serde_json::Value, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<serde_json::Value, EngineError>>,
{
    for attempt_number in 1..=MAX_ATTEMPTS {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(EngineError::EmptyResult) => return Err(EngineError::EmptyResult),
            Err(e) => {
                if attempt_number == MAX_ATTEMPTS {
                    error!(
                        "{}: cannot make request after {} tries: {}",
                        label, attempt_number, e
                    );
                    return Err(e);
                }
                if attempt_number % WARN_EVERY == 0 {
                    warn!(
                        "{}: still failing after {} tries: {}",
                        label, attempt_number, e
                    );
                }
            }
        }
    }
    unreachable!("loop always returns by the 20th iteration")
}
