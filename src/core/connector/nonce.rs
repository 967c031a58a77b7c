use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

use crate::core::error::EngineError;

/// Persistent monotonic counter backing every trade-API nonce
/// (spec.md §4.2 "Nonce keeper"). Concurrent `get()`s are serialized here
/// with an internal mutex; in practice the Connector's single trade-API
/// in-flight slot already guarantees this, the mutex just makes the
/// invariant hold even if that changes.
pub struct NonceKeeper {
    path: PathBuf,
    lock: Mutex<()>,
}

impl NonceKeeper {
    /// Opens (creating if absent) the nonce file at `path`. Fatal at startup
    /// if the file exists but is corrupt (spec.md §7).
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(EngineError::NonceFile)?;
        }
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                contents
                    .trim()
                    .parse::<u64>()
                    .map_err(|e| EngineError::NonceFile(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tokio::fs::write(&path, "0")
                    .await
                    .map_err(EngineError::NonceFile)?;
            }
            Err(e) => return Err(EngineError::NonceFile(e)),
        }

        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    /// Reads, increments, writes back and returns the new value. Strictly
    /// increasing across calls and across process restarts.
    pub async fn get(&self) -> Result<u64, EngineError> {
        let _guard = self.lock.lock().await;

        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(EngineError::NonceFile)?;
        let current: u64 = contents
            .trim()
            .parse()
            .map_err(|e| EngineError::NonceFile(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        let next = current + 1;

        tokio::fs::write(&self.path, next.to_string())
            .await
            .map_err(EngineError::NonceFile)?;

        Ok(next)
    }
}
