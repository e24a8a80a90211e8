// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Async integration
//!
//! Flush and dispose block the calling thread (they wait on worker threads),
//! so async applications run them through `spawn_blocking`. [`AsyncLogging`]
//! wraps a [`Logger`] for use inside a tokio runtime and can keep a
//! background task flushing it periodically.

use crate::logging::{LogError, Logger, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn blocking<F>(job: F) -> Result<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| LogError::handler("async", e.to_string()))?
}

/// Flush `logger` without blocking the async executor
pub async fn flush(logger: &Logger) -> Result<()> {
    let logger = logger.clone();
    blocking(move || logger.flush()).await
}

/// Dispose `logger` without blocking the async executor
pub async fn dispose(logger: &Logger) -> Result<()> {
    let logger = logger.clone();
    blocking(move || logger.dispose()).await
}

/// Logger owned by an async application
pub struct AsyncLogging {
    logger: Logger,
    flusher: Option<tokio::task::JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl AsyncLogging {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger,
            flusher: None,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Also flush every `period` from a background task
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_periodic_flush(logger: Logger, period: Duration) -> Self {
        let mut logging = Self::new(logger);
        let running = Arc::clone(&logging.running);
        let logger = logging.logger.clone();

        logging.flusher = Some(tokio::spawn(async move {
            while running.load(Ordering::Relaxed) {
                tokio::time::sleep(period).await;
                if !running.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(LogError::Disposed) = flush(&logger).await {
                    break;
                }
            }
        }));
        logging
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub async fn flush(&self) -> Result<()> {
        flush(&self.logger).await
    }

    /// Stop the periodic flusher and dispose the logger
    pub async fn shutdown(mut self) -> Result<()> {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.flusher.take() {
            let _ = handle.await;
        }
        dispose(&self.logger).await
    }
}
