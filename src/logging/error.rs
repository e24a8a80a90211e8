// SPDX-License-Identifier: Apache-2.0 OR MIT
// Error taxonomy for the logging pipeline

use super::output::StdStream;
use crate::config::ConfigError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = LogError> = std::result::Result<T, E>;

/// Errors surfaced by adapters, the dispatcher and the logger facade
///
/// Errors are `Clone` because adapters keep the last one they observed and
/// hand it out again on later calls.
#[derive(Error, Debug, Clone)]
pub enum LogError {
    #[error("logger has been disposed")]
    Disposed,

    #[error("adapter '{adapter}': buffer full, record dropped")]
    BufferFull { adapter: String },

    #[error("adapter '{adapter}': write failed: {source}")]
    WriterIo {
        adapter: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("adapter '{adapter}' used before it was composed")]
    NotComposed { adapter: String },

    #[error("no adapter writes to {stream}, cannot swap its output")]
    SwappingOutput { stream: StdStream },

    #[error("adapter '{adapter}': flush did not complete within {timeout:?}")]
    FlushTimeout { adapter: String, timeout: Duration },

    #[error("adapter '{adapter}': worker thread panicked")]
    WorkerPanicked { adapter: String },

    #[error("adapter '{adapter}': failed to start worker: {source}")]
    WorkerSpawn {
        adapter: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("adapter '{adapter}': {message}")]
    Handler { adapter: String, message: String },

    #[error("a default logger is already registered for this process")]
    AlreadyRegistered,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{}", join_messages(.0))]
    Joined(Vec<LogError>),
}

fn join_messages(errors: &[LogError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl LogError {
    pub fn handler(adapter: impl Into<String>, message: impl Into<String>) -> Self {
        LogError::Handler {
            adapter: adapter.into(),
            message: message.into(),
        }
    }

    pub fn writer_io(adapter: impl Into<String>, source: std::io::Error) -> Self {
        LogError::WriterIo {
            adapter: adapter.into(),
            source: Arc::new(source),
        }
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self, LogError::Disposed)
    }

    pub fn is_buffer_full(&self) -> bool {
        matches!(self, LogError::BufferFull { .. })
    }

    /// Collapse a list of errors: none, the single error verbatim, or a
    /// flattened [`LogError::Joined`].
    pub fn join(errors: Vec<LogError>) -> Option<LogError> {
        let mut flat = Vec::with_capacity(errors.len());
        for err in errors {
            match err {
                LogError::Joined(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(LogError::Joined(flat)),
        }
    }

    /// Flatten into the individual errors (a non-joined error yields itself)
    pub fn errors(&self) -> Vec<&LogError> {
        match self {
            LogError::Joined(inner) => inner.iter().collect(),
            other => vec![other],
        }
    }
}

/// Fold a list of results into one, joining every error
pub(crate) fn join_results(results: impl IntoIterator<Item = Result<()>>) -> Result<()> {
    let errors: Vec<LogError> = results.into_iter().filter_map(Result::err).collect();
    match LogError::join(errors) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
