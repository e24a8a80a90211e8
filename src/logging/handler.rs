// SPDX-License-Identifier: Apache-2.0 OR MIT
// Handler capability: the pluggable output side of the pipeline

use super::error::Result;
use super::{Attr, Record, Severity};
use std::sync::Arc;

/// Anything that can receive log records
///
/// `enabled`, `handle`, `with_attrs` and `with_group` are required. The rest
/// are optional extensions with no-op defaults: a handler opts into batching
/// or HTTP records by returning `Some(self)` from [`Handler::batch`] or
/// [`Handler::http`].
pub trait Handler: Send + Sync {
    fn enabled(&self, level: Severity) -> bool;

    fn handle(&self, record: Record) -> Result<()>;

    /// Derive a handler that adds `attrs` to every record
    fn with_attrs(&self, attrs: &[Attr]) -> Arc<dyn Handler>;

    /// Derive a handler that nests subsequent attributes under `name`
    fn with_group(&self, name: &str) -> Arc<dyn Handler>;

    fn batch(&self) -> Option<&dyn BatchHandler> {
        None
    }

    fn http(&self) -> Option<&dyn HttpHandler> {
        None
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn dispose(&self) -> Result<()> {
        Ok(())
    }

    /// Called once after the logger finished composing its adapters
    fn ready(&self) {}
}

/// Handlers that can take a whole batch in one call
pub trait BatchHandler: Send + Sync {
    fn handle_batch(&self, records: &[Record]) -> Result<()>;
}

/// Handlers that accept HTTP-shaped records
///
/// Implementors provide the single-record path; the batch path defaults to
/// calling it per record, attempting every record and keeping the last error.
pub trait HttpHandler: Send + Sync {
    fn handle_http(&self, record: &Record) -> Result<()>;

    fn handle_http_batch(&self, records: &[Record]) -> Result<()> {
        let mut result = Ok(());
        for record in records {
            if let Err(err) = self.handle_http(record) {
                result = Err(err);
            }
        }
        result
    }
}

/// Handler that discards everything
///
/// Returned by disposed adapters and dispatchers so late callers never panic
/// or block.
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl Handler for Discard {
    fn enabled(&self, _level: Severity) -> bool {
        false
    }

    fn handle(&self, _record: Record) -> Result<()> {
        Ok(())
    }

    fn with_attrs(&self, _attrs: &[Attr]) -> Arc<dyn Handler> {
        Arc::new(Discard)
    }

    fn with_group(&self, _name: &str) -> Arc<dyn Handler> {
        Arc::new(Discard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogError;
    use std::sync::Mutex;

    struct FlakyHttp {
        seen: Mutex<Vec<String>>,
    }

    impl HttpHandler for FlakyHttp {
        fn handle_http(&self, record: &Record) -> Result<()> {
            self.seen.lock().unwrap().push(record.message.clone());
            if record.message == "bad" {
                return Err(LogError::handler("flaky", "rejected"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_discard() {
        let handler = Discard;
        assert!(!handler.enabled(Severity::Emergency));
        assert!(handler.handle(Record::new(Severity::Info, "x")).is_ok());
        assert!(handler.batch().is_none());
        assert!(handler.http().is_none());
        assert!(!handler.with_group("g").enabled(Severity::Emergency));
    }

    #[test]
    fn test_default_http_batch_attempts_every_record() {
        let handler = FlakyHttp {
            seen: Mutex::new(Vec::new()),
        };
        let records = vec![
            Record::new(Severity::Info, "a"),
            Record::new(Severity::Info, "bad"),
            Record::new(Severity::Info, "c"),
        ];

        let result = handler.handle_http_batch(&records);
        assert!(matches!(result, Err(LogError::Handler { .. })));
        assert_eq!(*handler.seen.lock().unwrap(), vec!["a", "bad", "c"]);
    }
}
