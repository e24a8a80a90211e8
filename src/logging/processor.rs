// SPDX-License-Identifier: Apache-2.0 OR MIT
// Attribute processing applied once per record before fan-out

use super::{Attr, HttpInfo, Record, Value};
use crate::config::LoggerConfig;
use std::collections::HashSet;
use std::time::Duration;

/// Replacement value for redacted attributes
pub const REDACTED: &str = "[REDACTED]";

/// Key of the attribute group that is lifted into [`HttpInfo`]
pub const HTTP_GROUP: &str = "http";

/// Rewrites a raw record before the dispatcher hands it to adapters
pub trait AttributeProcessor: Send + Sync {
    fn process(&self, record: Record) -> Record;
}

impl<F> AttributeProcessor for F
where
    F: Fn(Record) -> Record + Send + Sync,
{
    fn process(&self, record: Record) -> Record {
        self(record)
    }
}

/// Key-based redaction and omission plus HTTP extraction
///
/// Rules match attribute keys at any nesting depth. A top-level `http` group
/// carrying at least `method` and `path` turns the record HTTP-shaped.
#[derive(Debug, Clone, Default)]
pub struct DefaultProcessor {
    redact: HashSet<String>,
    omit: HashSet<String>,
}

impl DefaultProcessor {
    pub fn new<R, O>(redact: R, omit: O) -> Self
    where
        R: IntoIterator,
        R::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        Self {
            redact: redact.into_iter().map(Into::into).collect(),
            omit: omit.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &LoggerConfig) -> Self {
        Self::new(config.redact.iter().cloned(), config.omit.iter().cloned())
    }

    fn rewrite(&self, attrs: Vec<Attr>) -> Vec<Attr> {
        attrs
            .into_iter()
            .filter(|attr| !self.omit.contains(&attr.key))
            .map(|attr| {
                if self.redact.contains(&attr.key) {
                    return Attr::new(attr.key, REDACTED);
                }
                match attr.value {
                    Value::Group(inner) => Attr::group(attr.key, self.rewrite(inner)),
                    value => Attr { key: attr.key, value },
                }
            })
            .collect()
    }
}

fn extract_http(attrs: &mut Vec<Attr>) -> Option<HttpInfo> {
    let index = attrs
        .iter()
        .position(|a| a.key == HTTP_GROUP && matches!(a.value, Value::Group(_)))?;
    let Value::Group(fields) = &attrs[index].value else {
        return None;
    };

    let field = |key: &str| fields.iter().find(|a| a.key == key).map(|a| &a.value);
    let text = |key: &str| field(key).and_then(Value::as_str).map(str::to_string);

    let info = HttpInfo {
        method: text("method")?,
        path: text("path")?,
        status: field("status")
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok())
            .unwrap_or_default(),
        latency: field("latency_ms")
            .and_then(Value::as_f64)
            .map(latency_from_millis)
            .unwrap_or_default(),
        remote_addr: text("remote_addr"),
        user_agent: text("user_agent"),
    };
    attrs.remove(index);
    Some(info)
}

/// Negative or NaN latencies become zero; values past `Duration::MAX` saturate
fn latency_from_millis(ms: f64) -> Duration {
    Duration::try_from_secs_f64(ms / 1000.0).unwrap_or(if ms > 0.0 {
        Duration::MAX
    } else {
        Duration::ZERO
    })
}

impl AttributeProcessor for DefaultProcessor {
    fn process(&self, mut record: Record) -> Record {
        if !self.redact.is_empty() || !self.omit.is_empty() {
            record.attrs = self.rewrite(std::mem::take(&mut record.attrs));
        }
        if record.http.is_none() {
            record.http = extract_http(&mut record.attrs);
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::Severity;

    #[test]
    fn test_redact_and_omit_nested() {
        let processor = DefaultProcessor::new(["password"], ["internal"]);
        let record = Record::new(Severity::Info, "login")
            .with_attr("user", "alice")
            .with_attr("password", "hunter2")
            .with_attr("internal", 42)
            .with_attrs([Attr::group(
                "auth",
                vec![Attr::new("password", "x"), Attr::new("internal", true)],
            )]);

        let processed = processor.process(record);
        assert_eq!(processed.attr("user").and_then(Value::as_str), Some("alice"));
        assert_eq!(
            processed.attr("password").and_then(Value::as_str),
            Some(REDACTED)
        );
        assert!(processed.attr("internal").is_none());
        assert_eq!(
            processed.attr("auth"),
            Some(&Value::Group(vec![Attr::new("password", REDACTED)]))
        );
    }

    #[test]
    fn test_http_extraction() {
        let processor = DefaultProcessor::default();
        let record = Record::new(Severity::Info, "request").with_attrs([
            Attr::new("trace", "abc"),
            Attr::group(
                "http",
                vec![
                    Attr::new("method", "GET"),
                    Attr::new("path", "/health"),
                    Attr::new("status", 200u16),
                    Attr::new("latency_ms", 2.5),
                ],
            ),
        ]);

        let processed = processor.process(record);
        let http = processed.http.as_ref().unwrap();
        assert_eq!(http.method, "GET");
        assert_eq!(http.status, 200);
        assert_eq!(http.latency, Duration::from_micros(2500));
        assert!(processed.attr("http").is_none());
        assert!(processed.attr("trace").is_some());
    }

    #[test]
    fn test_out_of_range_latency() {
        let processor = DefaultProcessor::default();
        let http = |latency: f64| {
            Record::new(Severity::Info, "request").with_attrs([Attr::group(
                "http",
                vec![
                    Attr::new("method", "GET"),
                    Attr::new("path", "/"),
                    Attr::new("latency_ms", latency),
                ],
            )])
        };

        let huge = processor.process(http(1e300)).http.unwrap();
        assert_eq!(huge.latency, Duration::MAX);

        let negative = processor.process(http(-5.0)).http.unwrap();
        assert_eq!(negative.latency, Duration::ZERO);

        let nan = processor.process(http(f64::NAN)).http.unwrap();
        assert_eq!(nan.latency, Duration::ZERO);
    }

    #[test]
    fn test_incomplete_http_group_stays_ordinary() {
        let processor = DefaultProcessor::default();
        let record = Record::new(Severity::Info, "partial")
            .with_attrs([Attr::group("http", vec![Attr::new("method", "GET")])]);

        let processed = processor.process(record);
        assert!(!processed.is_http());
        assert!(processed.attr("http").is_some());
    }

    #[test]
    fn test_closure_processor() {
        let upper = |mut record: Record| {
            record.message = record.message.to_uppercase();
            record
        };
        let processed = upper.process(Record::new(Severity::Info, "quiet"));
        assert_eq!(processed.message, "QUIET");
    }
}
