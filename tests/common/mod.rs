// SPDX-License-Identifier: Apache-2.0 OR MIT
// Integration test utilities
//
// `Recorder` is a configurable handler that remembers what reached it.
// Derived recorders (with_attrs / with_group) share the same `Seen` state.

#![allow(dead_code)]

use logpipe::logging::{
    Attr, BatchHandler, Handler, HttpHandler, LogError, Record, Result, Severity, Value,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Default)]
pub struct Seen {
    pub messages: Mutex<Vec<String>>,
    pub attrs: Mutex<Vec<Vec<Attr>>>,
    pub handle_calls: AtomicUsize,
    pub batch_calls: AtomicUsize,
    pub http_calls: AtomicUsize,
    pub dispose_calls: AtomicUsize,
    pub ready_calls: AtomicUsize,
}

#[derive(Clone)]
pub struct Recorder {
    pub seen: Arc<Seen>,
    batch: bool,
    http: bool,
    min_level: Severity,
    fail_on: Option<String>,
    fail_dispose: bool,
    delay: Duration,
    prefix: Vec<Attr>,
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            seen: Arc::new(Seen::default()),
            batch: false,
            http: false,
            min_level: Severity::Debug,
            fail_on: None,
            fail_dispose: false,
            delay: Duration::ZERO,
            prefix: Vec::new(),
        }
    }

    pub fn batching(mut self) -> Self {
        self.batch = true;
        self
    }

    pub fn http_capable(mut self) -> Self {
        self.http = true;
        self
    }

    pub fn with_level(mut self, level: Severity) -> Self {
        self.min_level = level;
        self
    }

    /// Fail every record whose message equals `message`
    pub fn failing_on(mut self, message: &str) -> Self {
        self.fail_on = Some(message.to_string());
        self
    }

    pub fn failing_dispose(mut self) -> Self {
        self.fail_dispose = true;
        self
    }

    /// Sleep this long per record
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn messages(&self) -> Vec<String> {
        self.seen.messages.lock().unwrap().clone()
    }

    pub fn attrs(&self) -> Vec<Vec<Attr>> {
        self.seen.attrs.lock().unwrap().clone()
    }

    pub fn handle_calls(&self) -> usize {
        self.seen.handle_calls.load(Ordering::SeqCst)
    }

    pub fn batch_calls(&self) -> usize {
        self.seen.batch_calls.load(Ordering::SeqCst)
    }

    pub fn http_calls(&self) -> usize {
        self.seen.http_calls.load(Ordering::SeqCst)
    }

    pub fn dispose_calls(&self) -> usize {
        self.seen.dispose_calls.load(Ordering::SeqCst)
    }

    pub fn ready_calls(&self) -> usize {
        self.seen.ready_calls.load(Ordering::SeqCst)
    }

    fn accept(&self, record: &Record) -> Result<()> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.fail_on.as_deref() == Some(record.message.as_str()) {
            return Err(LogError::handler("recorder", format!("refused '{}'", record.message)));
        }
        let mut attrs = self.prefix.clone();
        attrs.extend(record.attrs.iter().cloned());
        self.seen.messages.lock().unwrap().push(record.message.clone());
        self.seen.attrs.lock().unwrap().push(attrs);
        Ok(())
    }
}

impl Handler for Recorder {
    fn enabled(&self, level: Severity) -> bool {
        level.passes(self.min_level)
    }

    fn handle(&self, record: Record) -> Result<()> {
        self.seen.handle_calls.fetch_add(1, Ordering::SeqCst);
        self.accept(&record)
    }

    fn with_attrs(&self, attrs: &[Attr]) -> Arc<dyn Handler> {
        let mut derived = self.clone();
        derived.prefix.extend(attrs.iter().cloned());
        Arc::new(derived)
    }

    fn with_group(&self, name: &str) -> Arc<dyn Handler> {
        let mut derived = self.clone();
        derived.prefix.push(Attr::new("group", name));
        Arc::new(derived)
    }

    fn batch(&self) -> Option<&dyn BatchHandler> {
        if self.batch {
            Some(self)
        } else {
            None
        }
    }

    fn http(&self) -> Option<&dyn HttpHandler> {
        if self.http {
            Some(self)
        } else {
            None
        }
    }

    fn dispose(&self) -> Result<()> {
        self.seen.dispose_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_dispose {
            return Err(LogError::handler("recorder", "dispose failed"));
        }
        Ok(())
    }

    fn ready(&self) {
        self.seen.ready_calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl BatchHandler for Recorder {
    fn handle_batch(&self, records: &[Record]) -> Result<()> {
        self.seen.batch_calls.fetch_add(1, Ordering::SeqCst);
        let mut result = Ok(());
        for record in records {
            if let Err(err) = self.accept(record) {
                result = Err(err);
            }
        }
        result
    }
}

impl HttpHandler for Recorder {
    fn handle_http(&self, record: &Record) -> Result<()> {
        self.seen.http_calls.fetch_add(1, Ordering::SeqCst);
        self.accept(record)
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_for(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

pub fn attr_str<'a>(attrs: &'a [Attr], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|a| a.key == key)
        .and_then(|a| a.value.as_str())
}

pub fn attr_value<'a>(attrs: &'a [Attr], key: &str) -> Option<&'a Value> {
    attrs.iter().find(|a| a.key == key).map(|a| &a.value)
}
