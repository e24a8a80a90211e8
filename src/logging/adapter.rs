// SPDX-License-Identifier: Apache-2.0 OR MIT
// Adapters: the units the dispatcher fans records out to

use super::buffered::BufferedAdapter;
use super::error::{LogError, Result};
use super::handler::{Discard, Handler};
use super::output::{Format, Output, WriterHandler};
use super::{Attr, Record, Severity};
use crate::config::{AdapterConfig, OutputConfig};
use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// A composed output: either buffered behind a worker or called inline
#[derive(Clone, Debug)]
pub enum Adapter {
    Buffered(BufferedAdapter),
    Direct(DirectAdapter),
}

impl Adapter {
    pub fn buffered(
        name: impl Into<String>,
        handler: Arc<dyn Handler>,
        config: Arc<AdapterConfig>,
    ) -> Self {
        Adapter::Buffered(BufferedAdapter::new(name, handler, config))
    }

    pub fn direct(name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Adapter::Direct(DirectAdapter::new(name, handler))
    }

    pub fn name(&self) -> &str {
        match self {
            Adapter::Buffered(adapter) => adapter.name(),
            Adapter::Direct(adapter) => adapter.name(),
        }
    }

    pub fn last_error(&self) -> Option<LogError> {
        match self {
            Adapter::Buffered(adapter) => adapter.last_error(),
            Adapter::Direct(adapter) => adapter.last_error(),
        }
    }

    pub fn dropped_count(&self) -> u64 {
        match self {
            Adapter::Buffered(adapter) => adapter.dropped_count(),
            Adapter::Direct(_) => 0,
        }
    }

    pub fn as_buffered(&self) -> Option<&BufferedAdapter> {
        match self {
            Adapter::Buffered(adapter) => Some(adapter),
            Adapter::Direct(_) => None,
        }
    }

    fn as_handler(&self) -> &dyn Handler {
        match self {
            Adapter::Buffered(adapter) => adapter as &dyn Handler,
            Adapter::Direct(adapter) => adapter as &dyn Handler,
        }
    }
}

impl Handler for Adapter {
    fn enabled(&self, level: Severity) -> bool {
        self.as_handler().enabled(level)
    }

    fn handle(&self, record: Record) -> Result<()> {
        self.as_handler().handle(record)
    }

    fn with_attrs(&self, attrs: &[Attr]) -> Arc<dyn Handler> {
        self.as_handler().with_attrs(attrs)
    }

    fn with_group(&self, name: &str) -> Arc<dyn Handler> {
        self.as_handler().with_group(name)
    }

    fn flush(&self) -> Result<()> {
        self.as_handler().flush()
    }

    fn dispose(&self) -> Result<()> {
        self.as_handler().dispose()
    }

    fn ready(&self) {
        self.as_handler().ready()
    }
}

struct DirectState {
    last_error: ArcSwapOption<LogError>,
    disposed: AtomicBool,
    disposal: OnceLock<Result<()>>,
}

/// Unbuffered adapter: records reach the handler on the caller's thread
///
/// Shares the lifecycle rules of [`BufferedAdapter`]: dispose runs once,
/// derived views go quiet afterwards, HTTP records only reach handlers that
/// accept them.
#[derive(Clone)]
pub struct DirectAdapter {
    name: Arc<str>,
    root: Arc<dyn Handler>,
    handler: Arc<dyn Handler>,
    state: Arc<DirectState>,
}

impl DirectAdapter {
    pub fn new(name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            root: Arc::clone(&handler),
            handler,
            state: Arc::new(DirectState {
                last_error: ArcSwapOption::empty(),
                disposed: AtomicBool::new(false),
                disposal: OnceLock::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn last_error(&self) -> Option<LogError> {
        self.state.last_error.load_full().map(|err| (*err).clone())
    }

    pub fn is_disposed(&self) -> bool {
        self.state.disposed.load(Ordering::Acquire)
    }

    fn remember(&self, result: Result<()>) -> Result<()> {
        if let Err(err) = &result {
            self.state.last_error.store(Some(Arc::new(err.clone())));
        }
        result
    }

    fn derive(&self, handler: Arc<dyn Handler>) -> Arc<dyn Handler> {
        Arc::new(Self {
            name: Arc::clone(&self.name),
            root: Arc::clone(&self.root),
            handler,
            state: Arc::clone(&self.state),
        })
    }
}

impl Handler for DirectAdapter {
    fn enabled(&self, level: Severity) -> bool {
        !self.is_disposed() && self.handler.enabled(level)
    }

    fn handle(&self, record: Record) -> Result<()> {
        if self.is_disposed() {
            return Err(LogError::Disposed);
        }
        let result = if record.is_http() {
            match self.handler.http() {
                Some(http) => http.handle_http(&record),
                None => return Ok(()),
            }
        } else {
            self.handler.handle(record)
        };
        self.remember(result)
    }

    fn with_attrs(&self, attrs: &[Attr]) -> Arc<dyn Handler> {
        if self.is_disposed() {
            return Arc::new(Discard);
        }
        self.derive(self.handler.with_attrs(attrs))
    }

    fn with_group(&self, name: &str) -> Arc<dyn Handler> {
        if self.is_disposed() {
            return Arc::new(Discard);
        }
        self.derive(self.handler.with_group(name))
    }

    fn flush(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(LogError::Disposed);
        }
        self.remember(self.root.flush())
    }

    fn dispose(&self) -> Result<()> {
        self.state
            .disposal
            .get_or_init(|| {
                self.state.disposed.store(true, Ordering::Release);
                self.remember(self.root.dispose())
            })
            .clone()
    }

    fn ready(&self) {
        self.root.ready();
    }
}

impl std::fmt::Debug for DirectAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectAdapter")
            .field("name", &self.name)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

enum SpecKind {
    Writer {
        format: Format,
        target: String,
        level: Option<Severity>,
    },
    Custom(Arc<dyn Handler>),
}

#[derive(Clone)]
struct Composed {
    adapter: Adapter,
    output: Option<Arc<Output>>,
}

/// Description of an adapter, turned into a live [`Adapter`] exactly once
///
/// The logger composes every spec at construction. Asking a spec for its
/// adapter earlier fails with [`LogError::NotComposed`]; composing twice
/// returns the first outcome.
pub struct AdapterSpec {
    name: String,
    kind: SpecKind,
    buffered: bool,
    composed: OnceLock<Result<Composed>>,
}

impl AdapterSpec {
    /// Writer adapter for "stdout", "stderr" or a file path
    pub fn writer(name: impl Into<String>, format: Format, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SpecKind::Writer {
                format,
                target: target.into(),
                level: None,
            },
            buffered: true,
            composed: OnceLock::new(),
        }
    }

    /// Adapter around a caller-supplied handler
    pub fn custom(name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self {
            name: name.into(),
            kind: SpecKind::Custom(handler),
            buffered: true,
            composed: OnceLock::new(),
        }
    }

    pub fn from_config(output: &OutputConfig) -> Self {
        let mut spec = Self::writer(output.display_name(), output.format, output.target.clone());
        if let Some(level) = output.level {
            spec = spec.with_level(level);
        }
        spec.with_buffering(output.buffered)
    }

    /// Minimum severity for writer adapters; ignored for custom handlers
    pub fn with_level(mut self, min: Severity) -> Self {
        if let SpecKind::Writer { level, .. } = &mut self.kind {
            *level = Some(min);
        }
        self
    }

    pub fn with_buffering(mut self, buffered: bool) -> Self {
        self.buffered = buffered;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_composed(&self) -> bool {
        self.composed.get().is_some()
    }

    /// Build the adapter (once) with the sealed adapter config
    pub fn compose(&self, config: &Arc<AdapterConfig>) -> Result<Adapter> {
        self.composed
            .get_or_init(|| self.build(config))
            .as_ref()
            .map(|composed| composed.adapter.clone())
            .map_err(Clone::clone)
    }

    /// The composed adapter
    pub fn adapter(&self) -> Result<Adapter> {
        match self.composed.get() {
            Some(Ok(composed)) => Ok(composed.adapter.clone()),
            Some(Err(err)) => Err(err.clone()),
            None => Err(LogError::NotComposed {
                adapter: self.name.clone(),
            }),
        }
    }

    /// The writer output, for writer adapters that composed successfully
    pub fn output(&self) -> Option<Arc<Output>> {
        match self.composed.get() {
            Some(Ok(composed)) => composed.output.clone(),
            _ => None,
        }
    }

    fn build(&self, config: &Arc<AdapterConfig>) -> Result<Composed> {
        let (handler, output): (Arc<dyn Handler>, Option<Arc<Output>>) = match &self.kind {
            SpecKind::Writer {
                format,
                target,
                level,
            } => {
                let output = Output::from_target(target)
                    .map_err(|e| LogError::writer_io(self.name.as_str(), e))?;
                let handler: Arc<dyn Handler> = Arc::new(
                    WriterHandler::new(&self.name, *format, Arc::clone(&output))
                        .with_level(level.unwrap_or(Severity::Debug)),
                );
                (handler, Some(output))
            }
            SpecKind::Custom(handler) => (Arc::clone(handler), None),
        };

        let adapter = if self.buffered {
            Adapter::buffered(self.name.clone(), handler, Arc::clone(config))
        } else {
            Adapter::direct(self.name.clone(), handler)
        };
        Ok(Composed { adapter, output })
    }
}

impl std::fmt::Debug for AdapterSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterSpec")
            .field("name", &self.name)
            .field("buffered", &self.buffered)
            .field("composed", &self.is_composed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{HttpHandler, HttpInfo, SharedBuffer};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Plain {
        handled: AtomicUsize,
    }

    impl Handler for Plain {
        fn enabled(&self, _level: Severity) -> bool {
            true
        }
        fn handle(&self, record: Record) -> Result<()> {
            self.handled.fetch_add(1, Ordering::SeqCst);
            if record.message == "fail" {
                return Err(LogError::handler("plain", "nope"));
            }
            Ok(())
        }
        fn with_attrs(&self, _attrs: &[Attr]) -> Arc<dyn Handler> {
            Arc::new(Plain::default())
        }
        fn with_group(&self, _name: &str) -> Arc<dyn Handler> {
            Arc::new(Plain::default())
        }
    }

    #[derive(Default)]
    struct Access {
        plain: AtomicUsize,
        http: AtomicUsize,
    }

    impl Handler for Access {
        fn enabled(&self, _level: Severity) -> bool {
            true
        }
        fn handle(&self, _record: Record) -> Result<()> {
            self.plain.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn with_attrs(&self, _attrs: &[Attr]) -> Arc<dyn Handler> {
            Arc::new(Access::default())
        }
        fn with_group(&self, _name: &str) -> Arc<dyn Handler> {
            Arc::new(Access::default())
        }
        fn http(&self) -> Option<&dyn HttpHandler> {
            Some(self)
        }
    }

    impl HttpHandler for Access {
        fn handle_http(&self, _record: &Record) -> Result<()> {
            self.http.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn http_record() -> Record {
        Record::new(Severity::Info, "").with_http(HttpInfo {
            method: "GET".into(),
            path: "/".into(),
            status: 200,
            ..Default::default()
        })
    }

    #[test]
    fn test_direct_http_gating() {
        let plain = Arc::new(Plain::default());
        let access = Arc::new(Access::default());
        let a = Adapter::direct("plain", plain.clone());
        let b = Adapter::direct("access", access.clone());

        a.handle(http_record()).unwrap();
        b.handle(http_record()).unwrap();

        assert_eq!(plain.handled.load(Ordering::SeqCst), 0);
        assert_eq!(access.plain.load(Ordering::SeqCst), 0);
        assert_eq!(access.http.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_direct_remembers_errors() {
        let adapter = Adapter::direct("plain", Arc::new(Plain::default()));
        assert!(adapter.last_error().is_none());
        assert!(adapter.handle(Record::new(Severity::Info, "fail")).is_err());
        assert!(matches!(adapter.last_error(), Some(LogError::Handler { .. })));
        assert_eq!(adapter.dropped_count(), 0);
    }

    #[test]
    fn test_direct_dispose_once() {
        let adapter = Adapter::direct("plain", Arc::new(Plain::default()));
        let derived = adapter.with_group("g");
        assert!(adapter.dispose().is_ok());
        assert!(adapter.dispose().is_ok());
        assert!(!derived.enabled(Severity::Emergency));
        assert!(derived
            .handle(Record::new(Severity::Info, "late"))
            .unwrap_err()
            .is_disposed());
    }

    #[test]
    fn test_spec_not_composed() {
        let spec = AdapterSpec::custom("custom", Arc::new(Plain::default()));
        assert!(matches!(
            spec.adapter(),
            Err(LogError::NotComposed { ref adapter }) if adapter == "custom"
        ));

        let config = AdapterConfig::default().seal();
        let adapter = spec.compose(&config).unwrap();
        assert!(adapter.as_buffered().is_some());
        assert_eq!(spec.adapter().unwrap().name(), "custom");
        assert!(spec.output().is_none());
        adapter.dispose().unwrap();
    }

    #[test]
    fn test_spec_composes_once() {
        let spec = AdapterSpec::writer("out", Format::Text, "stdout").with_buffering(false);
        let config = AdapterConfig::default().seal();
        spec.compose(&config).unwrap();
        let first = spec.output().unwrap();
        spec.compose(&config).unwrap();
        assert!(Arc::ptr_eq(&first, &spec.output().unwrap()));
        assert_eq!(first.stream(), Some(crate::logging::StdStream::Stdout));
    }

    #[test]
    fn test_spec_file_error_is_sticky() {
        let spec = AdapterSpec::writer("bad", Format::Json, "/nonexistent/dir/out.log");
        let config = AdapterConfig::default().seal();
        assert!(matches!(spec.compose(&config), Err(LogError::WriterIo { .. })));
        assert!(matches!(spec.adapter(), Err(LogError::WriterIo { .. })));
    }

    #[test]
    fn test_spec_writer_level() {
        let buffer = SharedBuffer::new();
        let handler = WriterHandler::text("lvl", Output::writer(Box::new(buffer.clone())))
            .with_level(Severity::Warning);
        let adapter = Adapter::direct("lvl", Arc::new(handler));
        assert!(!adapter.enabled(Severity::Info));
        assert!(adapter.enabled(Severity::Error));
    }
}
