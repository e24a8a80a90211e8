// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logger facade: composes adapters and fronts the dispatcher

use super::adapter::{Adapter, AdapterSpec};
use super::dispatcher::Dispatcher;
use super::error::{join_results, LogError, Result};
use super::handler::Handler;
use super::output::{Format, Output, StdStream};
use super::processor::{AttributeProcessor, DefaultProcessor};
use super::worker::describe_metrics;
use super::{Attr, Record, Severity};
use crate::config::{AdapterConfig, LoggerConfig};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Name of the adapter composed when no other adapter is available
pub const FALLBACK_ADAPTER: &str = "default";

struct Shared {
    config: LoggerConfig,
    adapter_config: Arc<AdapterConfig>,
    specs: Vec<AdapterSpec>,
    compose_errors: Vec<LogError>,
    registered: AtomicBool,
}

/// Logger handle
///
/// This is a lightweight handle that can be cloned and passed around. Loggers
/// derived with [`Logger::with_attrs`] and [`Logger::with_group`] share the
/// adapters; disposing any of them disposes the whole pipeline.
#[derive(Clone)]
pub struct Logger {
    dispatcher: Dispatcher,
    shared: Arc<Shared>,
}

impl Logger {
    /// Build a logger from `config` plus caller-supplied adapter specs
    ///
    /// Specs that fail to compose are skipped and reported by
    /// [`Logger::compose_errors`]; when nothing composes, a text adapter on
    /// stdout is used instead.
    pub fn new(config: LoggerConfig, specs: Vec<AdapterSpec>) -> Result<Self> {
        let processor = Arc::new(DefaultProcessor::from_config(&config));
        Self::with_processor(config, specs, processor)
    }

    pub fn with_processor(
        config: LoggerConfig,
        mut specs: Vec<AdapterSpec>,
        processor: Arc<dyn AttributeProcessor>,
    ) -> Result<Self> {
        config.validate()?;
        describe_metrics();
        let adapter_config = config.adapter.clone().seal();
        specs.extend(config.outputs.iter().map(AdapterSpec::from_config));

        let mut adapters = Vec::with_capacity(specs.len());
        let mut compose_errors = Vec::new();
        for spec in &specs {
            match spec.compose(&adapter_config) {
                Ok(adapter) => adapters.push(adapter),
                Err(err) => compose_errors.push(err),
            }
        }

        if adapters.is_empty() {
            let fallback = AdapterSpec::writer(FALLBACK_ADAPTER, Format::Text, "stdout");
            adapters.push(fallback.compose(&adapter_config)?);
            specs.push(fallback);
        }

        let dispatcher = Dispatcher::new(
            adapters,
            processor,
            config.level,
            adapter_config.flush_interval(),
        );
        Handler::ready(&dispatcher);

        let register = config.register_default;
        let logger = Self {
            dispatcher,
            shared: Arc::new(Shared {
                config,
                adapter_config,
                specs,
                compose_errors,
                registered: AtomicBool::new(false),
            }),
        };

        if register {
            if let Err(err) = logger.register_default() {
                let _ = logger.dispose();
                return Err(err);
            }
        }
        Ok(logger)
    }

    /// Load a JSON5 config file and build a logger from it
    pub fn from_config_file(path: &std::path::Path) -> Result<Self> {
        Self::new(LoggerConfig::load_from_file(path)?, Vec::new())
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.shared.config
    }

    /// The sealed adapter settings shared by every buffered adapter
    pub fn adapter_config(&self) -> &AdapterConfig {
        &self.shared.adapter_config
    }

    /// Errors from specs that failed to compose
    pub fn compose_errors(&self) -> &[LogError] {
        &self.shared.compose_errors
    }

    pub fn adapters(&self) -> Vec<Adapter> {
        self.dispatcher.adapters()
    }

    pub fn adapter(&self, name: &str) -> Option<Adapter> {
        self.adapters().into_iter().find(|a| a.name() == name)
    }

    /// Records dropped across all buffered adapters
    pub fn dropped_count(&self) -> u64 {
        self.adapters().iter().map(Adapter::dropped_count).sum()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn level(&self) -> Severity {
        self.dispatcher.level()
    }

    /// Set the global minimum log level
    pub fn set_level(&self, level: Severity) {
        self.dispatcher.set_level(level);
        if self.shared.registered.load(Ordering::Acquire) {
            log::set_max_level(level.into());
        }
    }

    #[inline]
    pub fn enabled(&self, level: Severity) -> bool {
        self.dispatcher.enabled(level)
    }

    pub fn with_attrs(&self, attrs: &[Attr]) -> Self {
        Self {
            dispatcher: self.dispatcher.with_attrs(attrs),
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn with_group(&self, name: &str) -> Self {
        Self {
            dispatcher: self.dispatcher.with_group(name),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Write a log record, skipping it below the current level
    pub fn log_record(&self, record: Record) -> Result<()> {
        if !self.enabled(record.level) {
            return Ok(());
        }
        self.dispatcher.handle(record)
    }

    /// Write a log entry with attributes
    pub fn log(&self, level: Severity, message: &str, attrs: &[Attr]) -> Result<()> {
        if !self.enabled(level) {
            return Ok(());
        }
        let record = Record::new(level, message).with_attrs(attrs.iter().cloned());
        self.dispatcher.handle(record)
    }

    /// Log with emergency severity
    #[inline]
    pub fn emergency(&self, message: &str) -> Result<()> {
        self.log(Severity::Emergency, message, &[])
    }

    /// Log with alert severity
    #[inline]
    pub fn alert(&self, message: &str) -> Result<()> {
        self.log(Severity::Alert, message, &[])
    }

    /// Log with critical severity
    #[inline]
    pub fn critical(&self, message: &str) -> Result<()> {
        self.log(Severity::Critical, message, &[])
    }

    /// Log with error severity
    #[inline]
    pub fn error(&self, message: &str) -> Result<()> {
        self.log(Severity::Error, message, &[])
    }

    /// Log with warning severity
    #[inline]
    pub fn warning(&self, message: &str) -> Result<()> {
        self.log(Severity::Warning, message, &[])
    }

    /// Log with notice severity
    #[inline]
    pub fn notice(&self, message: &str) -> Result<()> {
        self.log(Severity::Notice, message, &[])
    }

    /// Log with info severity
    #[inline]
    pub fn info(&self, message: &str) -> Result<()> {
        self.log(Severity::Info, message, &[])
    }

    /// Log with debug severity
    #[inline]
    pub fn debug(&self, message: &str) -> Result<()> {
        self.log(Severity::Debug, message, &[])
    }

    pub fn flush(&self) -> Result<()> {
        self.dispatcher.flush()
    }

    /// Flush and dispose every adapter; call once before exit
    pub fn dispose(&self) -> Result<()> {
        self.dispatcher.dispose()
    }

    /// Replace the writer behind every adapter bound to `stream`
    ///
    /// Queued records are flushed to the old writer first. Fails with
    /// [`LogError::SwappingOutput`] when no adapter writes to `stream`.
    pub fn swap_output(&self, stream: StdStream, writer: Box<dyn Write + Send>) -> Result<()> {
        if self.dispatcher.is_disposed() {
            return Err(LogError::Disposed);
        }
        let outputs: Vec<(&str, Arc<Output>)> = self
            .shared
            .specs
            .iter()
            .filter_map(|spec| spec.output().map(|output| (spec.name(), output)))
            .filter(|(_, output)| output.stream() == Some(stream))
            .collect();
        if outputs.is_empty() {
            return Err(LogError::SwappingOutput { stream });
        }

        let flushed = self.dispatcher.flush();
        let writer = SharedWriter(Arc::new(Mutex::new(writer)));
        let swapped = outputs.into_iter().map(|(name, output)| {
            output
                .swap(Box::new(writer.clone()))
                .map(drop)
                .map_err(|err| LogError::writer_io(name, err))
        });
        join_results(std::iter::once(flushed).chain(swapped))
    }

    /// Install this logger as the process-wide `log` crate logger
    ///
    /// The first registration in a process wins and stays in place after
    /// the logger is disposed.
    pub fn register_default(&self) -> Result<()> {
        log::set_boxed_logger(Box::new(LogBridge {
            logger: self.clone(),
        }))
        .map_err(|_| LogError::AlreadyRegistered)?;
        log::set_max_level(self.level().into());
        self.shared.registered.store(true, Ordering::Release);
        Ok(())
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("dispatcher", &self.dispatcher)
            .field("compose_errors", &self.shared.compose_errors.len())
            .finish()
    }
}

/// One writer shared by several outputs after a swap
#[derive(Clone)]
struct SharedWriter(Arc<Mutex<Box<dyn Write + Send>>>);

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).flush()
    }
}

/// Routes `log` crate records into the pipeline
struct LogBridge {
    logger: Logger,
}

impl log::Log for LogBridge {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.logger.enabled(metadata.level().into())
    }

    fn log(&self, record: &log::Record) {
        let entry = Record::new(record.level().into(), record.args().to_string())
            .with_attr("target", record.target());
        // log::Log has no error channel; failures stay visible via last_error
        let _ = self.logger.log_record(entry);
    }

    fn flush(&self) {
        let _ = self.logger.flush();
    }
}
