// SPDX-License-Identifier: Apache-2.0 OR MIT
// Dispatcher - fans each processed record out to every enabled adapter
//
// The adapter list lives in an immutable snapshot behind an atomically
// swappable pointer. Readers take the current snapshot without locking;
// dispose swaps in an empty, disposed snapshot in one step.

use super::adapter::Adapter;
use super::error::{join_results, LogError, Result};
use super::handler::Handler;
use super::processor::{AttributeProcessor, DefaultProcessor};
use super::{Attr, Record, Severity};
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Upper bound on the grace period `flush` leaves the writers
const MAX_FLUSH_GRACE: Duration = Duration::from_secs(1);

struct Snapshot {
    adapters: Vec<Adapter>,
    processor: Arc<dyn AttributeProcessor>,
    disposed: bool,
}

impl Snapshot {
    fn disposed() -> Self {
        Self {
            adapters: Vec::new(),
            processor: Arc::new(DefaultProcessor::default()),
            disposed: true,
        }
    }
}

struct Root {
    state: ArcSwap<Snapshot>,
    level: AtomicU8,
    disposed: AtomicBool,
    flush_interval: Duration,
    disposal: OnceLock<Result<()>>,
}

enum Derivation {
    Attrs(Vec<Attr>),
    Group(String),
}

/// Derivations applied on top of the root, with per-adapter handlers built on
/// first use
struct View {
    steps: Vec<Arc<Derivation>>,
    handlers: OnceLock<Vec<Arc<dyn Handler>>>,
}

impl View {
    fn handlers(&self, adapters: &[Adapter]) -> &[Arc<dyn Handler>] {
        self.handlers.get_or_init(|| {
            adapters
                .iter()
                .map(|adapter| {
                    let mut handler: Arc<dyn Handler> = Arc::new(adapter.clone());
                    for step in &self.steps {
                        handler = match step.as_ref() {
                            Derivation::Attrs(attrs) => handler.with_attrs(attrs),
                            Derivation::Group(name) => handler.with_group(name),
                        };
                    }
                    handler
                })
                .collect()
        })
    }
}

/// Fan-out handler over a fixed set of adapters
///
/// Cloning is cheap and clones share everything. Views created with
/// [`Dispatcher::with_attrs`] and [`Dispatcher::with_group`] share the root
/// state too, so disposing the root silences every view.
#[derive(Clone)]
pub struct Dispatcher {
    root: Arc<Root>,
    view: Option<Arc<View>>,
}

impl Dispatcher {
    pub fn new(
        adapters: Vec<Adapter>,
        processor: Arc<dyn AttributeProcessor>,
        level: Severity,
        flush_interval: Duration,
    ) -> Self {
        Self {
            root: Arc::new(Root {
                state: ArcSwap::from_pointee(Snapshot {
                    adapters,
                    processor,
                    disposed: false,
                }),
                level: AtomicU8::new(level.as_u8()),
                disposed: AtomicBool::new(false),
                flush_interval,
                disposal: OnceLock::new(),
            }),
            view: None,
        }
    }

    pub fn level(&self) -> Severity {
        Severity::from_u8(self.root.level.load(Ordering::Relaxed)).unwrap_or(Severity::Debug)
    }

    pub fn set_level(&self, level: Severity) {
        self.root.level.store(level.as_u8(), Ordering::Relaxed);
    }

    /// True when `level` passes the minimum and the dispatcher is live
    #[inline]
    pub fn enabled(&self, level: Severity) -> bool {
        level.as_u8() <= self.root.level.load(Ordering::Relaxed)
            && !self.root.disposed.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.root.disposed.load(Ordering::Acquire)
    }

    /// The adapters of the current snapshot (empty after dispose)
    pub fn adapters(&self) -> Vec<Adapter> {
        self.root.state.load().adapters.clone()
    }

    /// Process `record` once and hand it to every enabled adapter
    ///
    /// One failing adapter yields its error unchanged. Several yield a
    /// [`LogError::Joined`] built from each adapter's stored error, which
    /// also exposes failures that happened asynchronously on its worker.
    pub fn handle(&self, record: Record) -> Result<()> {
        let snapshot = self.root.state.load();
        if snapshot.disposed {
            return Err(LogError::Disposed);
        }

        let record = snapshot.processor.process(record);
        let derived = self.view.as_ref().map(|view| view.handlers(&snapshot.adapters));

        let mut failures = Vec::new();
        for (index, adapter) in snapshot.adapters.iter().enumerate() {
            let target: &dyn Handler = match derived {
                Some(handlers) => handlers[index].as_ref(),
                None => adapter as &dyn Handler,
            };
            if !target.enabled(record.level) {
                continue;
            }
            if let Err(err) = target.handle(record.clone()) {
                failures.push((index, err));
            }
        }

        match failures.len() {
            0 => Ok(()),
            1 => Err(failures.remove(0).1),
            _ => Err(LogError::Joined(
                failures
                    .into_iter()
                    .map(|(index, err)| snapshot.adapters[index].last_error().unwrap_or(err))
                    .collect(),
            )),
        }
    }

    fn derive(&self, step: Derivation) -> Self {
        let mut steps = self
            .view
            .as_ref()
            .map(|view| view.steps.clone())
            .unwrap_or_default();
        steps.push(Arc::new(step));
        Self {
            root: Arc::clone(&self.root),
            view: Some(Arc::new(View {
                steps,
                handlers: OnceLock::new(),
            })),
        }
    }

    pub fn with_attrs(&self, attrs: &[Attr]) -> Self {
        if attrs.is_empty() {
            return self.clone();
        }
        self.derive(Derivation::Attrs(attrs.to_vec()))
    }

    pub fn with_group(&self, name: &str) -> Self {
        if name.is_empty() {
            return self.clone();
        }
        self.derive(Derivation::Group(name.to_string()))
    }

    /// Flush every adapter, then give the writers a short grace period
    pub fn flush(&self) -> Result<()> {
        let snapshot = self.root.state.load_full();
        if snapshot.disposed {
            return Err(LogError::Disposed);
        }
        let result = join_results(snapshot.adapters.iter().map(Handler::flush));
        std::thread::sleep(self.root.flush_interval.min(MAX_FLUSH_GRACE));
        result
    }

    /// Flush and dispose every adapter, then switch to the disposed snapshot
    ///
    /// Runs once; later calls return the stored result.
    pub fn dispose(&self) -> Result<()> {
        self.root
            .disposal
            .get_or_init(|| {
                let snapshot = self.root.state.load_full();

                let flushed: Vec<Result<()>> = snapshot
                    .adapters
                    .iter()
                    .map(Handler::flush)
                    .filter(|result| !matches!(result, Err(LogError::Disposed)))
                    .collect();
                let disposed: Vec<Result<()>> =
                    snapshot.adapters.iter().map(Handler::dispose).collect();

                self.root.state.store(Arc::new(Snapshot::disposed()));
                self.root.disposed.store(true, Ordering::Release);

                join_results(flushed.into_iter().chain(disposed))
            })
            .clone()
    }
}

impl Handler for Dispatcher {
    fn enabled(&self, level: Severity) -> bool {
        Dispatcher::enabled(self, level)
    }

    fn handle(&self, record: Record) -> Result<()> {
        Dispatcher::handle(self, record)
    }

    fn with_attrs(&self, attrs: &[Attr]) -> Arc<dyn Handler> {
        Arc::new(Dispatcher::with_attrs(self, attrs))
    }

    fn with_group(&self, name: &str) -> Arc<dyn Handler> {
        Arc::new(Dispatcher::with_group(self, name))
    }

    fn flush(&self) -> Result<()> {
        Dispatcher::flush(self)
    }

    fn dispose(&self) -> Result<()> {
        Dispatcher::dispose(self)
    }

    fn ready(&self) {
        for adapter in self.root.state.load().adapters.iter() {
            adapter.ready();
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.root.state.load();
        f.debug_struct("Dispatcher")
            .field("adapters", &snapshot.adapters.len())
            .field("level", &self.level())
            .field("disposed", &snapshot.disposed)
            .field("derived", &self.view.is_some())
            .finish()
    }
}
