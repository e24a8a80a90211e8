// SPDX-License-Identifier: Apache-2.0 OR MIT
// Buffered adapter: ring-buffer admission in front of a wrapped handler
//
// Records are admitted into a lock-free ring buffer and handed to the wrapped
// handler by a background worker (see worker.rs). When the buffer is full the
// overflow policy decides: `Drop` fails immediately, `Block` nudges the worker
// and retries with backoff until the retry budget runs out.

use super::error::{LogError, Result};
use super::handler::{Discard, Handler};
use super::worker::{Core, Envelope, FlushRequest, Worker};
use super::{Attr, Record, Severity};
use crate::config::{AdapterConfig, Policy};
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use metrics::counter;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Longest single backoff step in the retry loop
const MAX_BACKOFF_MS: u64 = 1000;

/// How often a waiting flush checks for disposal
const FLUSH_POLL: Duration = Duration::from_millis(10);

/// Sleep before retry attempt `attempt`: `min(10 * attempt^2, 1000)` ms
pub(crate) fn backoff_for(attempt: u32) -> Duration {
    let attempt = u64::from(attempt);
    let millis = attempt.saturating_mul(attempt).saturating_mul(10);
    Duration::from_millis(millis.min(MAX_BACKOFF_MS))
}

/// Outcome of one admission attempt; a full buffer hands the record back
enum Admission {
    Admitted,
    Full(Envelope),
}

/// Lifecycle state shared by an adapter and every view derived from it
struct Control {
    root: Arc<dyn Handler>,
    flush_tx: Sender<FlushRequest>,
    flush_rx: Receiver<FlushRequest>,
    stop_tx: Mutex<Option<Sender<()>>>,
    stop_rx: Receiver<()>,
    started: OnceLock<Result<()>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
    disposal: OnceLock<Result<()>>,
    flush_seq: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handler wrapper that decouples callers from a slow handler
///
/// Cloning the adapter or deriving views with [`Handler::with_attrs`] and
/// [`Handler::with_group`] shares the ring buffer, worker and lifecycle;
/// disposing any of them disposes all.
#[derive(Clone)]
pub struct BufferedAdapter {
    core: Arc<Core>,
    control: Arc<Control>,
    target: Arc<dyn Handler>,
}

impl BufferedAdapter {
    /// Wrap `handler`; the config should already be sealed
    pub fn new(
        name: impl Into<String>,
        handler: Arc<dyn Handler>,
        config: Arc<AdapterConfig>,
    ) -> Self {
        let (flush_tx, flush_rx) = crossbeam_channel::bounded(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);

        Self {
            core: Arc::new(Core::new(name.into(), config)),
            control: Arc::new(Control {
                root: Arc::clone(&handler),
                flush_tx,
                flush_rx,
                stop_tx: Mutex::new(Some(stop_tx)),
                stop_rx,
                started: OnceLock::new(),
                worker: Mutex::new(None),
                disposed: AtomicBool::new(false),
                disposal: OnceLock::new(),
                flush_seq: AtomicU64::new(0),
            }),
            target: handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.core.config
    }

    /// Records rejected because the buffer was full
    pub fn dropped_count(&self) -> u64 {
        self.core.dropped.load(Ordering::Relaxed)
    }

    /// Records admitted but not yet processed by the worker
    pub fn queue_len(&self) -> usize {
        self.core.queue_len.load(Ordering::Acquire)
    }

    /// Most recent error observed by this adapter (not cleared by reporting)
    pub fn last_error(&self) -> Option<LogError> {
        self.core.last_error()
    }

    pub fn is_disposed(&self) -> bool {
        self.control.disposed.load(Ordering::Acquire)
    }

    /// Start the worker thread on first use, exactly once
    fn ensure_worker(&self) -> Result<()> {
        self.control
            .started
            .get_or_init(|| {
                let worker = Worker::new(Arc::clone(&self.core));
                match worker.spawn(self.control.flush_rx.clone(), self.control.stop_rx.clone()) {
                    Ok(handle) => {
                        *lock(&self.control.worker) = Some(handle);
                        Ok(())
                    }
                    Err(e) => Err(LogError::WorkerSpawn {
                        adapter: self.core.name.clone(),
                        source: Arc::new(e),
                    }),
                }
            })
            .clone()
    }

    /// Claim a slot by bumping `queue_len` while it is below capacity
    fn admit(&self, envelope: Envelope) -> Admission {
        let capacity = self.core.ring.capacity();
        let mut current = self.core.queue_len.load(Ordering::Acquire);
        loop {
            if current >= capacity {
                return Admission::Full(envelope);
            }
            match self.core.queue_len.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.core.ring.push_admitted(envelope);
                    return Admission::Admitted;
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn retry(&self, mut envelope: Envelope) -> Result<()> {
        let config = &self.core.config;
        let started = Instant::now();

        for attempt in 0..config.max_retries {
            // A signal already waiting in the channel covers this one.
            let _ = self.control.flush_tx.try_send(FlushRequest::signal());

            let backoff = backoff_for(attempt);
            if started.elapsed() + backoff >= config.retry_timeout() {
                break;
            }
            std::thread::sleep(backoff);

            match self.admit(envelope) {
                Admission::Admitted => return Ok(()),
                Admission::Full(rejected) => envelope = rejected,
            }
        }

        self.overflow()
    }

    fn overflow(&self) -> Result<()> {
        self.core.dropped.fetch_add(1, Ordering::Relaxed);
        counter!("logpipe_records_dropped_total", "adapter" => self.core.name.clone()).increment(1);

        let err = LogError::BufferFull {
            adapter: self.core.name.clone(),
        };
        self.core.last_error.store(Some(Arc::new(err.clone())));
        Err(err)
    }

    /// Queue a record for the worker
    ///
    /// Reports (and clears) a downstream error stored since the last call
    /// instead of queueing.
    pub fn handle(&self, record: Record) -> Result<()> {
        if self.is_disposed() {
            return Err(LogError::Disposed);
        }
        if let Some(err) = self.core.take_pending() {
            return Err(err);
        }
        self.ensure_worker()?;

        if record.is_http() && self.target.http().is_none() {
            return Ok(());
        }

        let envelope = Envelope {
            record,
            target: Arc::clone(&self.target),
        };
        match self.admit(envelope) {
            Admission::Admitted => Ok(()),
            Admission::Full(envelope) => match self.core.config.policy {
                Policy::Drop => self.overflow(),
                Policy::Block => self.retry(envelope),
            },
        }
    }

    /// Wait until every admitted record has been processed, then flush the
    /// wrapped handler
    pub fn flush(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(LogError::Disposed);
        }

        if self.queue_len() > 0 {
            self.await_drain()?;
        }

        let flushed = self.control.root.flush();
        match self.core.take_pending() {
            Some(err) => Err(err),
            None => flushed,
        }
    }

    /// Hand the worker a flush token and wait for it to come back. Gives up
    /// with `Disposed` as soon as a concurrent dispose is seen.
    fn await_drain(&self) -> Result<()> {
        let timeout = self.core.config.flush_timeout();
        let started = Instant::now();
        let given_up = || {
            if self.is_disposed() {
                LogError::Disposed
            } else {
                LogError::FlushTimeout {
                    adapter: self.core.name.clone(),
                    timeout,
                }
            }
        };
        let expired = || self.is_disposed() || started.elapsed() >= timeout;

        let token = self.control.flush_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        let mut request = FlushRequest {
            token,
            ack: Some(ack_tx),
        };
        loop {
            match self.control.flush_tx.send_timeout(request, FLUSH_POLL) {
                Ok(()) => break,
                Err(SendTimeoutError::Timeout(back)) => request = back,
                Err(SendTimeoutError::Disconnected(_)) => return Err(given_up()),
            }
            if expired() {
                return Err(given_up());
            }
        }

        loop {
            match ack_rx.recv_timeout(FLUSH_POLL) {
                Ok(acked) if acked == token => return Ok(()),
                Ok(_) | Err(RecvTimeoutError::Disconnected) => return Err(given_up()),
                Err(RecvTimeoutError::Timeout) => {}
            }
            if expired() {
                return Err(given_up());
            }
        }
    }

    /// Stop the worker and dispose the wrapped handler
    ///
    /// Runs once; later calls return the first result. Records still queued
    /// are not drained here.
    pub fn dispose(&self) -> Result<()> {
        self.control
            .disposal
            .get_or_init(|| {
                self.control.disposed.store(true, Ordering::Release);
                let mut errors = Vec::new();

                drop(lock(&self.control.stop_tx).take());
                let worker = lock(&self.control.worker).take();
                if let Some(handle) = worker {
                    if handle.join().is_err() {
                        errors.push(LogError::WorkerPanicked {
                            adapter: self.core.name.clone(),
                        });
                    }
                }

                if let Some(err) = self.core.take_pending() {
                    errors.insert(0, err);
                }
                if let Err(err) = self.control.root.dispose() {
                    errors.push(err);
                }

                match LogError::join(errors) {
                    Some(err) => {
                        self.core.last_error.store(Some(Arc::new(err.clone())));
                        Err(err)
                    }
                    None => Ok(()),
                }
            })
            .clone()
    }

    fn derive(&self, target: Arc<dyn Handler>) -> Arc<dyn Handler> {
        Arc::new(Self {
            core: Arc::clone(&self.core),
            control: Arc::clone(&self.control),
            target,
        })
    }
}

impl Handler for BufferedAdapter {
    fn enabled(&self, level: Severity) -> bool {
        !self.is_disposed() && self.target.enabled(level)
    }

    fn handle(&self, record: Record) -> Result<()> {
        BufferedAdapter::handle(self, record)
    }

    fn with_attrs(&self, attrs: &[Attr]) -> Arc<dyn Handler> {
        if self.is_disposed() {
            return Arc::new(Discard);
        }
        self.derive(self.target.with_attrs(attrs))
    }

    fn with_group(&self, name: &str) -> Arc<dyn Handler> {
        if self.is_disposed() {
            return Arc::new(Discard);
        }
        self.derive(self.target.with_group(name))
    }

    fn flush(&self) -> Result<()> {
        BufferedAdapter::flush(self)
    }

    fn dispose(&self) -> Result<()> {
        BufferedAdapter::dispose(self)
    }

    fn ready(&self) {
        self.control.root.ready();
    }
}

impl std::fmt::Debug for BufferedAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedAdapter")
            .field("name", &self.core.name)
            .field("capacity", &self.core.ring.capacity())
            .field("queue_len", &self.queue_len())
            .field("dropped", &self.dropped_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
