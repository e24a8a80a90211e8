// SPDX-License-Identifier: Apache-2.0 OR MIT
// Batch worker - the single consumer thread behind a buffered adapter

use super::error::{LogError, Result};
use super::handler::Handler;
use super::ringbuffer::RingBuffer;
use super::Record;
use crate::config::AdapterConfig;
use arc_swap::ArcSwapOption;
use crossbeam_channel::{select, Receiver, Sender, TryRecvError};
use metrics::{counter, describe_counter};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// A queued record and the (possibly derived) handler that must receive it
pub(crate) struct Envelope {
    pub record: Record,
    pub target: Arc<dyn Handler>,
}

/// Ask the worker to drain the buffer
///
/// Token 0 with no reply channel is the fire-and-forget signal sent by the
/// retry loop; explicit flushes carry a fresh token and wait for it to come
/// back on `ack`.
pub(crate) struct FlushRequest {
    pub token: u64,
    pub ack: Option<Sender<u64>>,
}

impl FlushRequest {
    pub fn signal() -> Self {
        Self {
            token: 0,
            ack: None,
        }
    }
}

/// State shared between a buffered adapter and its worker
pub(crate) struct Core {
    pub name: String,
    pub config: Arc<AdapterConfig>,
    pub ring: RingBuffer<Envelope>,
    /// Admitted-but-not-yet-processed records
    pub queue_len: AtomicUsize,
    /// Downstream error not yet reported to a caller
    pub pending: ArcSwapOption<LogError>,
    /// Most recent error, kept for diagnostics
    pub last_error: ArcSwapOption<LogError>,
    pub dropped: AtomicU64,
}

impl Core {
    pub fn new(name: String, config: Arc<AdapterConfig>) -> Self {
        Self {
            ring: RingBuffer::new(config.buffer_size),
            name,
            config,
            queue_len: AtomicUsize::new(0),
            pending: ArcSwapOption::empty(),
            last_error: ArcSwapOption::empty(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Store a downstream error; the next caller sees it once
    pub fn record_error(&self, err: LogError) {
        let err = Arc::new(err);
        self.pending.store(Some(Arc::clone(&err)));
        self.last_error.store(Some(err));
    }

    pub fn take_pending(&self) -> Option<LogError> {
        self.pending.swap(None).map(|err| (*err).clone())
    }

    pub fn last_error(&self) -> Option<LogError> {
        self.last_error.load_full().map(|err| (*err).clone())
    }
}

/// Register descriptions for the pipeline counters
pub fn describe_metrics() {
    describe_counter!(
        "logpipe_records_written_total",
        "Records delivered to a wrapped handler"
    );
    describe_counter!(
        "logpipe_records_dropped_total",
        "Records rejected because the buffer was full"
    );
    describe_counter!(
        "logpipe_handler_errors_total",
        "Errors returned by wrapped handlers"
    );
}

pub(crate) struct Worker {
    core: Arc<Core>,
    batch: Vec<Envelope>,
    /// Within `1..=capacity` even when the config was never sealed
    batch_size: usize,
}

impl Worker {
    pub fn new(core: Arc<Core>) -> Self {
        let batch_size = core.config.batch_size.clamp(1, core.ring.capacity());
        Self {
            batch: Vec::with_capacity(batch_size),
            batch_size,
            core,
        }
    }

    pub fn spawn(
        self,
        flush_rx: Receiver<FlushRequest>,
        stop_rx: Receiver<()>,
    ) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("logpipe-{}", self.core.name))
            .spawn(move || self.run(flush_rx, stop_rx))
    }

    /// Run until the stop channel fires or disconnects. Stopping never drains.
    fn run(mut self, flush_rx: Receiver<FlushRequest>, stop_rx: Receiver<()>) {
        let interval = self.core.config.flush_interval();
        // an interval too large to schedule behaves like no interval
        let ticker = if interval.is_zero() || Instant::now().checked_add(interval).is_none() {
            crossbeam_channel::never()
        } else {
            crossbeam_channel::tick(interval)
        };

        loop {
            select! {
                recv(ticker) -> _ => {
                    self.drain_once();
                }
                recv(flush_rx) -> request => match request {
                    Ok(request) => self.flush(request, &stop_rx),
                    Err(_) => break,
                },
                recv(stop_rx) -> _ => break,
            }
        }
    }

    fn drain_once(&mut self) -> usize {
        let taken = self
            .core
            .ring
            .take_into(&mut self.batch, self.batch_size);
        if taken > 0 {
            self.process_batch();
            self.core.queue_len.fetch_sub(taken, Ordering::AcqRel);
        }
        taken
    }

    fn flush(&mut self, request: FlushRequest, stop_rx: &Receiver<()>) {
        while self.core.queue_len.load(Ordering::Acquire) > 0 {
            if self.drain_once() == 0 {
                // admitted but not yet written into its slot
                if !matches!(stop_rx.try_recv(), Err(TryRecvError::Empty)) {
                    return;
                }
            }
            thread::yield_now();
        }

        if let Some(ack) = request.ack {
            if request.token > 0 {
                let _ = ack.send(request.token);
            }
        }
    }

    /// Deliver the current batch, grouping consecutive records that share a
    /// target handler. Every record is attempted; errors are recorded.
    fn process_batch(&mut self) {
        let mut batch = std::mem::take(&mut self.batch);
        let mut envelopes = batch.drain(..).peekable();

        while let Some(first) = envelopes.next() {
            let target = first.target;
            let mut records = vec![first.record];
            while let Some(next) = envelopes.next_if(|e| Arc::ptr_eq(&e.target, &target)) {
                records.push(next.record);
            }
            self.deliver(&target, records);
        }

        drop(envelopes);
        self.batch = batch;
    }

    fn deliver(&self, target: &Arc<dyn Handler>, records: Vec<Record>) {
        let (http, ordinary): (Vec<Record>, Vec<Record>) = match target.http() {
            Some(_) => records.into_iter().partition(Record::is_http),
            None => (Vec::new(), records),
        };

        if !ordinary.is_empty() {
            match target.batch() {
                Some(batch) => self.observe(batch.handle_batch(&ordinary), ordinary.len()),
                None => {
                    for record in ordinary {
                        self.observe(target.handle(record), 1);
                    }
                }
            }
        }

        if !http.is_empty() {
            if let Some(handler) = target.http() {
                self.observe(handler.handle_http_batch(&http), http.len());
            }
        }
    }

    fn observe(&self, result: Result<()>, count: usize) {
        match result {
            Ok(()) => {
                counter!("logpipe_records_written_total", "adapter" => self.core.name.clone())
                    .increment(count as u64);
            }
            Err(err) => {
                counter!("logpipe_handler_errors_total", "adapter" => self.core.name.clone())
                    .increment(1);
                self.core.record_error(err);
            }
        }
    }
}
