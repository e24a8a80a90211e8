// SPDX-License-Identifier: Apache-2.0 OR MIT
// Buffered multi-adapter logging pipeline
//
// Records flow Logger -> Dispatcher -> Adapter. Buffered adapters admit
// records into a lock-free ring buffer drained by one worker thread each;
// direct adapters call their handler inline.

mod adapter;
mod buffered;
mod dispatcher;
mod error;
mod handler;
pub mod integration;
mod logger;
#[macro_use]
mod macros;
mod output;
mod processor;
mod record;
mod ringbuffer;
mod severity;
mod worker;

// Public exports
pub use adapter::{Adapter, AdapterSpec, DirectAdapter};
pub use buffered::BufferedAdapter;
pub use dispatcher::Dispatcher;
pub use error::{LogError, Result};
pub use handler::{BatchHandler, Discard, Handler, HttpHandler};
pub use integration::AsyncLogging;
pub use logger::{Logger, FALLBACK_ADAPTER};
pub use output::{Format, Output, OutputTarget, SharedBuffer, StdStream, WriterHandler};
pub use processor::{AttributeProcessor, DefaultProcessor, HTTP_GROUP, REDACTED};
pub use record::{Attr, HttpInfo, Record, Value};
pub use ringbuffer::{next_power_of_two, RingBuffer};
pub use severity::Severity;
pub use worker::describe_metrics;
