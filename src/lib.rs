// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Buffered, multi-adapter structured logging.
//!
//! A [`Logger`](logging::Logger) processes each record once and fans it out
//! to a set of adapters. Buffered adapters hand records to a background
//! worker through a lock-free ring buffer and apply an overflow policy
//! (block with retry, or drop) when it fills up.

pub mod config;
pub mod logging;

pub use config::{AdapterConfig, LoggerConfig, OutputConfig, Policy};
pub use logging::{
    Adapter, AdapterSpec, Attr, BufferedAdapter, Dispatcher, Handler, LogError, Logger, Record,
    Severity,
};
