// SPDX-License-Identifier: Apache-2.0 OR MIT
// Writer-backed handlers: text and JSON encoders over swappable outputs

use super::error::{LogError, Result};
use super::handler::{BatchHandler, Handler, HttpHandler};
use super::{Attr, Record, Severity, Value};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Line encoding used by a [`WriterHandler`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Text,
    Json,
}

/// Standard process streams whose writers can be hot-swapped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StdStream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StdStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StdStream::Stdout => write!(f, "stdout"),
            StdStream::Stderr => write!(f, "stderr"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Stream(StdStream),
    File(PathBuf),
    Custom,
}

/// A shared, mutex-serialized writer
///
/// One output may back several derived handlers; writes from them are
/// serialized here. The writer behind a stream target can be replaced at
/// runtime with [`Output::swap`].
pub struct Output {
    target: OutputTarget,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl Output {
    pub fn stdout() -> Arc<Self> {
        Arc::new(Self {
            target: OutputTarget::Stream(StdStream::Stdout),
            writer: Mutex::new(Box::new(std::io::stdout())),
        })
    }

    pub fn stderr() -> Arc<Self> {
        Arc::new(Self {
            target: OutputTarget::Stream(StdStream::Stderr),
            writer: Mutex::new(Box::new(std::io::stderr())),
        })
    }

    /// Open `path` for appending, creating it if needed
    pub fn file(path: &Path) -> std::io::Result<Arc<Self>> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Arc::new(Self {
            target: OutputTarget::File(path.to_path_buf()),
            writer: Mutex::new(Box::new(std::io::BufWriter::new(file))),
        }))
    }

    pub fn writer(writer: Box<dyn Write + Send>) -> Arc<Self> {
        Arc::new(Self {
            target: OutputTarget::Custom,
            writer: Mutex::new(writer),
        })
    }

    /// Resolve a config target string: "stdout", "stderr" or a file path
    pub fn from_target(target: &str) -> std::io::Result<Arc<Self>> {
        match target {
            "stdout" => Ok(Self::stdout()),
            "stderr" => Ok(Self::stderr()),
            path => Self::file(Path::new(path)),
        }
    }

    pub fn target(&self) -> &OutputTarget {
        &self.target
    }

    pub fn stream(&self) -> Option<StdStream> {
        match self.target {
            OutputTarget::Stream(stream) => Some(stream),
            _ => None,
        }
    }

    /// Replace the underlying writer, returning the previous one (flushed)
    ///
    /// The new writer is installed even when flushing the old one fails; the
    /// flush error is returned and the old writer dropped.
    pub fn swap(&self, writer: Box<dyn Write + Send>) -> std::io::Result<Box<dyn Write + Send>> {
        let mut guard = self.lock();
        let flushed = guard.flush();
        let previous = std::mem::replace(&mut *guard, writer);
        flushed.map(|()| previous)
    }

    fn write_all(&self, bytes: &[u8]) -> std::io::Result<()> {
        self.lock().write_all(bytes)
    }

    fn flush(&self) -> std::io::Result<()> {
        self.lock().flush()
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn Write + Send>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Output").field("target", &self.target).finish()
    }
}

/// In-memory writer, cloneable so tests and tools can read what was written
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let bytes = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Handler that encodes records as text or JSON lines onto an [`Output`]
///
/// Supports batching (one write per batch) and HTTP records (access-log
/// lines). Derived handlers share the output.
#[derive(Clone)]
pub struct WriterHandler {
    name: Arc<str>,
    format: Format,
    output: Arc<Output>,
    level: Severity,
    prefix: Vec<Attr>,
    groups: Vec<String>,
}

impl WriterHandler {
    pub fn new(name: impl AsRef<str>, format: Format, output: Arc<Output>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            format,
            output,
            level: Severity::Debug,
            prefix: Vec::new(),
            groups: Vec::new(),
        }
    }

    pub fn text(name: impl AsRef<str>, output: Arc<Output>) -> Self {
        Self::new(name, Format::Text, output)
    }

    pub fn json(name: impl AsRef<str>, output: Arc<Output>) -> Self {
        Self::new(name, Format::Json, output)
    }

    /// Minimum severity this handler accepts
    pub fn with_level(mut self, level: Severity) -> Self {
        self.level = level;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output(&self) -> &Arc<Output> {
        &self.output
    }

    /// Record attributes placed under the open groups, after derived attributes
    fn merged_attrs(&self, record: &Record) -> Vec<Attr> {
        let mut attrs = self.prefix.clone();
        insert_at(&self.groups, &mut attrs, record.attrs.clone());
        attrs
    }

    fn encode(&self, record: &Record, buf: &mut Vec<u8>) {
        let attrs = self.merged_attrs(record);
        match self.format {
            Format::Text => {
                let _ = write!(
                    buf,
                    "{} [{}] {}",
                    record.time.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                    record.level,
                    record.message
                );
                write_text_attrs(buf, "", &attrs);
                if let Some(http) = &record.http {
                    let _ = write!(
                        buf,
                        " http.method={} http.path={} http.status={} http.latency_ms={}",
                        http.method,
                        http.path,
                        http.status,
                        http.latency.as_micros() as f64 / 1000.0
                    );
                }
                buf.push(b'\n');
            }
            Format::Json => {
                let mut object = serde_json::Map::new();
                object.insert("time".into(), serde_json::json!(record.time.to_rfc3339()));
                object.insert("level".into(), serde_json::json!(record.level.as_str()));
                object.insert("msg".into(), serde_json::json!(record.message));
                for attr in &attrs {
                    let value = serde_json::to_value(&attr.value).unwrap_or_default();
                    object.insert(attr.key.clone(), value);
                }
                if let Some(http) = &record.http {
                    let value = serde_json::to_value(http).unwrap_or_default();
                    object.insert("http".into(), value);
                }
                let _ = serde_json::to_writer(&mut *buf, &object);
                buf.push(b'\n');
            }
        }
    }

    fn encode_http(&self, record: &Record, buf: &mut Vec<u8>) {
        let Some(http) = &record.http else {
            return self.encode(record, buf);
        };
        match self.format {
            Format::Text => {
                let _ = write!(
                    buf,
                    "{} [{}] {} {} {} {}ms",
                    record.time.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                    record.level,
                    http.method,
                    http.path,
                    http.status,
                    http.latency.as_micros() as f64 / 1000.0
                );
                if let Some(addr) = &http.remote_addr {
                    let _ = write!(buf, " from={}", addr);
                }
                if !record.message.is_empty() {
                    let _ = write!(buf, " {}", record.message);
                }
                write_text_attrs(buf, "", &self.merged_attrs(record));
                buf.push(b'\n');
            }
            Format::Json => self.encode(record, buf),
        }
    }

    fn write(&self, buf: &[u8]) -> Result<()> {
        self.output
            .write_all(buf)
            .map_err(|e| LogError::writer_io(self.name.as_ref(), e))
    }
}

fn write_text_attrs(buf: &mut Vec<u8>, prefix: &str, attrs: &[Attr]) {
    for attr in attrs {
        match &attr.value {
            Value::Group(inner) => {
                let nested = format!("{}{}.", prefix, attr.key);
                write_text_attrs(buf, &nested, inner);
            }
            Value::Str(s) if s.is_empty() || s.contains(char::is_whitespace) || s.contains('=') => {
                let _ = write!(buf, " {}{}={:?}", prefix, attr.key, s);
            }
            value => {
                let _ = write!(buf, " {}{}={}", prefix, attr.key, value);
            }
        }
    }
}

/// Insert `attrs` under the nested group `path` inside `target`
fn insert_at(path: &[String], target: &mut Vec<Attr>, attrs: Vec<Attr>) {
    if attrs.is_empty() {
        return;
    }
    let Some((head, rest)) = path.split_first() else {
        target.extend(attrs);
        return;
    };

    let existing = target
        .iter_mut()
        .rev()
        .find(|a| a.key == *head && matches!(a.value, Value::Group(_)));
    match existing {
        Some(Attr {
            value: Value::Group(inner),
            ..
        }) => insert_at(rest, inner, attrs),
        _ => {
            let mut inner = Vec::new();
            insert_at(rest, &mut inner, attrs);
            target.push(Attr::group(head.clone(), inner));
        }
    }
}

impl Handler for WriterHandler {
    fn enabled(&self, level: Severity) -> bool {
        level.passes(self.level)
    }

    fn handle(&self, record: Record) -> Result<()> {
        let mut buf = Vec::with_capacity(256);
        self.encode(&record, &mut buf);
        self.write(&buf)
    }

    fn with_attrs(&self, attrs: &[Attr]) -> Arc<dyn Handler> {
        let mut derived = self.clone();
        insert_at(&self.groups, &mut derived.prefix, attrs.to_vec());
        Arc::new(derived)
    }

    fn with_group(&self, name: &str) -> Arc<dyn Handler> {
        if name.is_empty() {
            return Arc::new(self.clone());
        }
        let mut derived = self.clone();
        derived.groups.push(name.to_string());
        Arc::new(derived)
    }

    fn batch(&self) -> Option<&dyn BatchHandler> {
        Some(self)
    }

    fn http(&self) -> Option<&dyn HttpHandler> {
        Some(self)
    }

    fn flush(&self) -> Result<()> {
        self.output
            .flush()
            .map_err(|e| LogError::writer_io(self.name.as_ref(), e))
    }

    fn dispose(&self) -> Result<()> {
        self.flush()
    }
}

impl BatchHandler for WriterHandler {
    fn handle_batch(&self, records: &[Record]) -> Result<()> {
        let mut buf = Vec::with_capacity(256 * records.len());
        for record in records {
            self.encode(record, &mut buf);
        }
        self.write(&buf)
    }
}

impl HttpHandler for WriterHandler {
    fn handle_http(&self, record: &Record) -> Result<()> {
        let mut buf = Vec::with_capacity(256);
        self.encode_http(record, &mut buf);
        self.write(&buf)
    }

    fn handle_http_batch(&self, records: &[Record]) -> Result<()> {
        let mut buf = Vec::with_capacity(256 * records.len());
        for record in records {
            self.encode_http(record, &mut buf);
        }
        self.write(&buf)
    }
}

impl std::fmt::Debug for WriterHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterHandler")
            .field("name", &self.name)
            .field("format", &self.format)
            .field("output", &self.output)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::HttpInfo;
    use std::time::Duration;

    fn memory_handler(format: Format) -> (WriterHandler, SharedBuffer) {
        let buffer = SharedBuffer::new();
        let output = Output::writer(Box::new(buffer.clone()));
        (WriterHandler::new("mem", format, output), buffer)
    }

    #[test]
    fn test_text_line() {
        let (handler, buffer) = memory_handler(Format::Text);
        handler
            .handle(
                Record::new(Severity::Info, "rule added")
                    .with_attr("rule", "r1")
                    .with_attr("note", "two words"),
            )
            .unwrap();

        let line = buffer.contents();
        assert!(line.contains("[INFO] rule added rule=r1 note=\"two words\""));
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn test_groups_and_derived_attrs() {
        let (handler, buffer) = memory_handler(Format::Text);
        let derived = handler
            .with_attrs(&[Attr::new("svc", "api")])
            .with_group("req")
            .with_attrs(&[Attr::new("id", 7u64)]);

        derived
            .handle(Record::new(Severity::Info, "done").with_attr("status", 200u16))
            .unwrap();
        // the root handler is untouched
        handler.handle(Record::new(Severity::Info, "plain")).unwrap();

        let lines = buffer.lines();
        assert!(lines[0].ends_with("done svc=api req.id=7 req.status=200"));
        assert!(lines[1].ends_with("[INFO] plain"));
    }

    #[test]
    fn test_json_line() {
        let (handler, buffer) = memory_handler(Format::Json);
        let derived = handler.with_group("db");
        derived
            .handle(Record::new(Severity::Error, "query failed").with_attr("rows", 0))
            .unwrap();

        let value: serde_json::Value = serde_json::from_str(buffer.contents().trim()).unwrap();
        assert_eq!(value["level"], "ERROR");
        assert_eq!(value["msg"], "query failed");
        assert_eq!(value["db"]["rows"], 0);
    }

    #[test]
    fn test_batch_single_write() {
        let (handler, buffer) = memory_handler(Format::Text);
        let records: Vec<Record> = (0..3)
            .map(|i| Record::new(Severity::Info, format!("m{}", i)))
            .collect();
        handler.batch().unwrap().handle_batch(&records).unwrap();
        assert_eq!(buffer.lines().len(), 3);
    }

    #[test]
    fn test_http_access_line() {
        let (handler, buffer) = memory_handler(Format::Text);
        let record = Record::new(Severity::Info, "").with_http(HttpInfo {
            method: "POST".into(),
            path: "/rules".into(),
            status: 201,
            latency: Duration::from_micros(1500),
            remote_addr: Some("10.0.0.1".into()),
            user_agent: None,
        });
        handler.http().unwrap().handle_http(&record).unwrap();
        assert!(buffer
            .contents()
            .contains("[INFO] POST /rules 201 1.5ms from=10.0.0.1"));
    }

    #[test]
    fn test_level_filter() {
        let (handler, _) = memory_handler(Format::Text);
        let handler = handler.with_level(Severity::Warning);
        assert!(handler.enabled(Severity::Error));
        assert!(!handler.enabled(Severity::Info));
    }

    #[test]
    fn test_swap_output() {
        let first = SharedBuffer::new();
        let second = SharedBuffer::new();
        let output = Output::writer(Box::new(first.clone()));
        let handler = WriterHandler::text("swap", Arc::clone(&output));

        handler.handle(Record::new(Severity::Info, "one")).unwrap();
        output.swap(Box::new(second.clone())).unwrap();
        handler.handle(Record::new(Severity::Info, "two")).unwrap();

        assert!(first.contents().contains("one"));
        assert!(!first.contents().contains("two"));
        assert!(second.contents().contains("two"));
    }

    #[test]
    fn test_swap_reports_old_writer_flush_error() {
        struct Unflushable;
        impl Write for Unflushable {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
            }
        }

        let replacement = SharedBuffer::new();
        let output = Output::writer(Box::new(Unflushable));
        let handler = WriterHandler::text("swap", Arc::clone(&output));

        let err = output.swap(Box::new(replacement.clone())).err().unwrap();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);

        handler.handle(Record::new(Severity::Info, "after")).unwrap();
        assert!(replacement.contents().contains("after"));
    }

    #[test]
    fn test_file_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let handler = WriterHandler::text("file", Output::file(&path).unwrap());

        handler.handle(Record::new(Severity::Notice, "persisted")).unwrap();
        handler.dispose().unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("[NOTICE] persisted"));
    }

    #[test]
    fn test_io_error_is_wrapped() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let handler = WriterHandler::text("broken", Output::writer(Box::new(Broken)));
        let err = handler
            .handle(Record::new(Severity::Info, "lost"))
            .unwrap_err();
        assert!(matches!(err, LogError::WriterIo { ref adapter, .. } if adapter == "broken"));
    }
}
