//! Ingestion pipeline: device byte stream → complete protocol lines.
//!
//! A [`Reader`] owns the transport's read half on a dedicated thread. It
//! frames bytes into lines with a [`LineSplitter`] and hands them to the
//! session through a bounded channel. The reader never touches the tree;
//! all merging happens on the thread that owns the session.
//!
//! # Shutdown
//!
//! The loop checks a cooperative stop flag between reads. The transport
//! must therefore return from `read` periodically (a read timeout, or
//! `WouldBlock` for non-blocking sources) for [`ReaderHandle::stop`] to
//! complete promptly.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Deserialize;

// ── Options ───────────────────────────────────────────────────────────────

/// Tuning knobs for the reader thread.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReaderOptions {
    /// Lines buffered between the reader and the session before the reader
    /// blocks.
    pub queue_capacity: usize,
    /// Bytes requested from the transport per read.
    pub chunk_size: usize,
    /// Back-off after a `WouldBlock` read, in milliseconds.
    pub poll_interval_ms: u64,
    /// Partial lines longer than this are discarded.
    pub max_line_len: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            chunk_size: 4096,
            poll_interval_ms: 10,
            max_line_len: 64 * 1024,
        }
    }
}

impl ReaderOptions {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// ── Line framing ──────────────────────────────────────────────────────────

/// Splits a byte stream into trimmed, non-empty UTF-8 lines.
#[derive(Debug)]
pub struct LineSplitter {
    buf: Vec<u8>,
    max_line_len: usize,
    /// Dropping the rest of an over-long line until its terminator.
    discarding: bool,
}

impl LineSplitter {
    pub fn new(max_line_len: usize) -> Self {
        Self { buf: Vec::new(), max_line_len, discarding: false }
    }

    /// Feed a chunk and collect every line it completes.
    ///
    /// ```
    /// use jsonwatch::ingest::LineSplitter;
    ///
    /// let mut lines = LineSplitter::new(1024);
    /// assert!(lines.push(b"{\"temp\":").is_empty());
    /// assert_eq!(lines.push(b" 235}\r\n\n{\"a\":1}\n"), ["{\"temp\": 235}", "{\"a\":1}"]);
    /// ```
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        let mut rest = chunk;
        while !rest.is_empty() {
            let (segment, terminated) = match rest.iter().position(|b| *b == b'\n') {
                Some(end) => {
                    let segment = &rest[..end];
                    rest = &rest[end + 1..];
                    (segment, true)
                }
                None => {
                    let segment = rest;
                    rest = &[];
                    (segment, false)
                }
            };
            if !self.discarding {
                self.buf.extend_from_slice(segment);
                if self.buf.len() > self.max_line_len {
                    tracing::warn!(
                        len = self.buf.len(),
                        max = self.max_line_len,
                        "discarding over-long line"
                    );
                    self.buf.clear();
                    self.discarding = true;
                }
            }
            if terminated {
                if self.discarding {
                    self.discarding = false;
                } else if let Some(line) = self.take_line() {
                    out.push(line);
                }
            }
        }
        out
    }

    /// Bytes of the pending partial line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    fn take_line(&mut self) -> Option<String> {
        let bytes = std::mem::take(&mut self.buf);
        match String::from_utf8(bytes) {
            Ok(text) => {
                let line = text.trim();
                (!line.is_empty()).then(|| line.to_string())
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropping line with invalid UTF-8");
                None
            }
        }
    }
}

// ── Reader thread ─────────────────────────────────────────────────────────

/// Why a reader stopped on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnect {
    /// The transport reported end of stream.
    EndOfStream,
    /// The transport failed with a non-transient error.
    Error { kind: io::ErrorKind, message: String },
}

impl std::fmt::Display for Disconnect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Disconnect::EndOfStream => f.write_str("end of stream"),
            Disconnect::Error { message, .. } => f.write_str(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    Line(String),
    Disconnected(Disconnect),
}

pub struct Reader;

impl Reader {
    /// Start a reader thread consuming `source`.
    ///
    /// # Errors
    ///
    /// Fails only if the thread cannot be spawned.
    pub fn spawn<R: Read + Send + 'static>(
        source: R,
        options: ReaderOptions,
    ) -> io::Result<ReaderHandle> {
        let (tx, rx) = mpsc::sync_channel(options.queue_capacity.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("jsonwatch-reader".into())
            .spawn(move || read_loop(source, &options, &tx, &flag))?;
        Ok(ReaderHandle { rx: Some(rx), stop, thread: Some(thread) })
    }
}

fn read_loop<R: Read>(
    mut source: R,
    options: &ReaderOptions,
    tx: &SyncSender<ReaderEvent>,
    stop: &AtomicBool,
) {
    let mut splitter = LineSplitter::new(options.max_line_len);
    let mut chunk = vec![0u8; options.chunk_size.max(1)];
    tracing::debug!("reader started");
    while !stop.load(Ordering::Acquire) {
        let n = match source.read(&mut chunk) {
            Ok(0) => {
                tracing::info!("device closed the stream");
                let _ = tx.send(ReaderEvent::Disconnected(Disconnect::EndOfStream));
                return;
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(options.poll_interval());
                continue;
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::Interrupted) => {
                continue;
            }
            Err(e) => {
                tracing::warn!(error = %e, "device read failed");
                let _ = tx.send(ReaderEvent::Disconnected(Disconnect::Error {
                    kind: e.kind(),
                    message: e.to_string(),
                }));
                return;
            }
        };
        for line in splitter.push(&chunk[..n]) {
            if stop.load(Ordering::Acquire) || tx.send(ReaderEvent::Line(line)).is_err() {
                return;
            }
        }
    }
    tracing::debug!("reader stopped");
}

/// Owner side of a running reader.
///
/// Dropping the handle stops the reader and joins its thread.
pub struct ReaderHandle {
    rx: Option<Receiver<ReaderEvent>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ReaderHandle {
    /// Next queued event, without blocking.
    pub fn try_recv(&self) -> Option<ReaderEvent> {
        let rx = self.rx.as_ref()?;
        match rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Wait up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ReaderEvent> {
        self.rx.as_ref()?.recv_timeout(timeout).ok()
    }

    /// Every currently queued event, oldest first.
    pub fn drain(&self) -> Vec<ReaderEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop the reader, discard queued lines and join the thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        // Unblocks a reader waiting on a full queue.
        drop(self.rx.take());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("reader thread panicked");
            }
        }
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ReaderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderHandle")
            .field("stopping", &self.stop.load(Ordering::Relaxed))
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Instant;

    fn collect_until_disconnect(handle: &ReaderHandle) -> Vec<ReaderEvent> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut events = Vec::new();
        while Instant::now() < deadline {
            if let Some(event) = handle.recv_timeout(Duration::from_millis(50)) {
                let done = matches!(event, ReaderEvent::Disconnected(_));
                events.push(event);
                if done {
                    break;
                }
            }
        }
        events
    }

    #[test]
    fn splitter_skips_blank_and_keeps_partial() {
        let mut lines = LineSplitter::new(64);
        assert_eq!(lines.push(b"\n  \n{\"a\""), Vec::<String>::new());
        assert_eq!(lines.pending(), 4);
        assert_eq!(lines.push(b":1}\n"), ["{\"a\":1}"]);
        assert_eq!(lines.pending(), 0);
    }

    #[test]
    fn splitter_drops_invalid_utf8_only() {
        let mut lines = LineSplitter::new(64);
        assert_eq!(lines.push(b"\xff\xfe\n{\"b\":2}\n"), ["{\"b\":2}"]);
    }

    #[test]
    fn splitter_discards_over_long_lines() {
        let mut lines = LineSplitter::new(8);
        assert!(lines.push(b"0123456789").is_empty());
        assert_eq!(lines.pending(), 0);
        assert!(lines.push(b"more tail\n").is_empty());
        assert_eq!(lines.push(b"{}\n"), ["{}"]);
    }

    #[test]
    fn reader_delivers_lines_then_end_of_stream() {
        let source = Cursor::new(b"{\"t\":1}\n{\"t\":2}\npartial".to_vec());
        let handle = Reader::spawn(source, ReaderOptions::default()).unwrap();
        let events = collect_until_disconnect(&handle);
        assert_eq!(
            events,
            [
                ReaderEvent::Line("{\"t\":1}".into()),
                ReaderEvent::Line("{\"t\":2}".into()),
                ReaderEvent::Disconnected(Disconnect::EndOfStream),
            ]
        );
        handle.stop();
    }

    struct Failing;

    impl Read for Failing {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"))
        }
    }

    #[test]
    fn reader_reports_transport_errors() {
        let handle = Reader::spawn(Failing, ReaderOptions::default()).unwrap();
        let events = collect_until_disconnect(&handle);
        assert!(matches!(
            events.as_slice(),
            [ReaderEvent::Disconnected(Disconnect::Error { kind: io::ErrorKind::BrokenPipe, .. })]
        ));
    }

    struct Idle;

    impl Read for Idle {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::WouldBlock, "no data"))
        }
    }

    #[test]
    fn stop_returns_for_idle_sources() {
        let options = ReaderOptions { poll_interval_ms: 5, ..ReaderOptions::default() };
        let handle = Reader::spawn(Idle, options).unwrap();
        assert!(handle.try_recv().is_none());
        let started = Instant::now();
        handle.stop();
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn options_fill_missing_fields() {
        let options: ReaderOptions = serde_json::from_str(r#"{"queue_capacity": 8}"#).unwrap();
        assert_eq!(options.queue_capacity, 8);
        assert_eq!(options.max_line_len, ReaderOptions::default().max_line_len);
    }
}
