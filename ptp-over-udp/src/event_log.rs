//! Protocol event log.
//!
//! Each role gets an [`EventLog`] handle at construction and records one
//! [`Event`] per segment it sends, receives, or drops.  Where the events end
//! up is decided by the [`EventSink`] behind the handle: a file for the
//! binary, memory for tests.
//!
//! A line looks like:
//!
//! ```text
//! snd  0.00        SYN    23811   0
//! rcv  1.37        ACK    23812   0
//! drp  2.10        DATA   23812   1000
//! ```

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::segment::{Kind, Segment};

/// Which way a logged segment went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Put on the wire by this role.
    Snd,
    /// Accepted from the wire.
    Rcv,
    /// Discarded by the loss simulator.
    Drp,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Snd => "snd",
            Direction::Rcv => "rcv",
            Direction::Drp => "drp",
        })
    }
}

/// One log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub direction: Direction,
    /// Time since the role's connection clock started.
    pub elapsed: Duration,
    pub kind: Kind,
    pub seq: u16,
    /// Payload bytes carried by the segment.
    pub len: usize,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = self.elapsed.as_secs_f64() * 1000.0;
        write!(
            f,
            "{}  {:<10.2}  {:<5}  {:<6}  {:<6}",
            self.direction,
            ms,
            self.kind.name(),
            self.seq,
            self.len
        )
    }
}

/// Kind column of a malformed-datagram line.
pub const MALFORMED: &str = "BAD";

/// Destination for protocol events.
pub trait EventSink: Send + Sync {
    fn record(&self, event: &Event);

    /// Free-text line, used for end-of-run summaries.
    fn note(&self, _line: &str) {}
}

/// Appends formatted lines to a file, flushing after every write.
pub struct FileSink {
    out: Mutex<BufWriter<File>>,
}

impl FileSink {
    /// Create (truncating) the log file at `path`.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            out: Mutex::new(BufWriter::new(file)),
        })
    }

    fn write_line(&self, line: &dyn fmt::Display) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(out, "{line}").and_then(|_| out.flush()) {
            log::warn!("event log write failed: {e}");
        }
    }
}

impl EventSink for FileSink {
    fn record(&self, event: &Event) {
        self.write_line(event);
    }

    fn note(&self, line: &str) {
        self.write_line(&line);
    }
}

/// Keeps events in memory for later inspection.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
    notes: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Recorded events matching `direction` and `kind`, in order.
    pub fn filter(&self, direction: Direction, kind: Kind) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.direction == direction && e.kind == kind)
            .collect()
    }

    pub fn notes(&self) -> Vec<String> {
        self.notes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: &Event) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }

    fn note(&self, line: &str) {
        self.notes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_owned());
    }
}

/// Discards everything.
pub struct NullSink;

impl EventSink for NullSink {
    fn record(&self, _event: &Event) {}
}

/// Cloneable handle injected into an engine.
///
/// The connection clock starts at the first recorded event, so every log
/// begins at `0.00`.
#[derive(Clone)]
pub struct EventLog {
    role: &'static str,
    started: Arc<Mutex<Option<Instant>>>,
    sink: Arc<dyn EventSink>,
}

impl EventLog {
    pub fn new(role: &'static str, sink: Arc<dyn EventSink>) -> Self {
        Self {
            role,
            started: Arc::new(Mutex::new(None)),
            sink,
        }
    }

    /// A handle that only mirrors events to the `log` facade.
    pub fn discard(role: &'static str) -> Self {
        Self::new(role, Arc::new(NullSink))
    }

    /// Time since the connection clock started (zero before the first event).
    pub fn elapsed(&self) -> Duration {
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map_or(Duration::ZERO, |t| t.elapsed())
    }

    /// Read the connection clock, starting it on first use.
    fn clock(&self) -> Duration {
        let mut started = self.started.lock().unwrap_or_else(PoisonError::into_inner);
        match *started {
            Some(t) => t.elapsed(),
            None => {
                *started = Some(Instant::now());
                Duration::ZERO
            }
        }
    }

    pub fn record(&self, direction: Direction, segment: &Segment) {
        let elapsed = self.clock();
        let event = Event {
            direction,
            elapsed,
            kind: segment.kind,
            seq: segment.seq,
            len: segment.payload.len(),
        };
        log::debug!("[{}] {event}", self.role);
        self.sink.record(&event);
    }

    /// Record an undecodable datagram of `len` bytes as a drop.
    ///
    /// There is no kind or sequence number to report, so the line goes to
    /// the sink as a note shaped like a `drp` event.
    pub fn record_malformed(&self, len: usize) {
        let ms = self.clock().as_secs_f64() * 1000.0;
        let line = format!(
            "{}  {:<10.2}  {:<5}  {:<6}  {:<6}",
            Direction::Drp,
            ms,
            MALFORMED,
            "-",
            len
        );
        log::debug!("[{}] {line}", self.role);
        self.sink.note(&line);
    }

    pub fn note(&self, line: &str) {
        log::info!("[{}] {line}", self.role);
        self.sink.note(line);
    }
}
