//! Sender engine: a Driver and a Listener sharing one window.
//!
//! ```text
//!            ┌──────────── Shared ─────────────┐
//!            │  Mutex<Inner>   +   Notify      │
//!            │  state, SendWindow, abort flag  │
//!            └──────▲─────────────────▲────────┘
//!     wait_for(pred)│                 │update(f)
//!            ┌──────┴─────┐     ┌─────┴──────┐
//!            │   Driver   │     │  Listener  │
//!            │ SYN / DATA │     │ ACK, RESET │
//!            │ FIN, RESET │     │ rto ticks  │
//!            └──────┬─────┘     └─────▲──────┘
//!                   │ send_to         │ recv_from (bounded by rto)
//!                   └──── Arc<Socket> ┘
//! ```
//!
//! The Driver runs on the caller's task and owns every transmission; the
//! Listener is spawned and owns every receive.  Neither holds the lock across
//! an `.await`: the Driver takes what it must send out of the window under
//! the lock and transmits afterwards.
//!
//! Every mutation goes through [`Shared::update`], which wakes all waiters.
//! Every wait goes through [`Shared::wait_for`], which arms its wake-up
//! before evaluating the predicate and re-evaluates after each wake.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::config::SenderConfig;
use crate::error::{PtpError, Result};
use crate::event_log::{Direction, EventLog};
use crate::receiver::is_transient;
use crate::segment::{Kind, Segment};
use crate::seq;
use crate::socket::{Socket, SocketError};
use crate::state::ConnectionState;
use crate::window::{AckOutcome, SendWindow, WindowStats};

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Outcome of a completed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderReport {
    /// Initial sequence number used for the connection.
    pub isn: u16,
    /// Stream length in bytes.
    pub bytes: u64,
    /// DATA segments the stream was split into.
    pub segments: usize,
    pub stats: WindowStats,
}

impl SenderReport {
    pub fn summary_lines(&self) -> Vec<String> {
        vec![
            format!("Amount of (original) Data Transferred (in bytes): {}", self.bytes),
            format!(
                "Number of Data Segments Sent (excluding retransmissions): {}",
                self.stats.segments_sent
            ),
            format!("Number of Retransmitted Segments: {}", self.stats.retransmissions),
            format!("Number of Fast Retransmissions: {}", self.stats.fast_retransmits),
            format!("Number of Timeouts: {}", self.stats.timeouts),
            format!("Number of Duplicate Acknowledgements received: {}", self.stats.duplicate_acks),
        ]
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Why the connection stopped before a clean close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Abort {
    PeerReset,
    ListenerStopped,
}

impl Abort {
    fn into_error(self) -> PtpError {
        match self {
            Abort::PeerReset => PtpError::PeerReset,
            Abort::ListenerStopped => PtpError::Aborted("listener stopped".into()),
        }
    }
}

/// What the Driver should do next during the transfer phase.
enum Step {
    Transmit(Vec<Segment>),
    Close,
    Stop(Abort),
}

#[derive(Debug)]
struct Inner {
    state: ConnectionState,
    isn: u16,
    window: SendWindow,
    /// Receive timeouts seen by the Listener.
    ticks: u64,
    abort: Option<Abort>,
}

impl Inner {
    fn new(isn: u16, window: SendWindow) -> Self {
        Self {
            state: ConnectionState::Idle,
            isn,
            window,
            ticks: 0,
            abort: None,
        }
    }

    fn advance(&mut self, next: ConnectionState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        log::debug!("[sender] {} -> {}", self.state, next);
        self.state = next;
    }

    fn terminate(&mut self) {
        if !self.state.is_terminal() {
            self.advance(ConnectionState::Terminated);
        }
    }

    fn abort(&mut self, why: Abort) {
        if self.abort.is_none() {
            self.abort = Some(why);
        }
        self.terminate();
    }

    fn fin_seq(&self) -> u16 {
        self.window.end_seq()
    }

    /// The Listener's receive timed out.
    fn on_tick(&mut self) {
        self.ticks += 1;
        log::trace!("[sender] receive timeout #{}", self.ticks);
        if self.state == ConnectionState::Transfer && self.window.on_timeout() {
            log::debug!(
                "[sender] timeout, frontier {} queued",
                self.window.frontier_seq()
            );
        }
    }

    fn on_segment(&mut self, segment: &Segment, now: Instant, rto: Duration) {
        match segment.kind {
            Kind::Ack => self.on_ack(segment.seq, now, rto),
            Kind::Reset => {
                log::warn!("[sender] RESET received in state {}", self.state);
                self.abort(Abort::PeerReset);
            }
            _ => log::debug!("[sender] ignoring {segment}"),
        }
    }

    fn on_ack(&mut self, ack: u16, now: Instant, rto: Duration) {
        match self.state {
            ConnectionState::Connect if ack == seq::add(self.isn, 1) => {
                self.advance(ConnectionState::Transfer);
            }
            ConnectionState::Transfer => {
                match self.window.on_ack(ack) {
                    AckOutcome::Complete => {
                        self.advance(ConnectionState::Closing);
                        return;
                    }
                    AckOutcome::FastRetransmit => {
                        log::debug!("[sender] fast retransmit of {ack}");
                    }
                    AckOutcome::Ignored => log::debug!("[sender] stale ACK {ack}"),
                    AckOutcome::Advanced(_) | AckOutcome::Duplicate => {}
                }
                self.window.expire_frontier(now, rto);
            }
            ConnectionState::Closing if ack == seq::add(self.fin_seq(), 1) => {
                self.advance(ConnectionState::Terminated);
            }
            _ => log::debug!("[sender] ignoring ACK {ack} in state {}", self.state),
        }
    }

    fn next_step(&mut self, now: Instant) -> Option<Step> {
        if let Some(why) = self.abort {
            return Some(Step::Stop(why));
        }
        if self.state == ConnectionState::Transfer && self.window.is_complete() {
            self.advance(ConnectionState::Closing);
        }
        if self.state == ConnectionState::Closing {
            return Some(Step::Close);
        }

        let mut batch = self.window.drain_retransmits(now);
        while let Some(segment) = self.window.next_sendable(now) {
            batch.push(segment);
        }
        (!batch.is_empty()).then_some(Step::Transmit(batch))
    }
}

/// State shared by the Driver and the Listener.
struct Shared {
    inner: Mutex<Inner>,
    changed: Notify,
}

impl Shared {
    fn new(inner: Inner) -> Self {
        Self {
            inner: Mutex::new(inner),
            changed: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutate under the lock, then wake every waiter.
    fn update<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        let out = {
            let mut inner = self.lock();
            f(&mut inner)
        };
        self.changed.notify_waiters();
        out
    }

    /// Block until `f` returns `Some`, re-checking after every update.
    async fn wait_for<T>(&self, mut f: impl FnMut(&mut Inner) -> Option<T>) -> T {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let ready = {
                let mut inner = self.lock();
                f(&mut inner)
            };
            if let Some(out) = ready {
                return out;
            }
            notified.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

struct Listener {
    socket: Arc<Socket>,
    shared: Arc<Shared>,
    peer: SocketAddr,
    rto: Duration,
    log: EventLog,
}

impl Listener {
    async fn run(self) -> Result<()> {
        let result = self.listen().await;
        if let Err(e) = &result {
            log::warn!("[sender] listener failed: {e}");
            self.shared.update(|inner| inner.abort(Abort::ListenerStopped));
        }
        result
    }

    async fn listen(&self) -> Result<()> {
        loop {
            let done = self.shared.lock().state.is_terminal();
            if done {
                return Ok(());
            }
            match tokio::time::timeout(self.rto, self.socket.recv_from()).await {
                Err(_) => self.shared.update(Inner::on_tick),
                Ok(Ok((segment, from))) => {
                    if from != self.peer {
                        log::debug!("[sender] ignoring {segment} from stranger {from}");
                        continue;
                    }
                    self.log.record(Direction::Rcv, &segment);
                    let now = Instant::now();
                    self.shared
                        .update(|inner| inner.on_segment(&segment, now, self.rto));
                }
                Ok(Err(SocketError::Malformed { from, len, source })) => {
                    log::warn!("[sender] discarding datagram from {from}: {source}");
                    self.log.record_malformed(len);
                }
                Ok(Err(SocketError::Io(e))) if is_transient(&e) => {
                    log::debug!("[sender] transient socket error: {e}");
                }
                Ok(Err(e)) => return Err(e.into()),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

struct Driver {
    socket: Arc<Socket>,
    shared: Arc<Shared>,
    peer: SocketAddr,
    config: SenderConfig,
    log: EventLog,
}

impl Driver {
    async fn run(&self) -> Result<()> {
        self.connect().await?;
        self.transfer().await?;
        self.close().await
    }

    async fn transmit(&self, segment: &Segment) -> Result<()> {
        let sent = self.socket.send_to(segment, self.peer).await;
        settle_send(&self.log, segment, sent)
    }

    /// Bounded wait for the Listener to move the state past `from`.
    async fn await_transition(&self, from: ConnectionState) -> Option<Result<()>> {
        let wait = self.shared.wait_for(|inner| {
            if let Some(why) = inner.abort {
                Some(Err(why.into_error()))
            } else if inner.state != from {
                Some(Ok(()))
            } else {
                None
            }
        });
        tokio::time::timeout(self.config.rto, wait).await.ok()
    }

    async fn connect(&self) -> Result<()> {
        let isn = self.shared.update(|inner| {
            inner.advance(ConnectionState::Connect);
            inner.isn
        });
        let syn = Segment::control(Kind::Syn, isn);

        for attempt in 1..=self.config.syn_attempts {
            self.transmit(&syn).await?;
            match self.await_transition(ConnectionState::Connect).await {
                Some(outcome) => {
                    outcome?;
                    log::info!("[sender] connected to {} (isn={isn})", self.peer);
                    return Ok(());
                }
                None => log::debug!("[sender] SYN attempt {attempt} timed out"),
            }
        }

        log::warn!(
            "[sender] no answer to {} SYNs, resetting",
            self.config.syn_attempts
        );
        self.transmit(&Segment::control(Kind::Reset, 0)).await?;
        self.shared.update(Inner::terminate);
        Err(PtpError::HandshakeFailed {
            attempts: self.config.syn_attempts,
        })
    }

    async fn transfer(&self) -> Result<()> {
        loop {
            let step = self
                .shared
                .wait_for(|inner| inner.next_step(Instant::now()))
                .await;
            match step {
                Step::Transmit(batch) => {
                    for segment in &batch {
                        self.transmit(segment).await?;
                    }
                }
                Step::Close => return Ok(()),
                Step::Stop(why) => return Err(why.into_error()),
            }
        }
    }

    /// Send FIN until it is acknowledged.
    async fn close(&self) -> Result<()> {
        let fin = Segment::control(Kind::Fin, self.shared.lock().fin_seq());
        loop {
            self.transmit(&fin).await?;
            if let Some(outcome) = self.await_transition(ConnectionState::Closing).await {
                outcome?;
                log::info!("[sender] connection closed");
                return Ok(());
            }
            log::debug!("[sender] FIN {} unanswered, retrying", fin.seq);
        }
    }
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

/// Send-side connection endpoint for one transfer.
pub struct Sender {
    socket: Arc<Socket>,
    peer: SocketAddr,
    config: SenderConfig,
    log: EventLog,
    isn: u16,
}

impl Sender {
    pub fn new(socket: Socket, peer: SocketAddr, config: SenderConfig, log: EventLog) -> Result<Self> {
        config.validate()?;
        let isn = config.isn.unwrap_or_else(|| rand::rng().random());
        Ok(Self {
            socket: Arc::new(socket),
            peer,
            config,
            log,
            isn,
        })
    }

    pub fn isn(&self) -> u16 {
        self.isn
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    /// Connect, deliver `data` reliably, and close.
    ///
    /// Fails with [`PtpError::HandshakeFailed`] when no SYN is answered, or
    /// [`PtpError::PeerReset`] when the receiver resets.  Loss is never an
    /// error: the transfer retries until every byte is acknowledged.
    pub async fn send(self, data: &[u8]) -> Result<SenderReport> {
        let window = SendWindow::new(
            data,
            seq::add(self.isn, 1),
            self.config.mss,
            self.config.max_win,
        );
        log::info!(
            "[sender] {} bytes in {} segments to {}",
            window.total_bytes(),
            window.segment_count(),
            self.peer
        );
        let shared = Arc::new(Shared::new(Inner::new(self.isn, window)));

        let listener: JoinHandle<Result<()>> = tokio::spawn(
            Listener {
                socket: Arc::clone(&self.socket),
                shared: Arc::clone(&shared),
                peer: self.peer,
                rto: self.config.rto,
                log: self.log.clone(),
            }
            .run(),
        );
        let driver = Driver {
            socket: Arc::clone(&self.socket),
            shared: Arc::clone(&shared),
            peer: self.peer,
            config: self.config.clone(),
            log: self.log.clone(),
        };
        let outcome = driver.run().await;

        listener.abort();
        match listener.await {
            Ok(Err(e)) => return Err(e),
            Err(e) if e.is_panic() => return Err(PtpError::Aborted(e.to_string())),
            _ => {}
        }
        outcome?;

        let report = {
            let inner = shared.lock();
            SenderReport {
                isn: self.isn,
                bytes: inner.window.total_bytes(),
                segments: inner.window.segment_count(),
                stats: inner.window.stats(),
            }
        };
        for line in report.summary_lines() {
            self.log.note(&line);
        }
        Ok(report)
    }
}

/// Convenience wrapper: build a [`Sender`] and run one transfer.
pub async fn send(
    socket: Socket,
    peer: SocketAddr,
    config: SenderConfig,
    log: EventLog,
    data: &[u8],
) -> Result<SenderReport> {
    Sender::new(socket, peer, config, log)?.send(data).await
}

/// `snd` is logged only for a datagram that left the socket. Transient
/// errors are swallowed; the segment goes out again on retransmission.
fn settle_send(
    log: &EventLog,
    segment: &Segment,
    sent: std::result::Result<(), SocketError>,
) -> Result<()> {
    match sent {
        Ok(()) => log.record(Direction::Snd, segment),
        Err(SocketError::Io(e)) if is_transient(&e) => {
            log::debug!("[sender] transient send error, {segment} not sent: {e}");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
