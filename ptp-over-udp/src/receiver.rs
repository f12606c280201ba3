//! Receiver engine.
//!
//! A single task that answers the handshake, reassembles DATA into the byte
//! stream, emits a cumulative ACK for every DATA segment it accepts, and
//! tears down after a fixed linger once the FIN arrives.
//!
//! ```text
//!  Idle ──SYN──▶ Connect ──DATA──▶ Transfer ──FIN──▶ Closing ──linger──▶ Terminated
//!    └──────────────── RESET (any state) ─────────────────────────────▶ Terminated
//! ```
//!
//! Every forward-direction segment passes through the [`LossSimulator`] on
//! arrival and every ACK passes through it just before transmission.  The
//! reassembled stream is flushed exactly once, when the first FIN is
//! accepted; retransmitted FINs during linger are only re-acknowledged.

use std::net::SocketAddr;

use crate::config::ReceiverConfig;
use crate::error::{PtpError, Result};
use crate::event_log::{Direction, EventLog};
use crate::reassembly::{Delivery, ReassemblyBuffer};
use crate::segment::{Kind, Segment};
use crate::seq;
use crate::simulator::{LossModel, LossSimulator};
use crate::socket::{Socket, SocketError};
use crate::state::ConnectionState;
use crate::timer::LingerTimer;

/// What the receiver saw over one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverReport {
    /// The reassembled stream as flushed at FIN (empty if no FIN arrived).
    pub data: Vec<u8>,
    /// DATA segments that were new (buffered or delivered).
    pub segments_received: u64,
    /// DATA segments already held or already delivered.
    pub duplicates: u64,
    /// Forward-direction segments dropped by the simulator.
    pub forward_drops: u64,
    /// ACKs dropped by the simulator.
    pub reverse_drops: u64,
    /// Datagrams that failed to decode.
    pub malformed: u64,
}

impl ReceiverReport {
    /// Human-readable end-of-run summary.
    pub fn summary_lines(&self) -> Vec<String> {
        vec![
            format!("Amount of (original) Data Received (in bytes): {}", self.data.len()),
            format!("Number of (original) Data Segments Received: {}", self.segments_received),
            format!("Number of duplicate Data segments received: {}", self.duplicates),
            format!("Number of Data segments dropped: {}", self.forward_drops),
            format!("Number of ACK segments dropped: {}", self.reverse_drops),
        ]
    }
}

/// Receive-side connection endpoint.
pub struct Receiver {
    socket: Socket,
    config: ReceiverConfig,
    log: EventLog,
    loss: LossSimulator,
    state: ConnectionState,
    /// Learnt from the first accepted SYN.
    peer: Option<SocketAddr>,
    isn: Option<u16>,
    buffer: Option<ReassemblyBuffer>,
    fin_seq: Option<u16>,
    linger: LingerTimer,
    reset: bool,
    report: ReceiverReport,
}

impl Receiver {
    pub fn new(socket: Socket, config: ReceiverConfig, log: EventLog) -> Result<Self> {
        config.validate()?;
        let loss = LossSimulator::new(
            LossModel {
                flp: config.flp,
                rlp: config.rlp,
            },
            config.seed,
        );
        Ok(Self {
            socket,
            config,
            log,
            loss,
            state: ConnectionState::Idle,
            peer: None,
            isn: None,
            buffer: None,
            fin_seq: None,
            linger: LingerTimer::new(),
            reset: false,
            report: ReceiverReport::default(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    /// Serve one connection to completion.
    ///
    /// Returns the report after the linger period, or
    /// [`PtpError::PeerReset`] if the sender reset the connection.
    pub async fn run(mut self) -> Result<ReceiverReport> {
        log::info!("[receiver] listening on {}", self.socket.local_addr);

        while !self.state.is_terminal() {
            tokio::select! {
                result = self.socket.recv_from() => match result {
                    Ok((segment, from)) => self.on_segment(segment, from).await?,
                    Err(SocketError::Malformed { from, len, source }) => {
                        log::warn!("[receiver] discarding datagram from {from}: {source}");
                        self.log.record_malformed(len);
                        self.report.malformed += 1;
                    }
                    Err(SocketError::Io(e)) if is_transient(&e) => {
                        log::debug!("[receiver] transient socket error: {e}");
                    }
                    Err(e) => return Err(e.into()),
                },
                _ = self.linger.fired() => {
                    log::debug!("[receiver] linger expired");
                    self.state = ConnectionState::Terminated;
                }
            }
        }

        for line in self.report.summary_lines() {
            self.log.note(&line);
        }
        if self.reset {
            return Err(PtpError::PeerReset);
        }
        log::info!(
            "[receiver] connection closed, {} bytes received",
            self.report.data.len()
        );
        Ok(self.report)
    }

    async fn on_segment(&mut self, segment: Segment, from: SocketAddr) -> Result<()> {
        match self.peer {
            Some(peer) if peer != from => {
                log::debug!("[receiver] ignoring {segment} from stranger {from}");
                return Ok(());
            }
            None if !matches!(segment.kind, Kind::Syn | Kind::Reset) => {
                log::debug!("[receiver] ignoring {segment} before handshake");
                return Ok(());
            }
            _ => {}
        }

        if segment.kind.is_forward() && self.loss.forward_drop() {
            self.log.record(Direction::Drp, &segment);
            self.report.forward_drops += 1;
            return Ok(());
        }
        self.log.record(Direction::Rcv, &segment);

        match segment.kind {
            Kind::Syn => self.on_syn(segment.seq, from).await,
            Kind::Data => self.on_data(segment).await,
            Kind::Fin => self.on_fin(segment.seq).await,
            Kind::Reset => {
                log::warn!("[receiver] RESET from {from} in state {}", self.state);
                self.linger.cancel();
                self.state = ConnectionState::Terminated;
                self.reset = true;
                Ok(())
            }
            Kind::Ack => {
                log::debug!("[receiver] unexpected ACK seq={}", segment.seq);
                Ok(())
            }
        }
    }

    async fn on_syn(&mut self, isn: u16, from: SocketAddr) -> Result<()> {
        let next = seq::add(isn, 1);
        match self.state {
            ConnectionState::Idle => {
                if let Some(expected) = self.config.expected_sender {
                    if expected != from {
                        log::warn!("[receiver] SYN from {from}, expected {expected}");
                    }
                }
                log::info!("[receiver] SYN from {from}, isn={isn}");
                self.peer = Some(from);
                self.isn = Some(isn);
                self.buffer = Some(ReassemblyBuffer::new(next));
                self.state = ConnectionState::Connect;
                self.reply_ack(next).await
            }
            _ if self.isn == Some(isn) => self.reply_ack(next).await,
            _ => {
                log::warn!("[receiver] ignoring SYN isn={isn} in state {}", self.state);
                Ok(())
            }
        }
    }

    async fn on_data(&mut self, segment: Segment) -> Result<()> {
        if !matches!(
            self.state,
            ConnectionState::Connect | ConnectionState::Transfer
        ) {
            log::debug!("[receiver] ignoring {segment} in state {}", self.state);
            return Ok(());
        }
        let Some(buffer) = self.buffer.as_mut() else {
            return Ok(());
        };
        self.state = ConnectionState::Transfer;

        match buffer.on_data(segment.seq, &segment.payload) {
            Delivery::Advanced | Delivery::Buffered => self.report.segments_received += 1,
            Delivery::Duplicate | Delivery::Stale => self.report.duplicates += 1,
        }
        let ack = buffer.ack_number();
        self.reply_ack(ack).await
    }

    async fn on_fin(&mut self, fin_seq: u16) -> Result<()> {
        let ack = seq::add(fin_seq, 1);
        match self.state {
            ConnectionState::Connect | ConnectionState::Transfer => {
                let data = self
                    .buffer
                    .as_mut()
                    .map(ReassemblyBuffer::take_stream)
                    .unwrap_or_default();
                if let Some(path) = &self.config.output {
                    tokio::fs::write(path, &data).await?;
                    log::info!("[receiver] wrote {} bytes to {}", data.len(), path.display());
                }
                self.report.data = data;
                self.fin_seq = Some(fin_seq);
                self.reply_ack(ack).await?;
                self.state = ConnectionState::Closing;
                self.linger.arm(self.config.linger);
                Ok(())
            }
            ConnectionState::Closing if self.fin_seq == Some(fin_seq) => self.reply_ack(ack).await,
            _ => {
                log::debug!("[receiver] ignoring FIN seq={fin_seq} in state {}", self.state);
                Ok(())
            }
        }
    }

    async fn reply_ack(&mut self, seq: u16) -> Result<()> {
        let Some(peer) = self.peer else {
            return Ok(());
        };
        let ack = Segment::ack(seq);
        if self.loss.reverse_drop() {
            self.log.record(Direction::Drp, &ack);
            self.report.reverse_drops += 1;
            return Ok(());
        }
        self.socket.send_to(&ack, peer).await?;
        self.log.record(Direction::Snd, &ack);
        Ok(())
    }
}

/// Convenience wrapper: build a [`Receiver`] and serve one connection.
pub async fn receive(socket: Socket, config: ReceiverConfig, log: EventLog) -> Result<ReceiverReport> {
    Receiver::new(socket, config, log)?.run().await
}

/// Errors a UDP socket may surface after an ICMP unreachable; the next
/// datagram can still arrive.
pub(crate) fn is_transient(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset | ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::event_log::MemorySink;

    async fn loopback() -> Socket {
        Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap()
    }

    async fn recv(sock: &Socket) -> Segment {
        tokio::time::timeout(Duration::from_secs(5), sock.recv_from())
            .await
            .expect("no reply")
            .expect("recv failed")
            .0
    }

    #[tokio::test]
    async fn duplicate_data_is_idempotent_and_gap_is_filled() {
        let sink = Arc::new(MemorySink::new());
        let config = ReceiverConfig {
            linger: Duration::from_millis(50),
            ..ReceiverConfig::default()
        };
        let receiver = Receiver::new(loopback().await, config, EventLog::new("receiver", sink.clone()))
            .unwrap();
        let addr = receiver.local_addr();
        let task = tokio::spawn(receiver.run());

        let peer = loopback().await;
        peer.send_to(&Segment::control(Kind::Syn, 999), addr).await.unwrap();
        assert_eq!(recv(&peer).await, Segment::ack(1000));

        let a = Segment::data(1000, vec![b'a'; 1000]);
        let b = Segment::data(2000, vec![b'b'; 1000]);
        let c = Segment::data(3000, vec![b'c'; 1000]);

        peer.send_to(&a, addr).await.unwrap();
        assert_eq!(recv(&peer).await, Segment::ack(2000));
        peer.send_to(&c, addr).await.unwrap();
        assert_eq!(recv(&peer).await, Segment::ack(2000));
        peer.send_to(&a, addr).await.unwrap();
        assert_eq!(recv(&peer).await, Segment::ack(2000));
        peer.send_to(&b, addr).await.unwrap();
        assert_eq!(recv(&peer).await, Segment::ack(4000));

        peer.send_to(&Segment::control(Kind::Fin, 4000), addr).await.unwrap();
        assert_eq!(recv(&peer).await, Segment::ack(4001));

        let report = task.await.unwrap().unwrap();
        let mut expected = vec![b'a'; 1000];
        expected.extend(vec![b'b'; 1000]);
        expected.extend(vec![b'c'; 1000]);
        assert_eq!(report.data, expected);
        assert_eq!(report.segments_received, 3);
        assert_eq!(report.duplicates, 1);
        assert_eq!(sink.filter(Direction::Snd, Kind::Ack).len(), 6);
        assert!(!sink.notes().is_empty());
    }

    #[tokio::test]
    async fn retransmitted_syn_gets_same_ack() {
        let config = ReceiverConfig {
            linger: Duration::from_millis(20),
            ..ReceiverConfig::default()
        };
        let receiver = Receiver::new(loopback().await, config, EventLog::discard("receiver")).unwrap();
        let addr = receiver.local_addr();
        let task = tokio::spawn(receiver.run());

        let peer = loopback().await;
        let syn = Segment::control(Kind::Syn, 65_535);
        peer.send_to(&syn, addr).await.unwrap();
        assert_eq!(recv(&peer).await, Segment::ack(0));
        peer.send_to(&syn, addr).await.unwrap();
        assert_eq!(recv(&peer).await, Segment::ack(0));

        peer.send_to(&Segment::control(Kind::Fin, 0), addr).await.unwrap();
        assert_eq!(recv(&peer).await, Segment::ack(1));
        let report = task.await.unwrap().unwrap();
        assert!(report.data.is_empty());
    }

    #[tokio::test]
    async fn late_fin_during_linger_is_reacked() {
        let config = ReceiverConfig {
            linger: Duration::from_millis(300),
            ..ReceiverConfig::default()
        };
        let receiver = Receiver::new(loopback().await, config, EventLog::discard("receiver")).unwrap();
        let addr = receiver.local_addr();
        let task = tokio::spawn(receiver.run());

        let peer = loopback().await;
        peer.send_to(&Segment::control(Kind::Syn, 10), addr).await.unwrap();
        recv(&peer).await;
        peer.send_to(&Segment::data(11, b"xyz".to_vec()), addr).await.unwrap();
        assert_eq!(recv(&peer).await, Segment::ack(14));

        let fin = Segment::control(Kind::Fin, 14);
        peer.send_to(&fin, addr).await.unwrap();
        assert_eq!(recv(&peer).await, Segment::ack(15));
        peer.send_to(&fin, addr).await.unwrap();
        assert_eq!(recv(&peer).await, Segment::ack(15));

        let report = task.await.unwrap().unwrap();
        assert_eq!(report.data, b"xyz");
    }

    #[tokio::test]
    async fn reset_terminates_without_report() {
        let receiver = Receiver::new(loopback().await, ReceiverConfig::default(), EventLog::discard("receiver"))
            .unwrap();
        let addr = receiver.local_addr();
        let task = tokio::spawn(receiver.run());

        let peer = loopback().await;
        peer.send_to(&Segment::control(Kind::Syn, 1), addr).await.unwrap();
        recv(&peer).await;
        peer.send_to(&Segment::control(Kind::Reset, 0), addr).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert!(matches!(result, Err(PtpError::PeerReset)));
    }

    #[tokio::test]
    async fn certain_forward_loss_drops_everything() {
        let sink = Arc::new(MemorySink::new());
        let config = ReceiverConfig {
            flp: 1.0,
            seed: Some(3),
            ..ReceiverConfig::default()
        };
        let receiver = Receiver::new(loopback().await, config, EventLog::new("receiver", sink.clone()))
            .unwrap();
        let addr = receiver.local_addr();
        let task = tokio::spawn(receiver.run());

        let peer = loopback().await;
        for _ in 0..3 {
            peer.send_to(&Segment::control(Kind::Syn, 5), addr).await.unwrap();
        }
        let reply = tokio::time::timeout(Duration::from_millis(200), peer.recv_from()).await;
        assert!(reply.is_err(), "a dropped SYN must not be answered");
        assert!(!task.is_finished());
        task.abort();
    }
}
