//! End-to-end transfer tests over loopback.
//!
//! A real [`Receiver`] and [`Sender`] talk through UDP on 127.0.0.1; loss,
//! when present, comes from the receiver's seeded simulator so every run
//! sees the same drop pattern for the same sequence of segments.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;

use ptp_over_udp::event_log::{Direction, EventLog, MemorySink};
use ptp_over_udp::segment::{Kind, Segment};
use ptp_over_udp::{
    PtpError, Receiver, ReceiverConfig, ReceiverReport, Sender, SenderConfig, SenderReport,
    Socket,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn bind() -> Socket {
    Socket::bind("127.0.0.1:0".parse().unwrap())
        .await
        .expect("bind loopback socket")
}

/// Deterministic, non-repeating-looking payload.
fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

struct Run {
    sent: SenderReport,
    received: ReceiverReport,
    sender_events: Arc<MemorySink>,
    receiver_events: Arc<MemorySink>,
}

async fn transfer(
    data: Vec<u8>,
    sender_config: SenderConfig,
    receiver_config: ReceiverConfig,
) -> Result<Run, PtpError> {
    let receiver_events = Arc::new(MemorySink::new());
    let receiver = Receiver::new(
        bind().await,
        receiver_config,
        EventLog::new("receiver", receiver_events.clone()),
    )?;
    let receiver_addr = receiver.local_addr();
    let mut receiver_task = tokio::spawn(receiver.run());

    let sender_events = Arc::new(MemorySink::new());
    let sender = Sender::new(
        bind().await,
        receiver_addr,
        sender_config,
        EventLog::new("sender", sender_events.clone()),
    )?;
    let sent = match sender.send(&data).await {
        Ok(report) => report,
        Err(e @ PtpError::HandshakeFailed { .. }) => {
            // The sender's parting RESET must end the receiver unless the
            // simulator dropped it.
            match tokio::time::timeout(Duration::from_secs(2), &mut receiver_task).await {
                Ok(joined) => {
                    let outcome = joined.expect("receiver task panicked");
                    assert!(
                        matches!(outcome, Err(PtpError::PeerReset)),
                        "receiver did not end with PeerReset: {outcome:?}"
                    );
                }
                Err(_) => {
                    assert!(
                        receiver_events.filter(Direction::Rcv, Kind::Reset).is_empty(),
                        "receiver saw the RESET but kept running"
                    );
                    assert!(
                        !receiver_events.filter(Direction::Drp, Kind::Reset).is_empty(),
                        "receiver idle without the RESET being dropped"
                    );
                    receiver_task.abort();
                }
            }
            return Err(e);
        }
        Err(e) => {
            receiver_task.abort();
            return Err(e);
        }
    };
    let received = receiver_task.await.expect("receiver task panicked")?;
    Ok(Run {
        sent,
        received,
        sender_events,
        receiver_events,
    })
}

async fn raw_peer() -> (UdpSocket, SocketAddr) {
    let sock = UdpSocket::bind("127.0.0.1:0").await.expect("bind raw peer");
    let addr = sock.local_addr().unwrap();
    (sock, addr)
}

async fn next_segment(sock: &UdpSocket, within: Duration) -> (Segment, SocketAddr) {
    let mut buf = [0u8; 2048];
    let (n, from) = tokio::time::timeout(within, sock.recv_from(&mut buf))
        .await
        .expect("nothing arrived in time")
        .expect("raw recv");
    (Segment::decode(&buf[..n]).expect("decodable segment"), from)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// max_win 3000, 2500 bytes, no loss: three DATA of 1000/1000/500 bytes,
/// three cumulative ACKs, one FIN/ACK exchange.
#[tokio::test]
async fn small_file_without_loss() {
    let data = payload(2500);
    let sender_config = SenderConfig {
        isn: Some(1000),
        rto: Duration::from_secs(1),
        ..SenderConfig::new(3000, Duration::from_secs(1))
    };
    let receiver_config = ReceiverConfig {
        linger: Duration::from_millis(100),
        ..ReceiverConfig::default()
    };
    let run = tokio::time::timeout(
        Duration::from_secs(10),
        transfer(data.clone(), sender_config, receiver_config),
    )
    .await
    .expect("transfer timed out")
    .expect("transfer failed");

    assert_eq!(run.received.data, data);
    assert_eq!(run.sent.bytes, 2500);
    assert_eq!(run.sent.stats.segments_sent, 3);
    assert_eq!(run.sent.stats.retransmissions, 0);

    let lens: Vec<usize> = run
        .sender_events
        .filter(Direction::Snd, Kind::Data)
        .iter()
        .map(|e| e.len)
        .collect();
    assert_eq!(lens, vec![1000, 1000, 500]);

    let acks: Vec<u16> = run
        .sender_events
        .filter(Direction::Rcv, Kind::Ack)
        .iter()
        .map(|e| e.seq)
        .collect();
    assert_eq!(acks, vec![1001, 2001, 3001, 3501, 3502]);

    let fins = run.sender_events.filter(Direction::Snd, Kind::Fin);
    assert_eq!(fins.len(), 1);
    assert_eq!(fins[0].seq, 3501);
    assert_eq!(run.receiver_events.filter(Direction::Rcv, Kind::Fin).len(), 1);
    assert!(!run.sender_events.notes().is_empty());
}

/// A zero-length file still performs the handshake and teardown.
#[tokio::test]
async fn empty_file() {
    let run = tokio::time::timeout(
        Duration::from_secs(10),
        transfer(
            Vec::new(),
            SenderConfig {
                isn: Some(65_535),
                ..SenderConfig::default()
            },
            ReceiverConfig {
                linger: Duration::from_millis(50),
                ..ReceiverConfig::default()
            },
        ),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(run.received.data.is_empty());
    assert!(run.sender_events.filter(Direction::Snd, Kind::Data).is_empty());
    let fins = run.sender_events.filter(Direction::Snd, Kind::Fin);
    assert_eq!(fins[0].seq, 0);
}

/// A file longer than the sequence space, starting just below the wrap.
#[tokio::test]
async fn large_file_wraps_sequence_space() {
    let data = payload(150_000);
    let run = tokio::time::timeout(
        Duration::from_secs(30),
        transfer(
            data.clone(),
            SenderConfig {
                isn: Some(65_000),
                ..SenderConfig::new(10_000, Duration::from_millis(500))
            },
            ReceiverConfig {
                linger: Duration::from_millis(100),
                ..ReceiverConfig::default()
            },
        ),
    )
    .await
    .expect("transfer timed out")
    .expect("transfer failed");

    assert_eq!(run.received.data.len(), data.len());
    assert!(run.received.data == data, "stream corrupted");
    assert_eq!(run.sent.segments, 150);
    assert_eq!(run.sent.stats.segments_sent, 150);
}

/// Seeded loss in both directions; the stream still arrives intact.
#[tokio::test]
async fn lossy_transfer_recovers() {
    let data = payload(20_000);
    let mut last_error = None;

    // A handshake can legitimately fail when every SYN or its ACK is lost;
    // each attempt uses a fresh pair of endpoints and a different seed.
    for seed in 1..=5u64 {
        let sender_config = SenderConfig::new(5000, Duration::from_millis(50));
        let receiver_config = ReceiverConfig {
            flp: 0.2,
            rlp: 0.2,
            seed: Some(seed),
            linger: Duration::from_millis(500),
            ..ReceiverConfig::default()
        };
        let outcome = tokio::time::timeout(
            Duration::from_secs(60),
            transfer(data.clone(), sender_config, receiver_config),
        )
        .await
        .expect("lossy transfer stalled");

        match outcome {
            Ok(run) => {
                assert!(run.received.data == data, "stream corrupted");
                let drops = run.received.forward_drops + run.received.reverse_drops;
                assert!(drops > 0);
                let logged = run
                    .receiver_events
                    .events()
                    .iter()
                    .filter(|e| e.direction == Direction::Drp)
                    .count();
                assert_eq!(logged as u64, drops);
                return;
            }
            Err(e @ (PtpError::HandshakeFailed { .. } | PtpError::PeerReset)) => {
                last_error = Some(e);
            }
            Err(e) => panic!("unexpected failure: {e}"),
        }
    }
    panic!("no handshake succeeded: {last_error:?}");
}

/// A failed handshake ends with a RESET the receiver acts on.
#[tokio::test]
async fn failed_handshake_resets_receiver() {
    // Every SYN is dropped; the receiver stays idle only if the RESET is too.
    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        transfer(
            payload(10),
            SenderConfig::new(1000, Duration::from_millis(50)),
            ReceiverConfig {
                flp: 1.0,
                seed: Some(3),
                ..ReceiverConfig::default()
            },
        ),
    )
    .await
    .expect("handshake did not give up");
    assert!(matches!(outcome, Err(PtpError::HandshakeFailed { attempts: 3 })));
}

/// The receiver writes the stream to its output path at FIN.
#[tokio::test]
async fn receiver_writes_output_file() {
    let path = std::env::temp_dir().join(format!("ptp-output-{}.bin", std::process::id()));
    let data = payload(4321);
    let run = tokio::time::timeout(
        Duration::from_secs(10),
        transfer(
            data.clone(),
            SenderConfig::default(),
            ReceiverConfig {
                output: Some(path.clone()),
                linger: Duration::from_millis(50),
                ..ReceiverConfig::default()
            },
        ),
    )
    .await
    .unwrap()
    .unwrap();

    let written = tokio::fs::read(&path).await.expect("output file");
    let _ = tokio::fs::remove_file(&path).await;
    assert_eq!(written, data);
    assert_eq!(run.received.data, data);
}

/// Three duplicate ACKs at the frontier bring the frontier segment back
/// long before the retransmission timeout.
#[tokio::test]
async fn third_duplicate_ack_triggers_fast_retransmit() {
    let (peer, peer_addr) = raw_peer().await;
    let config = SenderConfig {
        isn: Some(0),
        ..SenderConfig::new(3000, Duration::from_secs(5))
    };
    let sender = Sender::new(bind().await, peer_addr, config, EventLog::discard("sender")).unwrap();
    let sender_task = tokio::spawn(async move {
        let data = payload(4000);
        sender.send(&data).await
    });
    let quick = Duration::from_secs(2);

    let (syn, from) = next_segment(&peer, quick).await;
    assert_eq!(syn, Segment::control(Kind::Syn, 0));
    peer.send_to(&Segment::ack(1).encode(), from).await.unwrap();

    let mut seqs = Vec::new();
    for _ in 0..3 {
        seqs.push(next_segment(&peer, quick).await.0.seq);
    }
    assert_eq!(seqs, vec![1, 1001, 2001]);

    // Segment 1 "lost": the receiver keeps acknowledging 1.
    for _ in 0..3 {
        peer.send_to(&Segment::ack(1).encode(), from).await.unwrap();
    }
    let (resent, _) = next_segment(&peer, quick).await;
    assert_eq!(resent.kind, Kind::Data);
    assert_eq!(resent.seq, 1);
    assert_eq!(resent.payload.len(), 1000);

    peer.send_to(&Segment::ack(3001).encode(), from).await.unwrap();
    let (last, _) = next_segment(&peer, quick).await;
    assert_eq!((last.kind, last.seq), (Kind::Data, 3001));

    peer.send_to(&Segment::ack(4001).encode(), from).await.unwrap();
    let (fin, _) = next_segment(&peer, quick).await;
    assert_eq!(fin, Segment::control(Kind::Fin, 4001));
    peer.send_to(&Segment::ack(4002).encode(), from).await.unwrap();

    let report = tokio::time::timeout(quick, sender_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(report.stats.fast_retransmits, 1);
    assert_eq!(report.stats.retransmissions, 1);
    assert_eq!(report.stats.duplicate_acks, 3);
}
