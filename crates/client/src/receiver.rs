use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use common::config::ClientConfig;
use common::wire::{decode, MAX_DATAGRAM_LEN};
use common::{LinkError, Sample, SENTINEL_TICK};

use crate::spsc::Producer;
use crate::stats::LinkStats;

/// What the gap detector made of one incoming tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickVerdict {
    /// In sequence, or ahead of it; `skipped` ticks were never seen.
    Accept { skipped: u64 },
    /// Behind the expected tick. Already counted as lost when it was skipped.
    Stale,
    /// The end-of-stream sentinel.
    EndOfStream,
}

/// Ticks count modulo this; the controller wraps from `i32::MAX` to 0.
const TICK_MODULUS: i64 = i32::MAX as i64 + 1;

/// Tracks the expected next tick of a telemetry stream.
///
/// Ticks start at 0 with each session. Every tick jumped over is counted once
/// as lost; a late arrival of a skipped tick is discarded rather than
/// un-counted. Distances are taken modulo [`TICK_MODULUS`]: a tick less than
/// half the range ahead is new, anything else is stale.
#[derive(Debug, Default, Clone)]
pub struct GapDetector {
    expected: i64,
    lost: u64,
}

impl GapDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, tick: i32) -> TickVerdict {
        if tick == SENTINEL_TICK {
            return TickVerdict::EndOfStream;
        }
        let tick = i64::from(tick);
        let ahead = (tick - self.expected).rem_euclid(TICK_MODULUS);
        if ahead >= TICK_MODULUS / 2 {
            return TickVerdict::Stale;
        }
        let skipped = ahead as u64;
        self.lost += skipped;
        self.expected = (tick + 1) % TICK_MODULUS;
        TickVerdict::Accept { skipped }
    }

    pub fn lost(&self) -> u64 {
        self.lost
    }

    pub fn expected(&self) -> i64 {
        self.expected
    }
}

/// Why the receiver thread stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverExit {
    EndOfStream,
    Disconnected,
    SocketError,
}

/// Background thread that moves telemetry from the datagram socket into the
/// SPSC queue.
pub struct TelemetryReceiver {
    handle: Option<JoinHandle<ReceiverExit>>,
    running: Arc<AtomicBool>,
    local_addr: SocketAddr,
}

impl TelemetryReceiver {
    /// Binds the telemetry socket with the configured poll timeout.
    ///
    /// Done before the command connection opens so the first ticks of the
    /// session are not lost.
    pub fn bind(config: &ClientConfig) -> Result<UdpSocket, LinkError> {
        let socket = UdpSocket::bind(&config.telemetry_bind)?;
        socket.set_read_timeout(Some(config.receive_poll()))?;
        Ok(socket)
    }

    /// Starts the receiver thread on a socket from [`TelemetryReceiver::bind`].
    ///
    /// The thread runs until it sees the sentinel, the socket fails, or
    /// `connected` is cleared.
    pub fn spawn(
        socket: UdpSocket,
        producer: Producer<Sample>,
        stats: Arc<LinkStats>,
        connected: Arc<AtomicBool>,
    ) -> Result<Self, LinkError> {
        let local_addr = socket.local_addr()?;
        info!("Receiving telemetry on {local_addr}");

        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("telemetry".to_string())
            .spawn(move || {
                let exit = receive_loop(&socket, &producer, &stats, &connected);
                thread_running.store(false, Ordering::Release);
                exit
            })?;

        Ok(Self {
            handle: Some(handle),
            running,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Waits for the thread to finish. Returns `None` if it was already joined
    /// or panicked.
    pub fn join(&mut self) -> Option<ReceiverExit> {
        self.handle.take().and_then(|handle| handle.join().ok())
    }
}

fn receive_loop(
    socket: &UdpSocket,
    producer: &Producer<Sample>,
    stats: &LinkStats,
    connected: &AtomicBool,
) -> ReceiverExit {
    let mut detector = GapDetector::new();
    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];

    while connected.load(Ordering::Acquire) {
        let len = match socket.recv(&mut buf) {
            Ok(len) => len,
            Err(err) => match LinkError::from_transport(err) {
                LinkError::Timeout => continue,
                other => {
                    warn!("Telemetry socket failed: {other}");
                    return ReceiverExit::SocketError;
                }
            },
        };
        let sample: Sample = match decode(buf[..len].to_vec()) {
            Ok(sample) => sample,
            Err(err) => {
                debug!("Discarding malformed datagram: {err}");
                continue;
            }
        };

        match detector.observe(sample.tick) {
            TickVerdict::EndOfStream => {
                info!(lost = detector.lost(), "Telemetry stream ended.");
                return ReceiverExit::EndOfStream;
            }
            TickVerdict::Stale => {
                debug!(tick = sample.tick, "Discarding out-of-order sample");
            }
            TickVerdict::Accept { skipped } => {
                stats.record_lost(skipped);
                match producer.push(sample) {
                    Ok(()) => stats.record_received(),
                    Err(_) => stats.record_lost(1),
                }
            }
        }
    }
    debug!("Telemetry receiver stopped after disconnect.");
    ReceiverExit::Disconnected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spsc;
    use common::wire::encode;
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use std::time::Duration;

    #[test]
    fn in_order_stream_loses_nothing() {
        let mut detector = GapDetector::new();
        for tick in 0..100 {
            assert_eq!(detector.observe(tick), TickVerdict::Accept { skipped: 0 });
        }
        assert_eq!(detector.observe(SENTINEL_TICK), TickVerdict::EndOfStream);
        assert_eq!(detector.lost(), 0);
    }

    #[test]
    fn gaps_count_every_skipped_tick() {
        let mut detector = GapDetector::new();
        detector.observe(0);
        assert_eq!(detector.observe(4), TickVerdict::Accept { skipped: 3 });
        assert_eq!(detector.lost(), 3);
        // late arrival of a skipped tick
        assert_eq!(detector.observe(2), TickVerdict::Stale);
        assert_eq!(detector.lost(), 3);
        assert_eq!(detector.expected(), 5);
    }

    #[test]
    fn missing_first_ticks_are_lost() {
        let mut detector = GapDetector::new();
        assert_eq!(detector.observe(2), TickVerdict::Accept { skipped: 2 });
    }

    #[test]
    fn sequence_continues_across_the_wrap() {
        let mut detector = GapDetector {
            expected: i64::from(i32::MAX) - 1,
            lost: 0,
        };
        for tick in [i32::MAX - 1, i32::MAX, 0, 1] {
            assert_eq!(detector.observe(tick), TickVerdict::Accept { skipped: 0 });
        }
        assert_eq!(detector.expected(), 2);
        assert_eq!(detector.observe(i32::MAX), TickVerdict::Stale);
        assert_eq!(detector.lost(), 0);
    }

    #[test]
    fn gap_across_the_wrap_is_counted() {
        let mut detector = GapDetector {
            expected: i64::from(i32::MAX),
            lost: 0,
        };
        // i32::MAX and 0 never arrive
        assert_eq!(detector.observe(1), TickVerdict::Accept { skipped: 2 });
        assert_eq!(detector.lost(), 2);
    }

    proptest! {
        #[test]
        fn lost_equals_sent_minus_observed(
            n in 1i32..400,
            dropped in proptest::collection::btree_set(0i32..400, 0..200),
        ) {
            // the final tick always arrives, so every gap is visible
            let observed: Vec<i32> = (0..n)
                .filter(|tick| *tick == n - 1 || !dropped.contains(tick))
                .collect();
            let mut detector = GapDetector::new();
            for tick in &observed {
                let accepted = matches!(detector.observe(*tick), TickVerdict::Accept { .. });
                prop_assert!(accepted);
            }
            prop_assert_eq!(detector.lost(), (n as usize - observed.len()) as u64);
        }

        #[test]
        fn reordering_never_double_counts(ticks in proptest::collection::vec(0i32..200, 1..300)) {
            let mut detector = GapDetector::new();
            let mut accepted = BTreeSet::new();
            for tick in &ticks {
                if let TickVerdict::Accept { .. } = detector.observe(*tick) {
                    accepted.insert(*tick);
                }
            }
            let highest = *accepted.iter().next_back().unwrap() as u64;
            prop_assert_eq!(detector.lost(), highest + 1 - accepted.len() as u64);
        }
    }

    fn config() -> ClientConfig {
        ClientConfig {
            telemetry_bind: "127.0.0.1:0".to_string(),
            receive_poll_ms: 20,
            ..ClientConfig::default()
        }
    }

    fn sample(tick: i32) -> Sample {
        Sample {
            tick,
            time: f64::from(tick.max(0)) * 0.001,
            enable: true,
            ..Sample::default()
        }
    }

    #[test]
    fn receiver_queues_samples_until_sentinel() {
        let (producer, consumer) = spsc::channel(16);
        let stats = Arc::new(LinkStats::default());
        let connected = Arc::new(AtomicBool::new(true));
        let socket = TelemetryReceiver::bind(&config()).unwrap();
        let mut receiver =
            TelemetryReceiver::spawn(socket, producer, Arc::clone(&stats), connected).unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        for tick in [0, 1, 3, 4, SENTINEL_TICK] {
            sender
                .send_to(&encode(&sample(tick)), receiver.local_addr())
                .unwrap();
        }

        assert_eq!(receiver.join(), Some(ReceiverExit::EndOfStream));
        assert!(!receiver.is_running());
        let mut ticks = Vec::new();
        consumer.drain_with(|s| ticks.push(s.tick));
        assert_eq!(ticks, vec![0, 1, 3, 4]);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.packets_received, 4);
        assert_eq!(snapshot.packets_lost, 1);
    }

    #[test]
    fn full_queue_counts_as_loss() {
        let (producer, consumer) = spsc::channel(2);
        let stats = Arc::new(LinkStats::default());
        let connected = Arc::new(AtomicBool::new(true));
        let socket = TelemetryReceiver::bind(&config()).unwrap();
        let mut receiver =
            TelemetryReceiver::spawn(socket, producer, Arc::clone(&stats), connected).unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        for tick in [0, 1, 2, 3, SENTINEL_TICK] {
            sender
                .send_to(&encode(&sample(tick)), receiver.local_addr())
                .unwrap();
        }
        assert_eq!(receiver.join(), Some(ReceiverExit::EndOfStream));
        assert_eq!(consumer.len(), 2);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.packets_received, 2);
        assert_eq!(snapshot.packets_lost, 2);
        assert_eq!(snapshot.loss_ratio(), 0.5);
    }

    #[test]
    fn clearing_connected_stops_the_thread() {
        let (producer, _consumer) = spsc::channel(4);
        let connected = Arc::new(AtomicBool::new(true));
        let mut receiver = TelemetryReceiver::spawn(
            TelemetryReceiver::bind(&config()).unwrap(),
            producer,
            Arc::new(LinkStats::default()),
            Arc::clone(&connected),
        )
        .unwrap();
        assert!(receiver.is_running());

        connected.store(false, Ordering::Release);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(receiver.join(), Some(ReceiverExit::Disconnected));
    }
}
