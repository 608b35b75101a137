use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::{Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use mqtt_core::{Packet, PacketId, Publish, QoS};

use crate::config::ClientConfig;
use crate::error::Error;
use crate::transport::Transport;

/// What a pending publish/subscribe/unsubscribe's ack slot is eventually handed.
pub(crate) enum AckOutcome {
    Ack(Packet),
    Closed,
    ResendLimitExceeded,
}

/// A packet awaiting its ack, tracked in transmission order.
pub(crate) struct PendingAck {
    pub packet_id: PacketId,
    pub packet: Packet,
    pub timeout_at: Instant,
    pub send_count: u32,
    pub waiter: SyncSender<AckOutcome>,
}

/// Ordered map from packet-id to its [`PendingAck`], insertion order == transmission order.
///
/// Kept as a `VecDeque` scanned linearly rather than a hash map: the invariant that matters is
/// order (so the head always has the earliest `timeout_at`), and sessions rarely have more than a
/// handful of packets in flight at once.
#[derive(Default)]
pub(crate) struct PendingAcks {
    entries: VecDeque<PendingAck>,
}

impl PendingAcks {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, entry: PendingAck) {
        self.entries.push_back(entry);
    }

    pub fn remove(&mut self, packet_id: PacketId) -> Option<PendingAck> {
        let index = self.entries.iter().position(|e| e.packet_id == packet_id)?;
        self.entries.remove(index)
    }

    pub fn head_timeout(&self) -> Option<Instant> {
        self.entries.front().map(|e| e.timeout_at)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PendingAck> {
        self.entries.iter_mut()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = PendingAck> + '_ {
        self.entries.drain(..)
    }

    pub fn remove_front(&mut self) -> Option<PendingAck> {
        self.entries.pop_front()
    }
}

/// Outbound packets plus flush-barrier tokens, in wire transmission order.
pub(crate) enum WriteItem {
    Packet(Packet),
    Flush(SyncSender<()>),
}

/// A blocking FIFO that also supports pushing back to the front, for the writer's
/// retransmit-on-reconnect-error behavior (§4.4).
#[derive(Default)]
pub(crate) struct WriteQueue {
    state: Mutex<VecDeque<WriteItem>>,
    cond: Condvar,
}

impl WriteQueue {
    pub fn push_back(&self, item: WriteItem) {
        let mut state = self.state.lock().unwrap();
        state.push_back(item);
        self.cond.notify_one();
    }

    pub fn push_front(&self, item: WriteItem) {
        let mut state = self.state.lock().unwrap();
        state.push_front(item);
        self.cond.notify_one();
    }

    /// Blocks until an item is available.
    pub fn pop(&self) -> WriteItem {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(item) = state.pop_front() {
                return item;
            }
            state = self.cond.wait(state).unwrap();
        }
    }
}

/// What the reader pushes for [`crate::Client::get`] to consume: either a delivered Publish or a
/// background error, tagged with the time it was raised so `get()` can discard stale markers.
pub(crate) enum ReadItem {
    Publish(Publish),
    Error(Error, Instant),
}

/// A one-shot, rearmable notifier: firing it while armed is a no-op (it's already going to wake
/// the reader on its next poll), exactly the coalescing behavior §3's `wake_signal` needs.
#[derive(Default)]
pub(crate) struct WakeSignal {
    armed: Mutex<bool>,
    cond: Condvar,
}

impl WakeSignal {
    pub fn fire(&self) {
        let mut armed = self.armed.lock().unwrap();
        *armed = true;
        self.cond.notify_one();
    }

    /// Waits up to `timeout` for a fire, draining the armed flag either way.
    pub fn wait(&self, timeout: std::time::Duration) {
        let mut armed = self.armed.lock().unwrap();
        if !*armed {
            let (guard, _) = self.cond.wait_timeout(armed, timeout).unwrap();
            armed = guard;
        }
        *armed = false;
    }
}

/// Batched qos>0 publishes accumulated inside a `begin_batch()` scope, keyed the way §4.9
/// describes: one outbound Publish per (retain, qos) pair, covering every topic queued under it.
#[derive(Default)]
pub(crate) struct Batch {
    pub entries: HashMap<(bool, QoS), HashMap<String, bytes::Bytes>>,
    pub depth: u32,
}

/// Everything the reader, writer, and public API threads share for one connection's lifetime.
pub(crate) struct SessionInner<T: Transport> {
    pub config: ClientConfig,
    pub connected: AtomicBool,
    pub epoch: AtomicU64,
    pub pending_acks: Mutex<PendingAcks>,
    pub next_packet_id: Mutex<PacketId>,
    pub last_packet_received_at: Mutex<Instant>,
    pub keep_alive_sent: AtomicBool,
    pub wake_signal: WakeSignal,
    pub write_queue: WriteQueue,
    pub read_tx: Sender<ReadItem>,
    pub read_rx: Mutex<Receiver<ReadItem>>,
    pub connection_mutex: Mutex<()>,
    pub threads: Mutex<Option<SessionThreads>>,
    pub transport: Mutex<Option<T>>,
    pub batch: Mutex<Option<Batch>>,
    pub on_reconnect: Mutex<Option<Box<dyn FnMut() -> Result<(), Error> + Send>>>,
    /// Produces a fresh transport connection; called by `connect_internal` on the initial connect
    /// and on every reconnect attempt.
    pub connector: Box<dyn Fn() -> io::Result<T> + Send + Sync>,
}

pub(crate) struct SessionThreads {
    pub reader: JoinHandle<()>,
    pub writer: JoinHandle<()>,
}

impl<T: Transport> SessionInner<T> {
    pub fn new(config: ClientConfig, connector: Box<dyn Fn() -> io::Result<T> + Send + Sync>) -> Self {
        let (read_tx, read_rx) = mpsc::channel();

        SessionInner {
            config,
            connected: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            pending_acks: Mutex::new(PendingAcks::default()),
            next_packet_id: Mutex::new(0),
            last_packet_received_at: Mutex::new(Instant::now()),
            keep_alive_sent: AtomicBool::new(false),
            wake_signal: WakeSignal::default(),
            write_queue: WriteQueue::default(),
            read_tx,
            read_rx: Mutex::new(read_rx),
            connection_mutex: Mutex::new(()),
            threads: Mutex::new(None),
            transport: Mutex::new(None),
            batch: Mutex::new(None),
            on_reconnect: Mutex::new(None),
            connector,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Allocates the next packet id, wrapping 0xFFFF -> 1 and never returning 0.
    pub fn next_packet_id(&self) -> PacketId {
        let mut id = self.next_packet_id.lock().unwrap();
        *id = if *id == 0xFFFF { 1 } else { *id + 1 };
        *id
    }

    /// Registers `packet` for acknowledgement, returning the slot the caller blocks on.
    ///
    /// Fires the wake signal when the map was empty, so the reader recomputes its timeout instead
    /// of sleeping through this packet's deadline.
    pub fn register_for_ack(&self, packet_id: PacketId, packet: Packet) -> Receiver<AckOutcome> {
        let (tx, rx) = mpsc::sync_channel(1);
        let mut acks = self.pending_acks.lock().unwrap();
        let was_empty = acks.is_empty();
        acks.insert(PendingAck {
            packet_id,
            packet,
            timeout_at: Instant::now() + self.config.ack_timeout(),
            send_count: 1,
            waiter: tx,
        });
        drop(acks);
        if was_empty {
            self.wake_signal.fire();
        }
        rx
    }

    /// Fails every pending ack with `closed` and clears the map; used by `disconnect()` and by a
    /// terminal reconnect failure.
    pub fn fail_all_pending_acks(&self) {
        let mut acks = self.pending_acks.lock().unwrap();
        for entry in acks.drain() {
            let _ = entry.waiter.send(AckOutcome::Closed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Read, Write};
    use std::time::Duration;

    use crate::config::ClientConfig;
    use crate::transport::Transport;

    struct NullTransport;

    impl Read for NullTransport {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
    }

    impl Write for NullTransport {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Transport for NullTransport {
        fn try_clone(&self) -> io::Result<Self> {
            Ok(NullTransport)
        }

        fn set_read_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
            Ok(())
        }

        fn shutdown(&self) -> io::Result<()> {
            Ok(())
        }
    }

    fn new_session() -> SessionInner<NullTransport> {
        let config = ClientConfig::builder("localhost").build().unwrap();
        SessionInner::new(config, Box::new(|| Ok(NullTransport)))
    }

    #[test]
    fn pending_acks_preserve_insertion_order() {
        let mut acks = PendingAcks::default();
        let now = Instant::now();
        for id in [1u16, 2, 3] {
            let (tx, _rx) = mpsc::sync_channel(1);
            acks.insert(PendingAck {
                packet_id: id,
                packet: Packet::PingReq,
                timeout_at: now,
                send_count: 1,
                waiter: tx,
            });
        }

        assert_eq!(acks.remove_front().unwrap().packet_id, 1);
        assert_eq!(acks.remove_front().unwrap().packet_id, 2);
        assert_eq!(acks.remove_front().unwrap().packet_id, 3);
        assert!(acks.is_empty());
    }

    #[test]
    fn pending_acks_remove_by_id_leaves_order_intact() {
        let mut acks = PendingAcks::default();
        let now = Instant::now();
        for id in [1u16, 2, 3] {
            let (tx, _rx) = mpsc::sync_channel(1);
            acks.insert(PendingAck {
                packet_id: id,
                packet: Packet::PingReq,
                timeout_at: now,
                send_count: 1,
                waiter: tx,
            });
        }

        let removed = acks.remove(2).unwrap();
        assert_eq!(removed.packet_id, 2);
        assert_eq!(acks.remove_front().unwrap().packet_id, 1);
        assert_eq!(acks.remove_front().unwrap().packet_id, 3);
    }

    #[test]
    fn write_queue_push_front_jumps_the_line() {
        let queue = WriteQueue::default();
        queue.push_back(WriteItem::Packet(Packet::PingReq));
        queue.push_back(WriteItem::Packet(Packet::Disconnect));
        queue.push_front(WriteItem::Packet(Packet::PingResp));

        assert!(matches!(queue.pop(), WriteItem::Packet(Packet::PingResp)));
        assert!(matches!(queue.pop(), WriteItem::Packet(Packet::PingReq)));
        assert!(matches!(queue.pop(), WriteItem::Packet(Packet::Disconnect)));
    }

    #[test]
    fn wake_signal_coalesces_multiple_fires() {
        let signal = WakeSignal::default();
        signal.fire();
        signal.fire();
        // A single wait drains the armed flag regardless of how many times fire() ran.
        signal.wait(Duration::from_millis(10));
        let before = Instant::now();
        signal.wait(Duration::from_millis(20));
        assert!(before.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn next_packet_id_wraps_from_0xffff_to_1_never_0() {
        let session = new_session();
        assert_eq!(session.next_packet_id(), 1);

        *session.next_packet_id.lock().unwrap() = 0xFFFF;
        assert_eq!(session.next_packet_id(), 1);
    }

    #[test]
    fn register_for_ack_wakes_the_reader_only_when_the_map_was_empty() {
        let session = new_session();
        let _rx = session.register_for_ack(1, Packet::PingReq);
        assert!(!session.pending_acks.lock().unwrap().is_empty());
    }
}
