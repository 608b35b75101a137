use std::io::{self, Read};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use hexplay::HexViewBuilder;
use mqtt_core::Packet;

use crate::client::reconnect;
use crate::error::Error;
use crate::session::{AckOutcome, ReadItem, SessionInner, WriteItem};
use crate::transport::Transport;

/// How long a single non-blocking-ish read attempt waits before the reader re-checks the
/// wake-signal and timeout bookkeeping; see `SPEC_FULL.md` §4.5's implementation note.
const POLL_SLICE: Duration = Duration::from_millis(50);

/// Runs until a terminal error hands control to [`reconnect`], or the session is disconnected
/// (signalled by the epoch advancing past `epoch`).
pub(crate) fn run<T: Transport>(session: Arc<SessionInner<T>>, epoch: u64, mut stream: T) {
    if let Err(e) = stream.set_read_timeout(Some(POLL_SLICE)) {
        warn!("reader: failed to set read timeout: {}", e);
    }

    let mut buffer = BytesMut::with_capacity(8 * 1024);

    loop {
        if session.epoch.load(Ordering::SeqCst) != epoch {
            debug!("reader: superseded by reconnect, exiting");
            return;
        }

        let deadline = next_deadline(&session);

        match wait_and_read(&session, &mut stream, &mut buffer, deadline) {
            Ok(()) => {}
            Err(e) => {
                if session.epoch.load(Ordering::SeqCst) != epoch {
                    return;
                }
                reconnect(&session, epoch, e);
                return;
            }
        }

        handle_timeouts(&session);
        handle_keep_alives(&session);

        if let Err(e) = check_keep_alive_timeout(&session) {
            if session.epoch.load(Ordering::SeqCst) != epoch {
                return;
            }
            reconnect(&session, epoch, e);
            return;
        }
    }
}

/// `next_timeout` from §4.5 step 1, as an absolute deadline. `None` when neither acks nor
/// keep-alive are active, meaning the reader can wait indefinitely for data or a wake-up.
fn next_deadline<T: Transport>(session: &SessionInner<T>) -> Option<Instant> {
    let mut candidates = Vec::with_capacity(2);

    if let Some(timeout_at) = session.pending_acks.lock().unwrap().head_timeout() {
        candidates.push(timeout_at);
    }

    let keep_alive = session.config.keep_alive();
    if !keep_alive.is_zero() {
        let last_received = *session.last_packet_received_at.lock().unwrap();
        if session.keep_alive_sent.load(Ordering::SeqCst) {
            candidates.push(last_received + keep_alive + session.config.ack_timeout());
        } else {
            candidates.push(last_received + keep_alive);
        }
    }

    candidates.into_iter().min()
}

/// Waits for either readable bytes or the wake-signal, up to `deadline`, parsing and dispatching
/// every complete packet that arrives.
fn wait_and_read<T: Transport>(
    session: &Arc<SessionInner<T>>,
    stream: &mut T,
    buffer: &mut BytesMut,
    deadline: Option<Instant>,
) -> Result<(), Error> {
    loop {
        // Drain any already-buffered packets before touching the socket again.
        while let Some((packet, consumed)) = mqtt_core::parse(&buffer[..])? {
            trace!(
                "read {:?} from {} bytes:\n{}",
                packet.packet_type(),
                consumed,
                HexViewBuilder::new(&buffer[..consumed]).finish()
            );
            buffer.split_to(consumed);
            handle_packet(session, packet);
        }

        let remaining = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(());
                }
                (deadline - now).min(POLL_SLICE)
            }
            None => POLL_SLICE,
        };

        session.wake_signal.wait(remaining);

        let start = buffer.len();
        buffer.resize(start + 4096, 0);
        match stream.read(&mut buffer[start..]) {
            Ok(0) => {
                buffer.truncate(start);
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed",
                )));
            }
            Ok(n) => {
                buffer.truncate(start + n);
                *session.last_packet_received_at.lock().unwrap() = Instant::now();
                session.keep_alive_sent.store(false, Ordering::SeqCst);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                buffer.truncate(start);
                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline {
                        return Ok(());
                    }
                }
            }
            Err(e) => {
                buffer.truncate(start);
                return Err(Error::Io(e));
            }
        }
    }
}

fn handle_packet<T: Transport>(session: &Arc<SessionInner<T>>, packet: Packet) {
    match packet {
        Packet::Publish(publish) => {
            let _ = session.read_tx.send(ReadItem::Publish(publish));
        }
        Packet::PingResp => {
            trace!("reader: pingresp");
        }
        Packet::PublishAck(ack) => complete_ack(session, ack.packet_id, Packet::PublishAck(ack)),
        Packet::SubscribeAck(ref ack) => {
            let packet_id = ack.packet_id;
            complete_ack(session, packet_id, packet.clone())
        }
        Packet::UnsubscribeAck(ack) => {
            complete_ack(session, ack.packet_id, Packet::UnsubscribeAck(ack))
        }
        other => {
            trace!("reader: ignoring unsolicited packet {:?}", other.packet_type());
        }
    }
}

fn complete_ack<T: Transport>(session: &Arc<SessionInner<T>>, packet_id: u16, packet: Packet) {
    let entry = session.pending_acks.lock().unwrap().remove(packet_id);
    if let Some(entry) = entry {
        let _ = entry.waiter.send(AckOutcome::Ack(packet));
    } else {
        trace!("reader: ack for unknown packet id {}", packet_id);
    }
}

/// Walks `pending_acks` in insertion order, resending or failing every entry whose deadline has
/// passed, stopping at the first entry that hasn't (§4.7's order invariant guarantees the rest
/// haven't either). Entries that are resent are updated in place — `timeout_at`/`send_count`/the
/// dup bit change, but the entry stays at its original position — so the order invariant the head
/// timeout check relies on is never disturbed by a resend. Only a resend-limit-exceeded entry
/// actually leaves the map.
fn handle_timeouts<T: Transport>(session: &Arc<SessionInner<T>>) {
    let now = Instant::now();
    let resend_limit = session.config.resend_limit();
    let ack_timeout = session.config.ack_timeout();

    let mut to_resend = Vec::new();
    let mut to_fail = Vec::new();
    let mut fire_wake = false;

    {
        let mut acks = session.pending_acks.lock().unwrap();
        for entry in acks.iter_mut() {
            if entry.timeout_at > now {
                break;
            }
            entry.send_count += 1;
            if entry.send_count > resend_limit {
                to_fail.push(entry.packet_id);
                continue;
            }
            entry.timeout_at = now + ack_timeout;
            if let Packet::Publish(ref mut publish) = entry.packet {
                publish.dup = true;
            }
            to_resend.push(entry.packet.clone());
            fire_wake = true;
        }

        for packet_id in to_fail {
            if let Some(entry) = acks.remove(packet_id) {
                let _ = entry.waiter.send(AckOutcome::ResendLimitExceeded);
            }
        }
    }

    for packet in to_resend {
        session.write_queue.push_back(WriteItem::Packet(packet));
    }
    if fire_wake {
        session.wake_signal.fire();
    }
}

fn handle_keep_alives<T: Transport>(session: &Arc<SessionInner<T>>) {
    let keep_alive = session.config.keep_alive();
    if keep_alive.is_zero() {
        return;
    }

    let last_received = *session.last_packet_received_at.lock().unwrap();
    let now = Instant::now();

    if !session.keep_alive_sent.load(Ordering::SeqCst) && now >= last_received + keep_alive {
        session.write_queue.push_back(WriteItem::Packet(Packet::PingReq));
        session.keep_alive_sent.store(true, Ordering::SeqCst);
        debug!("reader: sent keep-alive pingreq");
    }
}

fn check_keep_alive_timeout<T: Transport>(session: &SessionInner<T>) -> Result<(), Error> {
    let keep_alive = session.config.keep_alive();
    if keep_alive.is_zero() || !session.keep_alive_sent.load(Ordering::SeqCst) {
        return Ok(());
    }

    let last_received = *session.last_packet_received_at.lock().unwrap();
    let deadline = last_received + keep_alive + session.config.ack_timeout();
    if Instant::now() >= deadline {
        return Err(Error::KeepAliveTimeout(
            (keep_alive + session.config.ack_timeout()).as_secs(),
        ));
    }
    Ok(())
}
