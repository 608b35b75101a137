use std::sync::atomic::Ordering;
use std::sync::Arc;

use mqtt_core::Packet;

use crate::client::reconnect;
use crate::error::Error;
use crate::session::{SessionInner, WriteItem};
use crate::transport::Transport;

/// Drains `write_queue` onto the wire until a write fails or the session moves past `epoch`.
pub(crate) fn run<T: Transport>(session: Arc<SessionInner<T>>, epoch: u64, mut stream: T) {
    loop {
        let item = session.write_queue.pop();

        if session.epoch.load(Ordering::SeqCst) != epoch {
            debug!("writer: superseded by reconnect, exiting");
            // Whatever this was, it wasn't ours to consume; leave it for the writer that
            // replaced us instead of dropping it on the floor.
            session.write_queue.push_front(item);
            return;
        }

        match item {
            WriteItem::Flush(slot) => {
                let _ = slot.send(());
            }
            WriteItem::Packet(packet) => {
                if let Err(e) = write_packet(&mut stream, &packet) {
                    if session.epoch.load(Ordering::SeqCst) != epoch {
                        session.write_queue.push_front(WriteItem::Packet(packet));
                        return;
                    }
                    // The packet never left the wire; put it back at the head so it's the first
                    // thing retransmitted once reconnected.
                    session.write_queue.push_front(WriteItem::Packet(packet));
                    reconnect(&session, epoch, e);
                    return;
                }
            }
        }
    }
}

fn write_packet<T: Transport>(stream: &mut T, packet: &Packet) -> Result<(), Error> {
    let bytes = mqtt_core::encode(packet)?;
    std::io::Write::write_all(stream, &bytes)?;
    trace!("writer: wrote {:?}", packet.packet_type());
    Ok(())
}
