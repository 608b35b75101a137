use std::collections::HashMap;
use std::io::{self, Write};
use std::net::TcpStream;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use mqtt_core::{
    Connect, LastWill, Packet, PacketId, PacketReader, Publish, PublishAck, QoS, Subscribe,
    Unsubscribe,
};
use rand::Rng;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::reader;
use crate::session::{AckOutcome, Batch, ReadItem, SessionInner, SessionThreads, WriteItem};
use crate::transport::{connect_tcp, Transport};
use crate::writer;

const GENERATED_CLIENT_ID_PREFIX: &str = "ruby";
const GENERATED_SUFFIX_LEN: usize = 16;
const GENERATED_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// A connected MQTT session: one reader thread, one writer thread, and this handle.
///
/// `T` is the transport the session multiplexes; it defaults to a plain [`TcpStream`]. Callers
/// who need TLS construct their own wrapped stream type and go through [`Client::connect_with`].
pub struct Client<T: Transport = TcpStream> {
    session: Arc<SessionInner<T>>,
}

impl Client<TcpStream> {
    /// Connects over plain TCP to `config.host()`/`config.port()`.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let host = config.host().to_owned();
        let port = config.port();
        Self::connect_with(config, move || connect_tcp(&host, port))
    }

    /// Connects, runs `f`, and disconnects on every exit path — the scoped form of [`connect`]
    /// the original source models as `connect { ... }`.
    pub fn with_session<F>(config: ClientConfig, f: F) -> Result<()>
    where
        F: FnOnce(&Client<TcpStream>) -> Result<()>,
    {
        let client = Self::connect(config)?;
        let result = f(&client);
        let _ = client.disconnect(true);
        result
    }
}

impl<T: Transport> Client<T> {
    /// Connects using a caller-supplied transport factory, called once per connection attempt
    /// (initial connect and every reconnect). Used by TLS callers: wrap the stream `connect_tcp`
    /// returns, or dial however the transport requires.
    pub fn connect_with(
        config: ClientConfig,
        connector: impl Fn() -> io::Result<T> + Send + Sync + 'static,
    ) -> Result<Self> {
        let session = Arc::new(SessionInner::new(config, Box::new(connector)));
        connect_internal(&session)?;
        Ok(Client { session })
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Registers a callback invoked after every successful reconnect, to re-subscribe or
    /// re-announce presence. If it returns an error, that error surfaces from the next [`get`]
    /// and the session is disconnected.
    ///
    /// [`get`]: Client::get
    pub fn on_reconnect<F>(&self, callback: F)
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        *self.session.on_reconnect.lock().unwrap() = Some(Box::new(callback));
    }

    /// Publishes a single topic/payload pair. For `qos == AtLeastOnce`, blocks until the Puback
    /// arrives, unless a [`begin_batch`] scope is active, in which case the publish is buffered
    /// and sent when the scope ends. `qos == ExactlyOnce` is rejected: the publish path never
    /// drives the Pubrec/Pubrel/Pubcomp handshake the codec can encode and decode.
    ///
    /// [`begin_batch`]: Client::begin_batch
    pub fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        retain: bool,
        qos: QoS,
    ) -> Result<()> {
        let topic = topic.into();
        if topic.is_empty() {
            return Err(Error::invalid_argument("topic must not be empty"));
        }
        validate_publish_qos(qos)?;
        self.publish_one(topic, payload.into(), retain, qos)
    }

    /// Publishes every (topic, payload) pair with the same `retain`/`qos`, the topic-map form of
    /// [`publish`].
    ///
    /// [`publish`]: Client::publish
    pub fn publish_many<I, K, V>(&self, messages: I, retain: bool, qos: QoS) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Bytes>,
    {
        for (topic, payload) in messages {
            self.publish(topic, payload, retain, qos)?;
        }
        Ok(())
    }

    fn publish_one(&self, topic: String, payload: Bytes, retain: bool, qos: QoS) -> Result<()> {
        if !self.session.is_connected() {
            return Err(Error::NotConnected);
        }

        if qos > QoS::AtMostOnce {
            let mut batch = self.session.batch.lock().unwrap();
            if let Some(batch) = batch.as_mut() {
                batch
                    .entries
                    .entry((retain, qos))
                    .or_default()
                    .insert(topic, payload);
                return Ok(());
            }
        }

        if qos == QoS::AtMostOnce {
            let packet = Packet::Publish(Publish {
                dup: false,
                qos,
                retain,
                topic,
                packet_id: None,
                payload,
            });
            self.session.write_queue.push_back(WriteItem::Packet(packet));
            return Ok(());
        }

        let packet_id = self.session.next_packet_id();
        let packet = Packet::Publish(Publish {
            dup: false,
            qos,
            retain,
            topic,
            packet_id: Some(packet_id),
            payload,
        });
        let rx = self.session.register_for_ack(packet_id, packet.clone());
        self.session.write_queue.push_back(WriteItem::Packet(packet));
        await_ack(rx)
    }

    /// Opens a batching scope: qos>0 publishes made while it's alive are buffered and flushed, one
    /// group per (retain, qos) pair, when the scope (and every nested one) has ended.
    pub fn begin_batch(&self) -> BatchScope<'_, T> {
        let mut batch = self.session.batch.lock().unwrap();
        batch.get_or_insert_with(Batch::default).depth += 1;
        BatchScope { client: self }
    }

    fn flush_batch_group(&self, retain: bool, qos: QoS, topics: HashMap<String, Bytes>) -> Result<()> {
        let mut receivers = Vec::with_capacity(topics.len());
        for (topic, payload) in topics {
            let packet_id = self.session.next_packet_id();
            let packet = Packet::Publish(Publish {
                dup: false,
                qos,
                retain,
                topic,
                packet_id: Some(packet_id),
                payload,
            });
            let rx = self.session.register_for_ack(packet_id, packet.clone());
            self.session.write_queue.push_back(WriteItem::Packet(packet));
            receivers.push(rx);
        }

        let mut first_err = None;
        for rx in receivers {
            if let Err(e) = await_ack(rx) {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Subscribes to every (topic filter, qos) pair in one Subscribe packet.
    pub fn subscribe(
        &self,
        topics: impl IntoIterator<Item = (String, QoS)>,
        wait_for_ack: bool,
    ) -> Result<()> {
        if !self.session.is_connected() {
            return Err(Error::NotConnected);
        }
        let subscriptions: Vec<(String, QoS)> = topics.into_iter().collect();
        if subscriptions.is_empty() {
            return Err(Error::invalid_argument("subscribe requires at least one topic"));
        }

        let packet_id = self.session.next_packet_id();
        let packet = Packet::Subscribe(Subscribe {
            packet_id,
            subscriptions,
        });

        if wait_for_ack {
            let rx = self.session.register_for_ack(packet_id, packet.clone());
            self.session.write_queue.push_back(WriteItem::Packet(packet));
            await_ack(rx)
        } else {
            self.session.write_queue.push_back(WriteItem::Packet(packet));
            Ok(())
        }
    }

    /// Unsubscribes every topic filter in one Unsubscribe packet.
    pub fn unsubscribe(
        &self,
        topics: impl IntoIterator<Item = String>,
        wait_for_ack: bool,
    ) -> Result<()> {
        if !self.session.is_connected() {
            return Err(Error::NotConnected);
        }
        let topic_filters: Vec<String> = topics.into_iter().collect();
        if topic_filters.is_empty() {
            return Err(Error::invalid_argument("unsubscribe requires at least one topic"));
        }

        let packet_id = self.session.next_packet_id();
        let packet = Packet::Unsubscribe(Unsubscribe {
            packet_id,
            topic_filters,
        });

        if wait_for_ack {
            let rx = self.session.register_for_ack(packet_id, packet.clone());
            self.session.write_queue.push_back(WriteItem::Packet(packet));
            await_ack(rx)
        } else {
            self.session.write_queue.push_back(WriteItem::Packet(packet));
            Ok(())
        }
    }

    /// Blocks for the next delivered Publish, acking it (if qos>0) before returning.
    ///
    /// A background error raised no earlier than this call surfaces here; an error raised before
    /// this call started (a stale marker left by a previous `get()` racing a reconnect) is
    /// discarded.
    pub fn get(&self) -> Result<Publish> {
        let publish = self.recv_one()?;
        self.ack_publish(publish.qos, publish.packet_id);
        Ok(publish)
    }

    /// Feeds every delivered Publish to `f`, acking (if qos>0) only after `f` returns, and loops
    /// forever until an error (including a clean [`disconnect`]) ends the session.
    ///
    /// [`disconnect`]: Client::disconnect
    pub fn for_each<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(Publish) -> Result<()>,
    {
        loop {
            let publish = self.recv_one()?;
            let qos = publish.qos;
            let packet_id = publish.packet_id;
            f(publish)?;
            self.ack_publish(qos, packet_id);
        }
    }

    fn recv_one(&self) -> Result<Publish> {
        let start = Instant::now();
        loop {
            let item = self.session.read_rx.lock().unwrap().recv();
            match item {
                Ok(ReadItem::Publish(publish)) => return Ok(publish),
                Ok(ReadItem::Error(err, raised_at)) => {
                    if raised_at >= start {
                        return Err(err);
                    }
                    // Stale marker from before this call; keep waiting.
                }
                Err(_) => return Err(Error::ConnectionClosed),
            }
        }
    }

    fn ack_publish(&self, qos: QoS, packet_id: Option<PacketId>) {
        if qos > QoS::AtMostOnce {
            if let Some(packet_id) = packet_id {
                self.session
                    .write_queue
                    .push_back(WriteItem::Packet(Packet::PublishAck(PublishAck { packet_id })));
            }
        }
    }

    /// Enqueues a flush barrier and blocks until the writer has drained everything ahead of it.
    pub fn flush(&self) -> Result<()> {
        if !self.session.is_connected() {
            return Err(Error::NotConnected);
        }
        let (tx, rx) = sync_channel(1);
        self.session.write_queue.push_back(WriteItem::Flush(tx));
        rx.recv().map_err(|_| Error::ConnectionClosed)
    }

    /// Tears down the session: stops the reader/writer threads, fails every pending ack with
    /// `closed`, and optionally sends a best-effort Disconnect first.
    pub fn disconnect(&self, send_msg: bool) -> Result<()> {
        let _guard = self.session.connection_mutex.lock().unwrap();
        if !self.session.is_connected() {
            return Ok(());
        }
        disconnect_internal(&self.session, send_msg);
        Ok(())
    }
}

/// RAII guard returned by [`Client::begin_batch`]; nested guards collapse into the outermost,
/// which flushes every buffered (retain, qos) group on drop.
pub struct BatchScope<'a, T: Transport> {
    client: &'a Client<T>,
}

impl<'a, T: Transport> Drop for BatchScope<'a, T> {
    fn drop(&mut self) {
        let finished = {
            let mut batch = self.client.session.batch.lock().unwrap();
            let depth = {
                let batch = batch.as_mut().expect("batch scope active without batch state");
                batch.depth -= 1;
                batch.depth
            };
            if depth == 0 {
                batch.take()
            } else {
                None
            }
        };

        if let Some(batch) = finished {
            for ((retain, qos), topics) in batch.entries {
                if let Err(e) = self.client.flush_batch_group(retain, qos, topics) {
                    warn!("batch publish failed: {}", e);
                }
            }
        }
    }
}

fn await_ack(rx: Receiver<AckOutcome>) -> Result<()> {
    match rx.recv() {
        Ok(AckOutcome::Ack(_)) => Ok(()),
        Ok(AckOutcome::Closed) | Err(_) => Err(Error::ConnectionClosed),
        Ok(AckOutcome::ResendLimitExceeded) => Err(Error::ResendLimitExceeded),
    }
}

/// Rejects `qos=2`: the wire codec knows Pubrec/Pubrel/Pubcomp, but the publish path never drives
/// that handshake, so a caller asking for it gets a clear error instead of a Publish the client
/// could never correctly acknowledge.
fn validate_publish_qos(qos: QoS) -> Result<()> {
    if qos == QoS::ExactlyOnce {
        return Err(Error::invalid_argument(
            "qos 2 is not implemented by the publish path",
        ));
    }
    Ok(())
}

/// Resolves the client-id a Connect packet should carry, per §4.3 step 2.
fn resolve_client_id(config: &ClientConfig) -> Result<String> {
    if let Some(id) = config.client_id() {
        return Ok(id.to_owned());
    }

    match config.protocol_version() {
        mqtt_core::ProtocolVersion::V310 => Ok(generate_client_id()),
        mqtt_core::ProtocolVersion::V311 => {
            if config.clean_session() {
                Ok(String::new())
            } else {
                Err(Error::invalid_argument(
                    "client_id is required unless clean_session is set",
                ))
            }
        }
    }
}

/// `ruby` + 16 random lowercase alphanumerics: the generated-id policy is ported verbatim from
/// the reference implementation, not renamed to match this ecosystem, because the prefix is part
/// of the wire-visible identifier a broker actually sees.
fn generate_client_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..GENERATED_SUFFIX_LEN)
        .map(|_| GENERATED_ID_ALPHABET[rng.gen_range(0..GENERATED_ID_ALPHABET.len())] as char)
        .collect();
    format!("{}{}", GENERATED_CLIENT_ID_PREFIX, suffix)
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Performs one connection attempt: opens a transport, sends Connect, waits `ack_timeout` for a
/// successful Connack, then spawns the reader and writer threads. Used both by the initial
/// connect and by every reconnect attempt in [`reconnect`].
fn connect_internal<T: Transport>(session: &Arc<SessionInner<T>>) -> Result<()> {
    let config = &session.config;
    let client_id = resolve_client_id(config)?;

    let mut stream = (session.connector)()?;

    let connect_packet = Packet::Connect(Connect {
        protocol_version: config.protocol_version(),
        clean_session: config.clean_session(),
        keep_alive: config.keep_alive().as_secs() as u16,
        client_id,
        last_will: config.will().map(|will| LastWill {
            qos: will.qos,
            retain: will.retain,
            topic: will.topic.clone(),
            message: Bytes::from(will.payload.clone()),
        }),
        username: config.username().map(str::to_owned),
        password: config.password().map(Bytes::copy_from_slice),
    });

    let bytes = mqtt_core::encode(&connect_packet)?;
    stream.write_all(&bytes)?;

    stream.set_read_timeout(Some(config.ack_timeout()))?;
    let ack = {
        let mut ack_reader = PacketReader::new(&mut stream);
        ack_reader.read().map_err(|e| match e {
            mqtt_core::Error::Io(io_err) if is_timeout(&io_err) => {
                Error::protocol("timed out waiting for connack")
            }
            other => Error::Codec(other),
        })?
    };

    let ack = match ack {
        Packet::ConnectAck(ack) => ack,
        other => {
            return Err(Error::protocol(format!(
                "unexpected response to connect: {:?}",
                other.packet_type()
            )))
        }
    };
    if !ack.return_code.is_accepted() {
        return Err(Error::protocol(ack.return_code.message()));
    }

    let read_half = stream.try_clone()?;
    let write_half = stream.try_clone()?;

    let epoch = session.epoch.fetch_add(1, Ordering::SeqCst) + 1;
    *session.last_packet_received_at.lock().unwrap() = Instant::now();
    session.keep_alive_sent.store(false, Ordering::SeqCst);
    session.connected.store(true, Ordering::SeqCst);
    *session.transport.lock().unwrap() = Some(stream);

    if let Some(previous) = session.threads.lock().unwrap().take() {
        retire_previous_workers(session, previous);
    }

    let reader_session = Arc::clone(session);
    let reader_handle = thread::Builder::new()
        .name("mqtt-reader".into())
        .spawn(move || reader::run(reader_session, epoch, read_half))
        .map_err(Error::Io)?;

    let writer_session = Arc::clone(session);
    let writer_handle = thread::Builder::new()
        .name("mqtt-writer".into())
        .spawn(move || writer::run(writer_session, epoch, write_half))
        .map_err(Error::Io)?;

    *session.threads.lock().unwrap() = Some(SessionThreads {
        reader: reader_handle,
        writer: writer_handle,
    });

    Ok(())
}

/// Stops the workers of the connection this attempt just replaced, so at most one reader and one
/// writer are ever draining the session's queues at a time. `epoch` has already been bumped by the
/// time this runs, so each stale worker notices on its own as soon as it wakes; this just forces
/// the wake-up and waits for it to actually exit. Whichever of the two threads is driving this
/// reconnect can't wake or join itself — it will unwind and exit on its own once this call returns.
fn retire_previous_workers<T: Transport>(session: &Arc<SessionInner<T>>, previous: SessionThreads) {
    let this_thread = thread::current().id();

    if previous.writer.thread().id() != this_thread {
        let (tx, _rx) = sync_channel(1);
        session.write_queue.push_back(WriteItem::Flush(tx));
        let _ = previous.writer.join();
    }

    if previous.reader.thread().id() != this_thread {
        session.wake_signal.fire();
        let _ = previous.reader.join();
    }
}

/// §4.8: invoked by whichever worker hits a terminal error. Only the first caller for a given
/// `epoch` does anything; a caller whose `epoch` is already stale (the other worker beat it here)
/// returns immediately.
pub(crate) fn reconnect<T: Transport>(session: &Arc<SessionInner<T>>, epoch: u64, error: Error) {
    let _guard = session.connection_mutex.lock().unwrap();

    if session.epoch.load(Ordering::SeqCst) != epoch {
        return;
    }

    warn!("session: reconnecting after error: {}", error);
    session.connected.store(false, Ordering::SeqCst);
    if let Some(transport) = session.transport.lock().unwrap().take() {
        let _ = transport.shutdown();
    }

    let limit = session.config.reconnect_limit();
    let mut succeeded = false;

    for attempt in 1..=limit {
        match connect_internal(session) {
            Ok(()) => {
                succeeded = true;
                break;
            }
            Err(e) => {
                debug!("session: reconnect attempt {} failed: {}", attempt, e);
                if attempt < limit {
                    let backoff = session
                        .config
                        .reconnect_backoff()
                        .as_secs_f64()
                        .powi(attempt as i32);
                    thread::sleep(Duration::from_secs_f64(backoff));
                }
            }
        }
    }

    if succeeded {
        let mut on_reconnect = session.on_reconnect.lock().unwrap();
        if let Some(callback) = on_reconnect.as_mut() {
            if let Err(e) = callback() {
                drop(on_reconnect);
                let _ = session.read_tx.send(ReadItem::Error(e, Instant::now()));
                disconnect_internal(session, false);
            }
        }
    } else {
        // No other worker can still be driving this epoch; let a stale caller no-op too.
        session.epoch.fetch_add(1, Ordering::SeqCst);
        session.fail_all_pending_acks();
        let _ = session.read_tx.send(ReadItem::Error(error, Instant::now()));
    }
}

fn disconnect_internal<T: Transport>(session: &Arc<SessionInner<T>>, send_msg: bool) {
    session.connected.store(false, Ordering::SeqCst);
    session.epoch.fetch_add(1, Ordering::SeqCst);

    if send_msg {
        if let Some(transport) = session.transport.lock().unwrap().as_ref() {
            if let Ok(mut handle) = transport.try_clone() {
                if let Ok(bytes) = mqtt_core::encode(&Packet::Disconnect) {
                    let _ = handle.write_all(&bytes);
                }
            }
        }
    }

    if let Some(transport) = session.transport.lock().unwrap().take() {
        let _ = transport.shutdown();
    }

    session.wake_signal.fire();
    let (flush_tx, _flush_rx) = sync_channel(1);
    session.write_queue.push_back(WriteItem::Flush(flush_tx));

    if let Some(threads) = session.threads.lock().unwrap().take() {
        let _ = threads.reader.join();
        let _ = threads.writer.join();
    }

    session.fail_all_pending_acks();
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqtt_core::ProtocolVersion;

    #[test]
    fn resolve_client_id_uses_configured_id_regardless_of_version() {
        let config = ClientConfig::builder("localhost")
            .protocol_version(ProtocolVersion::V310)
            .client_id("fixed-id")
            .build()
            .unwrap();

        assert_eq!(resolve_client_id(&config).unwrap(), "fixed-id");
    }

    #[test]
    fn resolve_client_id_generates_one_under_v310() {
        let config = ClientConfig::builder("localhost")
            .protocol_version(ProtocolVersion::V310)
            .build()
            .unwrap();

        let id = resolve_client_id(&config).unwrap();
        assert!(id.starts_with(GENERATED_CLIENT_ID_PREFIX));
        assert_eq!(id.len(), GENERATED_CLIENT_ID_PREFIX.len() + GENERATED_SUFFIX_LEN);
    }

    #[test]
    fn resolve_client_id_under_v311_with_clean_session_is_empty() {
        let config = ClientConfig::builder("localhost")
            .protocol_version(ProtocolVersion::V311)
            .clean_session(true)
            .build()
            .unwrap();

        assert_eq!(resolve_client_id(&config).unwrap(), "");
    }

    #[test]
    fn resolve_client_id_under_v311_without_clean_session_errors() {
        let config = ClientConfig::builder("localhost")
            .protocol_version(ProtocolVersion::V311)
            .clean_session(false)
            .build()
            .unwrap();

        let err = resolve_client_id(&config).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn generated_client_id_matches_the_wire_format() {
        let id = generate_client_id();
        assert!(id.starts_with(GENERATED_CLIENT_ID_PREFIX));
        let suffix = &id[GENERATED_CLIENT_ID_PREFIX.len()..];
        assert_eq!(suffix.len(), GENERATED_SUFFIX_LEN);
        assert!(suffix
            .bytes()
            .all(|b| GENERATED_ID_ALPHABET.contains(&b)));
    }

    #[test]
    fn validate_publish_qos_rejects_exactly_once() {
        assert!(validate_publish_qos(QoS::AtMostOnce).is_ok());
        assert!(validate_publish_qos(QoS::AtLeastOnce).is_ok());
        let err = validate_publish_qos(QoS::ExactlyOnce).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn is_timeout_recognizes_would_block_and_timed_out_only() {
        assert!(is_timeout(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(is_timeout(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(!is_timeout(&io::Error::from(io::ErrorKind::ConnectionReset)));
    }
}
