use derive_more::{Display, Error, From};

/// Everything a connected session can fail with, surfaced either from the call that triggered it
/// or, for background failures, from the next [`crate::Client::get`].
#[derive(Debug, Display, Error, From)]
pub enum Error {
    /// The underlying stream failed, or a connect-time I/O operation did.
    #[display(fmt = "{}", _0)]
    Io(std::io::Error),

    /// A packet failed to parse or serialize.
    #[display(fmt = "{}", _0)]
    Codec(mqtt_core::Error),

    /// The Connack return code was non-zero, or an unexpected packet type arrived where a
    /// specific one was required (e.g. anything but Connack in reply to Connect).
    #[display(fmt = "{}", _0)]
    #[from(ignore)]
    Protocol(#[error(not(source))] String),

    /// No Pingresp arrived within `keep_alive + ack_timeout` of the last received packet.
    #[display(fmt = "keep-alive timeout: no packet received within {}s", _0)]
    KeepAliveTimeout(u64),

    /// The operation requires a connected session.
    #[display(fmt = "not connected")]
    NotConnected,

    /// The session was disconnected or a reconnect failed while a caller was waiting on an ack.
    #[display(fmt = "connection closed")]
    ConnectionClosed,

    /// `resend_limit` retransmissions elapsed for this packet without receiving its ack.
    #[display(fmt = "resend limit exceeded")]
    ResendLimitExceeded,

    /// A caller-supplied argument was invalid (empty topic, bad URI scheme, conflicting
    /// payload/topic-map combination, …).
    #[display(fmt = "{}", _0)]
    #[from(ignore)]
    InvalidArgument(#[error(not(source))] String),
}

impl Error {
    pub(crate) fn protocol<S: Into<String>>(message: S) -> Self {
        Error::Protocol(message.into())
    }

    pub(crate) fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Error::InvalidArgument(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
