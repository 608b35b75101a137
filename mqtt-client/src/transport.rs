use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// The byte-stream handle the session engine multiplexes between its reader and writer tasks.
///
/// The core never constructs a TLS handshake itself (see crate docs): [`connect_tcp`] is the only
/// constructor this crate offers, and any caller who needs TLS wraps their own stream type in
/// this trait and drives the session engine's [`crate::Client`] directly.
pub trait Transport: Read + Write + Send + 'static {
    /// Produces an independent handle to the same underlying connection, so the reader and writer
    /// tasks can each own a half without sharing a lock.
    fn try_clone(&self) -> io::Result<Self>
    where
        Self: Sized;

    /// Bounds how long a single `read` call blocks; used by the reader task to poll the stream
    /// and the wake-signal in the same loop iteration without a true `select`.
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Best-effort close of both halves; called once by whichever side notices the session is
    /// ending.
    fn shutdown(&self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn try_clone(&self) -> io::Result<Self> {
        TcpStream::try_clone(self)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, std::net::Shutdown::Both)
    }
}

/// Opens a plain TCP connection to `(host, port)`. TLS callers construct their own stream and
/// skip this helper entirely.
pub fn connect_tcp(host: &str, port: u16) -> io::Result<TcpStream> {
    let stream = TcpStream::connect((host, port))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}
