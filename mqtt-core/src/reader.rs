use std::io::{self, Read};

use bytes::BytesMut;

use crate::decode;
use crate::error::Error;
use crate::packet::Packet;

const INITIAL_CAPACITY: usize = 8 * 1024;
const READ_CHUNK: usize = 4 * 1024;

/// Turns a blocking [`Read`] into "one [`Packet`] at a time".
///
/// Bytes that arrive past the end of a packet are held across calls to [`PacketReader::read`],
/// so a single packet straddling two TCP segments only ever gets parsed once the whole thing has
/// arrived.
pub struct PacketReader<R> {
    inner: R,
    buffer: BytesMut,
}

impl<R> PacketReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_capacity(inner, INITIAL_CAPACITY)
    }

    pub fn with_capacity(inner: R, capacity: usize) -> Self {
        PacketReader {
            inner,
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> PacketReader<R> {
    /// Blocks until a full Control Packet has arrived and returns it.
    ///
    /// Returns [`Error::Io`] with [`io::ErrorKind::UnexpectedEof`] if the stream closes cleanly
    /// with no partial packet pending.
    pub fn read(&mut self) -> Result<Packet, Error> {
        loop {
            if let Some((packet, consumed)) = decode::parse(&self.buffer)? {
                let _ = self.buffer.split_to(consumed);
                return Ok(packet);
            }

            let start = self.buffer.len();
            self.buffer.resize(start + READ_CHUNK, 0);
            let read = self.inner.read(&mut self.buffer[start..])?;
            self.buffer.truncate(start + read);

            if read == 0 {
                return if self.buffer.is_empty() {
                    Err(Error::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed",
                    )))
                } else {
                    Err(Error::TruncatedPacket)
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_single_packet() {
        let mut reader = PacketReader::new(&b"\xc0\x00"[..]);

        assert_eq!(reader.read().unwrap(), Packet::PingReq);
    }

    #[test]
    fn test_read_across_short_reads() {
        struct Drip<'a>(&'a [u8]);

        impl Read for Drip<'_> {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                let n = 1.min(self.0.len()).min(buf.len());
                buf[..n].copy_from_slice(&self.0[..n]);
                self.0 = &self.0[n..];
                Ok(n)
            }
        }

        let mut reader = PacketReader::new(Drip(b"\xe0\x00"));

        assert_eq!(reader.read().unwrap(), Packet::Disconnect);
    }

    #[test]
    fn test_eof_without_partial_packet() {
        let mut reader = PacketReader::new(&b""[..]);

        let err = reader.read().unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
