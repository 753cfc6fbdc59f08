//! Framing and handshake primitives for sending length-prefixed frames
//! between endpoints.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::{CommunicationError, Result};

/// First eight bytes of every connection; "neuromux" in ASCII.
pub const HANDSHAKE_MAGIC: u64 = 0x6e65_7572_6f6d_7578;

/// Writes one frame: a big-endian `u32` length prefix followed by the bytes.
pub fn send_frame<W: Write>(writer: &mut W, frame: &[u8]) -> Result<()> {
    writer.write_u32::<BigEndian>(frame.len() as u32)?;
    writer.write_all(frame)?;
    writer.flush()?;
    Ok(())
}

/// Reads one length-prefixed frame.
pub fn recv_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let length = reader.read_u32::<BigEndian>()? as usize;
    let mut frame = vec![0u8; length];
    reader.read_exact(&mut frame)?;
    Ok(frame)
}

/// Opens a connection: magic, then one frame carrying the caller's identity.
pub fn send_handshake(stream: &mut TcpStream, identity: &[u8]) -> Result<()> {
    stream.write_u64::<BigEndian>(HANDSHAKE_MAGIC)?;
    send_frame(stream, identity)
}

/// Accepts a connection's opening exchange and returns the peer's identity.
pub fn recv_handshake(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let magic = stream.read_u64::<BigEndian>()?;
    if magic != HANDSHAKE_MAGIC {
        return Err(CommunicationError::HandshakeFailed(format!(
            "unexpected magic {:#x}",
            magic
        )));
    }
    recv_frame(stream)
}

/// Connects to `addr`, retrying failed attempts on a fixed cadence.
///
/// Clients may come up before the bound end; each refused connect sleeps for
/// `delay` and tries again, up to `attempts` times.
pub fn connect_with_retry(addr: &str, attempts: usize, delay: Duration) -> Result<TcpStream> {
    let mut last = std::io::Error::new(std::io::ErrorKind::Other, "no connection attempts made");
    for attempt in 0..attempts {
        match TcpStream::connect(addr) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(error) => {
                log::debug!(
                    "connect to {} failed (attempt {}): {}; retrying",
                    addr,
                    attempt,
                    error
                );
                last = error;
                std::thread::sleep(delay);
            }
        }
    }
    Err(CommunicationError::Io(last))
}
