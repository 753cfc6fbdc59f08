//! An identity-addressed TCP message bus.
//!
//! This crate carries the transport layer of the neuromux emulation core. It
//! provides two socket roles over plain TCP:
//!
//! * a [`Dealer`] is a client endpoint that announces an identity when it
//!   connects and then exchanges opaque frames with the bound end;
//! * a [`Router`] is a bound endpoint that accepts many dealers, tags every
//!   inbound frame with the sending dealer's identity, and can address
//!   outbound frames to a specific identity.
//!
//! Frames are length-prefixed byte blobs; the schema of the frames the
//! emulation core exchanges lives in [`message`]. Each stream gets a
//! dedicated reader thread that feeds a channel, so callers block on
//! channels rather than sockets and can select over several event sources
//! at once.

pub mod dealer;
pub mod message;
pub mod networking;
pub mod router;

pub use dealer::Dealer;
pub use message::{CtrlBody, DataBody, ModuleId, Payload, CMD_ACK, CMD_QUIT};
pub use router::Router;

use std::fmt;
use std::io;

/// Error raised by the transport layer.
#[derive(Debug)]
pub enum CommunicationError {
    /// Failed to read from or write to a stream.
    Io(io::Error),
    /// Failed to serialize or deserialize a frame body.
    Bincode(bincode::Error),
    /// The stream or the channel behind it has been closed.
    Disconnected,
    /// The peer did not open with the expected magic and identity.
    HandshakeFailed(String),
}

impl fmt::Display for CommunicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommunicationError::Io(e) => write!(f, "i/o error: {}", e),
            CommunicationError::Bincode(e) => write!(f, "serialization error: {}", e),
            CommunicationError::Disconnected => write!(f, "peer disconnected"),
            CommunicationError::HandshakeFailed(why) => write!(f, "handshake failed: {}", why),
        }
    }
}

impl std::error::Error for CommunicationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommunicationError::Io(e) => Some(e),
            CommunicationError::Bincode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CommunicationError {
    fn from(e: io::Error) -> Self {
        CommunicationError::Io(e)
    }
}

impl From<bincode::Error> for CommunicationError {
    fn from(e: bincode::Error) -> Self {
        CommunicationError::Bincode(e)
    }
}

/// Result type used throughout the transport layer.
pub type Result<T> = std::result::Result<T, CommunicationError>;
