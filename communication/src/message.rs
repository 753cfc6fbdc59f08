//! Wire schema for the frames the emulation core exchanges.
//!
//! Two body kinds travel over the bus. Data bodies pair a peer identity with
//! an optional payload; a missing payload is the liveness token that keeps
//! the barrier advancing when a sender has nothing to say this step. Control
//! bodies carry a command name and opaque argument blobs. Both serialize
//! with bincode and round-trip bit-for-bit.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Result;

/// The `quit` control command: stop the receiving process.
pub const CMD_QUIT: &str = "quit";
/// The `ack` control command: acknowledge receipt of a control frame.
pub const CMD_ACK: &str = "ack";

/// Opaque identity of one bus participant.
///
/// Assigned at construction and immutable thereafter; the bytes of the id
/// are exactly the identity announced in the transport handshake.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(String);

impl ModuleId {
    /// Wraps an identity string.
    pub fn new<S: Into<String>>(id: S) -> Self {
        ModuleId(id.into())
    }

    /// Recovers an identity from raw handshake bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        ModuleId(String::from_utf8_lossy(bytes).into_owned())
    }

    /// The identity as bytes, as sent on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// The identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleId({})", self.0)
    }
}

/// Application payload carried between modules.
///
/// The core treats payloads as opaque; the tagged union exists so the codec
/// is self-describing without pinning a schema into the bus.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// A dense numeric array.
    Doubles(Vec<f64>),
}

impl Payload {
    /// Convenience constructor for byte payloads.
    pub fn bytes<B: Into<Vec<u8>>>(bytes: B) -> Self {
        Payload::Bytes(bytes.into())
    }
}

/// Body of one data frame: the pair of a peer id and an optional payload.
///
/// On the module-to-broker leg `peer` names the destination; on the
/// broker-to-module leg it names the source. `None` is the liveness token.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataBody {
    /// Destination (outbound) or source (inbound) module id.
    pub peer: ModuleId,
    /// The payload, or `None` when the sender has no data this step.
    pub payload: Option<Payload>,
}

impl DataBody {
    /// Serializes the body for transmission.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Recovers a body from its serialized form.
    pub fn decode(frame: &[u8]) -> Result<DataBody> {
        Ok(bincode::deserialize(frame)?)
    }
}

/// Body of one control frame: a command plus opaque arguments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CtrlBody {
    /// Command name; unknown commands are acknowledged and ignored.
    pub command: String,
    /// Command arguments, opaque to the transport.
    pub args: Vec<Vec<u8>>,
}

impl CtrlBody {
    /// A control body with the given command and no arguments.
    pub fn new<S: Into<String>>(command: S) -> Self {
        CtrlBody {
            command: command.into(),
            args: Vec::new(),
        }
    }

    /// The `quit` request.
    pub fn quit() -> Self {
        CtrlBody::new(CMD_QUIT)
    }

    /// The `ack` reply.
    pub fn ack() -> Self {
        CtrlBody::new(CMD_ACK)
    }

    /// Whether this body carries the given command.
    pub fn is(&self, command: &str) -> bool {
        self.command == command
    }

    /// Serializes the body for transmission.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Recovers a body from its serialized form.
    pub fn decode(frame: &[u8]) -> Result<CtrlBody> {
        Ok(bincode::deserialize(frame)?)
    }
}
