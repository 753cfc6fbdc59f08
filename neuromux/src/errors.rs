//! Error kinds raised by the emulation core.

use std::fmt;

use neuromux_communication::CommunicationError;

/// Error raised by the emulation core.
#[derive(Debug)]
pub enum Error {
    /// A caller passed a value the operation cannot accept: an unknown id,
    /// an unrecognized direction, colliding ports. Fatal to the offending
    /// call only.
    InvalidArgument(String),
    /// The operation is not valid in the current state: a second broker,
    /// topology mutation after start. Fatal to the offending call only.
    PreconditionFailed(String),
    /// A peer broke the synchronization contract: a duplicate outbound
    /// destination within a step, an inbound frame from an unexpected
    /// source. The offending child logs and terminates.
    ProtocolViolation(String),
    /// A transport-level failure underneath the core.
    Communication(CommunicationError),
}

impl Error {
    pub(crate) fn invalid<S: Into<String>>(why: S) -> Error {
        Error::InvalidArgument(why.into())
    }

    pub(crate) fn precondition<S: Into<String>>(why: S) -> Error {
        Error::PreconditionFailed(why.into())
    }

    pub(crate) fn protocol<S: Into<String>>(why: S) -> Error {
        Error::ProtocolViolation(why.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(why) => write!(f, "invalid argument: {}", why),
            Error::PreconditionFailed(why) => write!(f, "precondition failed: {}", why),
            Error::ProtocolViolation(why) => write!(f, "protocol violation: {}", why),
            Error::Communication(e) => write!(f, "communication error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Communication(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CommunicationError> for Error {
    fn from(e: CommunicationError) -> Self {
        Error::Communication(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Communication(CommunicationError::Io(e))
    }
}

/// Result type used throughout the emulation core.
pub type Result<T> = std::result::Result<T, Error>;
