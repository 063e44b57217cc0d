//! Business-rejection error cases the dispatcher needs to match on.
//!
//! Transport and codec errors pass through as `anyhow::Error`; this enum
//! only names the cases in the wire protocol's own failure responses.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("Version mismatch")]
    VersionMismatch,
    #[error("Connection refused by server")]
    ConnectionRefused,
    #[error("Name already taken")]
    NameTaken,
    #[error("Join denied")]
    JoinDenied,
    #[error("Leave denied")]
    LeaveDenied,
    #[error("not a member of this channel")]
    UnknownChannel,
    #[error("client has not completed the handshake")]
    NotHandshook,
    #[error("malformed frame")]
    CodecFailure,
    #[error("message not valid in the current connection state")]
    ProtocolViolation,
}
