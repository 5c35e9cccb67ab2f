//! Session-level errors.

use thiserror::Error;

use skirmish_env::{EnvError, PeerId};

use crate::protocol::ProtocolError;

/// Fatal failures outside the tick loop. The tick itself never errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] EnvError),

    #[error("handshake with {host} failed after {attempts} attempts: {source}")]
    HandshakeFailed {
        host: PeerId,
        attempts: u32,
        #[source]
        source: EnvError,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
