use std::time::Duration;
use thiserror::Error;

/// Stable identity of a peer, as handed out by the signaling layer.
pub type PeerId = String;

/// Failures at the replication/transport boundary.
///
/// Game-rule violations never surface here; they are absorbed as no-ops by
/// the engine. This error class is the only one that should reach the user
/// as an explicit failure.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("join timed out after {0:?}")]
    JoinTimeout(Duration),

    #[error("join rejected by host")]
    JoinRejected,

    #[error("peer unreachable: {0}")]
    PeerUnreachable(PeerId),

    #[error("transport closed")]
    TransportClosed,

    #[error("malformed message payload: {0}")]
    MalformedPayload(String),
}
