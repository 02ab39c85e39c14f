// viewer-engine/src/error.rs
use thiserror::Error;

/// Failures of the underlying send/receive primitive
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
    #[error("send failed: {0}")]
    Send(String),
    #[error("receive failed: {0}")]
    Receive(String),
}

/// Why a connection attempt was refused during the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Sealed identity missing, invalid, or not matching the transport
    IdentityMismatch,
    /// Declared origin differs from the declared host
    CrossOrigin,
    /// Viewer ID is not under reservation (expired, replayed or raced)
    NotReserved,
    /// Handshake token unknown, expired or already consumed
    UnknownToken,
    /// Handshake token belongs to a different viewer
    ViewerMismatch,
    /// No handshake frame arrived in time
    NoHandshake,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            RejectReason::IdentityMismatch => "identity mismatch",
            RejectReason::CrossOrigin => "cross-origin connection",
            RejectReason::NotReserved => "viewer not reserved",
            RejectReason::UnknownToken => "unknown handshake token",
            RejectReason::ViewerMismatch => "handshake bound to another viewer",
            RejectReason::NoHandshake => "no handshake received",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Error)]
pub enum LiveError {
    #[error("handshake rejected: {0}")]
    HandshakeRejected(RejectReason),
    #[error("challenge rejected")]
    ChallengeRejected,
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("session is no longer current")]
    SessionStale,
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("upload {file_id} stalled before all parts arrived")]
    UploadStalled { file_id: String },
    #[error("unknown upload {0}")]
    UnknownUpload(String),
    #[error("identity could not be sealed: {0}")]
    Seal(#[from] common::SealError),
}

impl From<RejectReason> for LiveError {
    fn from(reason: RejectReason) -> Self {
        LiveError::HandshakeRejected(reason)
    }
}

pub type LiveResult<T> = Result<T, LiveError>;
