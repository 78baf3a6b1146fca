use thiserror::Error;

/// Failures acquiring the local audio stream. Fatal to session setup on the
/// host side; the listener falls back to listen-only.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("no audio input device available")]
    NoDevice,
    #[error("media capture requires a secure context")]
    InsecureContext,
    #[error("audio source failed: {0}")]
    Source(String),
}

/// Failures talking to the signaling store. Logged and not retried; silent
/// non-delivery is indistinguishable from success on the reader side.
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("signaling store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid signaling path: {0}")]
    InvalidPath(String),
}

/// Failures negotiating a single peer connection. Always scoped to one
/// participant; never cascades to the rest of the session.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("session description rejected: {0}")]
    BadDescription(String),
    #[error("unexpected negotiation state: {0}")]
    InvalidState(String),
}

/// Reasons a listener's join attempt is rejected before any signaling occurs
#[derive(Debug, Error)]
pub enum JoinError {
    #[error("session not found")]
    NotFound,
    #[error("session is not joinable: {0}")]
    NotJoinable(String),
    #[error("directory lookup failed: {0}")]
    Directory(#[source] anyhow::Error),
    #[error(transparent)]
    Signaling(#[from] SignalingError),
    #[error("session setup failed: {0}")]
    Setup(#[source] anyhow::Error),
}
