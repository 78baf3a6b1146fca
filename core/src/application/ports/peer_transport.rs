use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{MediaError, NegotiationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

#[derive(Debug, Clone)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidateInit {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

/// ICE connectivity axis of a peer connection. `Failed` and `Closed` are
/// terminal and trigger unconditional teardown; `Disconnected` may still
/// recover to `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Events a transport reports back to its owning session manager
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Locally gathered candidate to publish on the signaling channel
    LocalCandidate(IceCandidateInit),
    IceState(IceConnectionState),
    /// Inbound media arrived; the manager registers a playback handle for it
    RemoteTrack { track_id: String },
}

/// One peer connection, exclusively owned by the session manager that
/// created it
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn create_offer(&self) -> Result<String, NegotiationError>;
    async fn create_answer(&self) -> Result<String, NegotiationError>;
    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;
    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;
    async fn add_ice_candidate(&self, candidate: IceCandidateInit)
        -> Result<(), NegotiationError>;
    async fn close(&self) -> Result<(), NegotiationError>;
}

pub struct TransportHandle {
    pub transport: std::sync::Arc<dyn PeerTransport>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Owns the local audio stream and mints peer transports. The stream is
/// acquired once per session side and attached read-only to every transport
/// created with `send_audio`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PeerTransportFactory: Send + Sync {
    /// Acquire the local microphone. Fatal to host session setup on failure.
    async fn acquire_local_audio(&self) -> Result<(), MediaError>;

    /// Stop the local stream's tracks and release the device.
    async fn release_local_audio(&self);

    /// Create a transport; attaches the acquired local audio when
    /// `send_audio`, otherwise the connection is receive-only.
    async fn create_transport(&self, send_audio: bool)
        -> Result<TransportHandle, NegotiationError>;
}
