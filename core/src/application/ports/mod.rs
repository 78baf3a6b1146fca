// Application ports - abstractions over the signaling store, the peer
// transport, and the session directory; implemented by infrastructure

pub mod peer_transport;
pub mod session_directory;
pub mod signaling_channel;

pub use peer_transport::{
    IceCandidateInit, IceConnectionState, PeerTransport, PeerTransportFactory, SdpKind,
    SessionDescription, TransportEvent, TransportHandle,
};
pub use session_directory::SessionDirectory;
pub use signaling_channel::{ChildEvent, ChildStream, SignalingChannel, ValueStream};

#[cfg(test)]
pub use peer_transport::MockPeerTransportFactory;
#[cfg(test)]
pub use session_directory::MockSessionDirectory;
