pub mod loopback;
pub mod webrtc;

pub use loopback::LoopbackTransportFactory;
pub use webrtc::WebRtcTransportFactory;
