pub mod dedup;
pub mod events;
pub mod host_session;
pub mod listener_session;
pub mod negotiation;
pub mod ports;
pub mod room_paths;

pub use host_session::{HostHandle, HostSessionManager};
pub use listener_session::{ListenerHandle, ListenerSessionManager};
