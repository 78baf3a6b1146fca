pub mod protocol;

pub use protocol::{ParticipantRecord, ParticipantRole, RoomStatus, SignalMessage};
