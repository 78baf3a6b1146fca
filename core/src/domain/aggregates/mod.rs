pub mod participant;
pub mod podcast_session;

pub use participant::{host_record, listener_record, ParticipantId};
pub use podcast_session::{JoinVerdict, PodcastSession, SessionId, SessionStatus};
