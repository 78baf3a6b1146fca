use chrono::Utc;
use serde::{Deserialize, Serialize};
use shared::protocol::{ParticipantRecord, ParticipantRole};
use uuid::Uuid;

use super::PodcastSession;

/// Participant ID value object. The host uses a stable session-scoped ID so
/// listeners can find its signaling paths; listeners get a fresh ID per join.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn host_of(session: &PodcastSession) -> Self {
        Self(format!("host-{}", session.id))
    }

    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Presence record for the session host
pub fn host_record(session: &PodcastSession) -> ParticipantRecord {
    ParticipantRecord {
        id: ParticipantId::host_of(session).to_string(),
        name: session.host_name.clone(),
        role: ParticipantRole::Host,
        joined_at: Utc::now().timestamp_millis(),
        can_speak: true,
        avatar: None,
    }
}

/// Presence record for a freshly joining listener
pub fn listener_record(name: impl Into<String>, avatar: Option<String>) -> ParticipantRecord {
    ParticipantRecord {
        id: ParticipantId::generate().to_string(),
        name: name.into(),
        role: ParticipantRole::Listener,
        joined_at: Utc::now().timestamp_millis(),
        can_speak: false,
        avatar,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_id_is_stable_per_session() {
        let session = PodcastSession::new("Youth Hour", "host-1", "Alex", 10);
        assert_eq!(
            ParticipantId::host_of(&session),
            ParticipantId::host_of(&session)
        );
        assert!(ParticipantId::host_of(&session)
            .as_str()
            .starts_with("host-"));
    }

    #[test]
    fn listener_ids_are_fresh_per_join() {
        let a = listener_record("Jordan", None);
        let b = listener_record("Jordan", None);
        assert_ne!(a.id, b.id);
        assert!(!a.can_speak);
        assert_eq!(a.role, ParticipantRole::Listener);
    }
}
