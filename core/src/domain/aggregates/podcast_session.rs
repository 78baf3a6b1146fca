use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Podcast session aggregate root. Mirrors the directory document; the
/// signaling tree remains the source of truth for actual connectivity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodcastSession {
    pub id: SessionId,
    pub title: String,
    pub host_id: String,
    pub host_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: SessionStatus,
    pub approved: bool,
    pub created_at: DateTime<Utc>,
    /// When set, the session is joinable only once this time has passed
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Namespace of the session's subtree in the signaling store
    pub webrtc_room_id: String,
    pub participant_count: u32,
    pub max_participants: u32,
}

impl PodcastSession {
    /// Create a session the host claims immediately (waiting room open)
    pub fn new(
        title: impl Into<String>,
        host_id: impl Into<String>,
        host_name: impl Into<String>,
        max_participants: u32,
    ) -> Self {
        let id = SessionId::generate();
        let room = id.to_string();
        Self {
            id,
            title: title.into(),
            host_id: host_id.into(),
            host_name: host_name.into(),
            description: None,
            status: SessionStatus::Waiting,
            approved: false,
            created_at: Utc::now(),
            scheduled_for: None,
            webrtc_room_id: room,
            participant_count: 0,
            max_participants,
        }
    }

    /// Create a session that opens at a scheduled time (approval workflow)
    pub fn scheduled(
        title: impl Into<String>,
        host_id: impl Into<String>,
        host_name: impl Into<String>,
        max_participants: u32,
        starts_at: DateTime<Utc>,
    ) -> Self {
        let mut session = Self::new(title, host_id, host_name, max_participants);
        session.status = SessionStatus::Scheduled;
        session.scheduled_for = Some(starts_at);
        session
    }

    pub fn approve(&mut self) {
        self.approved = true;
        if self.status == SessionStatus::Scheduled {
            self.status = SessionStatus::Approved;
        }
    }

    /// First non-host participant appeared
    pub fn mark_live(&mut self) {
        self.status = SessionStatus::Live;
    }

    /// Host explicitly ended the session
    pub fn end(&mut self) {
        self.status = SessionStatus::Ended;
    }

    /// Joinability verdict for a listener at time `now`. Pure: depends only
    /// on status, schedule, participant count, capacity, and `now`.
    pub fn joinability(&self, now: DateTime<Utc>) -> JoinVerdict {
        if self.status == SessionStatus::Ended {
            return JoinVerdict::rejected("This podcast has ended");
        }
        if let Some(starts_at) = self.scheduled_for {
            if now < starts_at {
                return JoinVerdict::rejected(format!(
                    "Starts in {}",
                    humanize_duration(starts_at - now)
                ));
            }
        }
        if self.participant_count >= self.max_participants {
            return JoinVerdict::rejected("The session is full");
        }
        JoinVerdict::joinable()
    }
}

/// Session status as stored in the directory. `scheduled` and `approved` are
/// directory-only states; the signaling tree only ever sees
/// waiting/live/ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Scheduled,
    Approved,
    Waiting,
    Live,
    Ended,
}

/// Session ID value object, shared between the directory document and the
/// signaling namespace
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Verdict of the joinability predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinVerdict {
    pub joinable: bool,
    pub reason: Option<String>,
}

impl JoinVerdict {
    fn joinable() -> Self {
        Self {
            joinable: true,
            reason: None,
        }
    }

    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            joinable: false,
            reason: Some(reason.into()),
        }
    }
}

fn humanize_duration(until: Duration) -> String {
    let minutes = until.num_minutes();
    if minutes < 1 {
        return "less than a minute".to_string();
    }
    let days = until.num_days();
    if days >= 1 {
        return plural(days, "day");
    }
    let hours = until.num_hours();
    if hours >= 1 {
        return plural(hours, "hour");
    }
    plural(minutes, "minute")
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", n, unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn session_with(status: SessionStatus, count: u32, max: u32) -> PodcastSession {
        let mut session = PodcastSession::new("Youth Hour", "host-1", "Alex", max);
        session.status = status;
        session.participant_count = count;
        session
    }

    #[test]
    fn waiting_session_with_room_is_joinable() {
        let session = session_with(SessionStatus::Waiting, 0, 2);
        let verdict = session.joinability(Utc::now());
        assert!(verdict.joinable);
        assert!(verdict.reason.is_none());
    }

    #[test]
    fn ended_session_is_never_joinable() {
        let session = session_with(SessionStatus::Ended, 0, 2);
        let verdict = session.joinability(Utc::now());
        assert!(!verdict.joinable);
        assert_eq!(verdict.reason.as_deref(), Some("This podcast has ended"));
    }

    #[test]
    fn full_session_is_rejected() {
        let session = session_with(SessionStatus::Live, 2, 2);
        let verdict = session.joinability(Utc::now());
        assert!(!verdict.joinable);
        assert_eq!(verdict.reason.as_deref(), Some("The session is full"));
    }

    #[test]
    fn scheduled_session_reports_time_until_start() {
        // date=2025-01-01 10:00, now=2024-12-31 23:00
        let starts_at = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 12, 31, 23, 0, 0).unwrap();
        let session = PodcastSession::scheduled("Youth Hour", "host-1", "Alex", 10, starts_at);
        let verdict = session.joinability(now);
        assert!(!verdict.joinable);
        assert_eq!(verdict.reason.as_deref(), Some("Starts in 11 hours"));
    }

    #[test]
    fn scheduled_session_is_joinable_once_start_time_passes() {
        let starts_at = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 1).unwrap();
        let session = PodcastSession::scheduled("Youth Hour", "host-1", "Alex", 10, starts_at);
        assert!(session.joinability(now).joinable);
    }

    #[test]
    fn start_in_one_hour_is_singular() {
        let starts_at = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
        let session = PodcastSession::scheduled("Youth Hour", "host-1", "Alex", 10, starts_at);
        assert_eq!(
            session.joinability(now).reason.as_deref(),
            Some("Starts in 1 hour")
        );
    }

    #[test]
    fn lifecycle_transitions() {
        let mut session = PodcastSession::new("Youth Hour", "host-1", "Alex", 10);
        assert_eq!(session.status, SessionStatus::Waiting);
        session.mark_live();
        assert_eq!(session.status, SessionStatus::Live);
        session.end();
        assert_eq!(session.status, SessionStatus::Ended);
    }

    proptest! {
        // Joinability is a pure function of its inputs: same session + same
        // clock always yields the same verdict, and a joinable verdict
        // implies every admission condition held.
        #[test]
        fn joinability_is_pure_and_consistent(
            status_idx in 0usize..5,
            count in 0u32..20,
            max in 1u32..20,
            offset_mins in -600i64..600,
        ) {
            let statuses = [
                SessionStatus::Scheduled,
                SessionStatus::Approved,
                SessionStatus::Waiting,
                SessionStatus::Live,
                SessionStatus::Ended,
            ];
            let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
            let mut session = session_with(statuses[status_idx], count, max);
            session.scheduled_for = Some(now + Duration::minutes(offset_mins));

            let first = session.joinability(now);
            let second = session.joinability(now);
            prop_assert_eq!(&first, &second);

            if first.joinable {
                prop_assert!(session.status != SessionStatus::Ended);
                prop_assert!(count < max);
                prop_assert!(offset_mins <= 0);
            } else {
                prop_assert!(first.reason.is_some());
            }
        }
    }
}
