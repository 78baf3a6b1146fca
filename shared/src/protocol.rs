use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Messages exchanged over the signaling tree between a host and its listeners
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalMessage {
    /// SDP offer, written by the initiating side; last write wins
    #[serde(rename_all = "camelCase")]
    Offer { sdp: String, message_id: String },
    /// SDP answer, written by the responding side; last write wins
    #[serde(rename_all = "camelCase")]
    Answer { sdp: String, message_id: String },
    /// A gathered ICE candidate, appended to the sender's candidate list
    #[serde(rename_all = "camelCase")]
    IceCandidate {
        candidate: String,
        #[serde(default)]
        sdp_mid: Option<String>,
        #[serde(default, rename = "sdpMLineIndex")]
        sdp_mline_index: Option<u16>,
    },
    /// A listener asking the host for speaking rights
    #[serde(rename_all = "camelCase")]
    SpeakRequest {
        participant_id: String,
        name: String,
        /// Milliseconds since the epoch; the host queues requests FIFO by this
        timestamp: i64,
    },
}

impl SignalMessage {
    /// Decode a raw signaling entry, failing closed: malformed entries are
    /// logged and dropped rather than surfaced as errors.
    pub fn decode(value: &serde_json::Value) -> Option<Self> {
        decode_lenient(value)
    }
}

/// Presence record stored under `rooms/{roomId}/participants/{participantId}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRecord {
    pub id: String,
    pub name: String,
    pub role: ParticipantRole,
    /// Milliseconds since the epoch
    pub joined_at: i64,
    #[serde(default)]
    pub can_speak: bool,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl ParticipantRecord {
    pub fn decode(value: &serde_json::Value) -> Option<Self> {
        decode_lenient(value)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Host,
    Listener,
}

/// Room state mirrored at `rooms/{roomId}/status`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Waiting,
    Live,
    Ended,
}

impl RoomStatus {
    pub fn decode(value: &serde_json::Value) -> Option<Self> {
        decode_lenient(value)
    }
}

fn decode_lenient<T: DeserializeOwned>(value: &serde_json::Value) -> Option<T> {
    match serde_json::from_value(value.clone()) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            tracing::warn!(error = %e, "dropping malformed signaling entry");
            None
        }
    }
}
