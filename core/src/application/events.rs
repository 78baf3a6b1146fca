use shared::protocol::{ParticipantRecord, RoomStatus, SignalMessage};

use crate::domain::aggregates::ParticipantId;

use super::ports::TransportEvent;

/// Everything the host manager reacts to, funneled into a single inbound
/// queue so handler ordering matches arrival order.
#[derive(Debug)]
pub enum HostEvent {
    ParticipantAdded(ParticipantRecord),
    ParticipantRemoved(ParticipantId),
    Signal {
        participant_id: ParticipantId,
        message: SignalMessage,
    },
    SpeakRequested {
        request_id: String,
        participant_id: String,
        name: String,
        timestamp: i64,
    },
    SpeakRequestRemoved {
        request_id: String,
    },
    Transport {
        participant_id: ParticipantId,
        event: TransportEvent,
    },
    Command(HostCommand),
}

/// Host-side UI commands, injected into the same queue as channel events
#[derive(Debug)]
pub enum HostCommand {
    ApproveSpeak { request_id: String },
    ApproveNextSpeaker,
    DenySpeak { request_id: String },
    RevokeSpeak { participant_id: ParticipantId },
    EndSession,
}

/// Inbound queue of the listener manager
#[derive(Debug)]
pub enum ListenerEvent {
    Signal(SignalMessage),
    /// The listener's own presence record changed (the host flips canSpeak)
    SelfRecord(ParticipantRecord),
    RoomStatus(RoomStatus),
    Transport(TransportEvent),
    Command(ListenerCommand),
}

#[derive(Debug)]
pub enum ListenerCommand {
    RequestSpeak,
    Leave,
}
