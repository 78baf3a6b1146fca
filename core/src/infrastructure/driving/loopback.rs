use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::application::ports::{
    IceCandidateInit, IceConnectionState, PeerTransport, PeerTransportFactory, SessionDescription,
    TransportEvent, TransportHandle,
};
use crate::error::{MediaError, NegotiationError};

/// Deterministic transport that "connects" as soon as both descriptions are
/// set. Lets the full host/listener negotiation run without a network or a
/// media stack; the demo binary and the session-manager tests use it.
pub struct LoopbackTransportFactory {
    emit_remote_track: bool,
    audio_acquired: AtomicBool,
}

impl LoopbackTransportFactory {
    pub fn new(emit_remote_track: bool) -> Self {
        Self {
            emit_remote_track,
            audio_acquired: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl PeerTransportFactory for LoopbackTransportFactory {
    async fn acquire_local_audio(&self) -> Result<(), MediaError> {
        self.audio_acquired.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn release_local_audio(&self) {
        self.audio_acquired.store(false, Ordering::SeqCst);
    }

    async fn create_transport(
        &self,
        send_audio: bool,
    ) -> Result<TransportHandle, NegotiationError> {
        if send_audio && !self.audio_acquired.load(Ordering::SeqCst) {
            return Err(NegotiationError::Transport(
                "local audio not acquired".to_string(),
            ));
        }
        let (transport, events) = LoopbackTransport::new(self.emit_remote_track);
        Ok(TransportHandle {
            transport: Arc::new(transport),
            events,
        })
    }
}

pub struct LoopbackTransport {
    id: String,
    emit_remote_track: bool,
    events: mpsc::UnboundedSender<TransportEvent>,
    state: Mutex<LoopState>,
}

#[derive(Default)]
struct LoopState {
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    applied: Vec<IceCandidateInit>,
    connected: bool,
    closed: bool,
}

impl LoopbackTransport {
    fn new(emit_remote_track: bool) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4().simple().to_string(),
                emit_remote_track,
                events: tx,
                state: Mutex::new(LoopState::default()),
            },
            rx,
        )
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A transport with no event consumer, for driving the negotiation
    /// state machine directly in tests.
    pub fn detached() -> Self {
        let (transport, _rx) = Self::new(false);
        transport
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidateInit> {
        self.lock_state().applied.clone()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.lock_state().local.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.lock_state().remote.clone()
    }

    fn maybe_connect(&self, state: &mut LoopState) {
        if state.connected || state.closed || state.local.is_none() || state.remote.is_none() {
            return;
        }
        state.connected = true;
        let _ = self
            .events
            .send(TransportEvent::IceState(IceConnectionState::Checking));
        let _ = self
            .events
            .send(TransportEvent::IceState(IceConnectionState::Connected));
        if self.emit_remote_track {
            let _ = self.events.send(TransportEvent::RemoteTrack {
                track_id: format!("audio-{}", self.id),
            });
        }
    }

    fn guard_open(state: &LoopState) -> Result<(), NegotiationError> {
        if state.closed {
            Err(NegotiationError::Transport("transport closed".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PeerTransport for LoopbackTransport {
    async fn create_offer(&self) -> Result<String, NegotiationError> {
        let state = self.lock_state();
        Self::guard_open(&state)?;
        Ok(format!("v=0 loopback-offer {}", self.id))
    }

    async fn create_answer(&self) -> Result<String, NegotiationError> {
        let state = self.lock_state();
        Self::guard_open(&state)?;
        if state.remote.is_none() {
            return Err(NegotiationError::InvalidState(
                "answer requested before remote description".to_string(),
            ));
        }
        Ok(format!("v=0 loopback-answer {}", self.id))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let mut state = self.lock_state();
        Self::guard_open(&state)?;
        state.local = Some(description);
        let _ = self
            .events
            .send(TransportEvent::LocalCandidate(IceCandidateInit {
                candidate: format!(
                    "candidate:1 1 udp 2130706431 127.0.0.1 54555 typ host generation 0 ufrag {}",
                    &self.id[..8]
                ),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
            }));
        self.maybe_connect(&mut state);
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let mut state = self.lock_state();
        Self::guard_open(&state)?;
        state.remote = Some(description);
        self.maybe_connect(&mut state);
        Ok(())
    }

    async fn add_ice_candidate(
        &self,
        candidate: IceCandidateInit,
    ) -> Result<(), NegotiationError> {
        let mut state = self.lock_state();
        Self::guard_open(&state)?;
        state.applied.push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        let mut state = self.lock_state();
        state.closed = true;
        Ok(())
    }
}
