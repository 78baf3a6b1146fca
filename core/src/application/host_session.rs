use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use shared::protocol::{ParticipantRecord, RoomStatus, SignalMessage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::domain::aggregates::{host_record, ParticipantId, PodcastSession, SessionStatus};

use super::dedup::DedupCache;
use super::events::{HostCommand, HostEvent};
use super::negotiation::{IceVerdict, PeerNegotiation};
use super::ports::{
    ChildEvent, IceCandidateInit, PeerTransportFactory, SessionDirectory, SignalingChannel,
    TransportEvent,
};
use super::room_paths::RoomPaths;

/// One queued request for speaking rights, FIFO by request timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakRequestEntry {
    pub request_id: String,
    pub participant_id: String,
    pub name: String,
    pub timestamp: i64,
}

/// Cloneable handle for driving a running host manager from the outside
#[derive(Clone)]
pub struct HostHandle {
    events: mpsc::UnboundedSender<HostEvent>,
    cancel: CancellationToken,
}

impl HostHandle {
    pub fn approve_speak(&self, request_id: impl Into<String>) -> Result<()> {
        self.send(HostCommand::ApproveSpeak {
            request_id: request_id.into(),
        })
    }

    pub fn approve_next_speaker(&self) -> Result<()> {
        self.send(HostCommand::ApproveNextSpeaker)
    }

    pub fn deny_speak(&self, request_id: impl Into<String>) -> Result<()> {
        self.send(HostCommand::DenySpeak {
            request_id: request_id.into(),
        })
    }

    pub fn revoke_speak(&self, participant_id: ParticipantId) -> Result<()> {
        self.send(HostCommand::RevokeSpeak { participant_id })
    }

    pub fn end_session(&self) -> Result<()> {
        self.send(HostCommand::EndSession)
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn send(&self, command: HostCommand) -> Result<()> {
        self.events
            .send(HostEvent::Command(command))
            .map_err(|_| anyhow::anyhow!("host session is no longer running"))
    }
}

/// Host-side peer session manager. Owns the local microphone, the map of
/// listener peer connections, the playback registry for inbound audio, and
/// the speak-request queue. All mutation happens inside `handle_event`,
/// which the run loop drives from a single inbound queue.
pub struct HostSessionManager {
    session: PodcastSession,
    host: ParticipantRecord,
    paths: RoomPaths,
    channel: Arc<dyn SignalingChannel>,
    factory: Arc<dyn PeerTransportFactory>,
    directory: Arc<dyn SessionDirectory>,
    config: SessionConfig,

    connections: HashMap<ParticipantId, PeerNegotiation>,
    /// Inbound track ids per participant; stands in for the playback
    /// elements the UI attaches
    playback: HashMap<ParticipantId, Vec<String>>,
    roster: HashMap<ParticipantId, ParticipantRecord>,
    speak_queue: Vec<SpeakRequestEntry>,
    /// Candidates that arrived before the participant's offer did
    early_candidates: HashMap<ParticipantId, Vec<IceCandidateInit>>,
    seen_messages: DedupCache,

    events_tx: mpsc::UnboundedSender<HostEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<HostEvent>>,
    cancel: CancellationToken,
    live: bool,
    ended: bool,
}

impl HostSessionManager {
    pub fn new(
        session: PodcastSession,
        channel: Arc<dyn SignalingChannel>,
        factory: Arc<dyn PeerTransportFactory>,
        directory: Arc<dyn SessionDirectory>,
        config: SessionConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let host = host_record(&session);
        let paths = RoomPaths::new(&session.webrtc_room_id);
        let seen_messages = DedupCache::new(config.dedup_capacity);
        Self {
            session,
            host,
            paths,
            channel,
            factory,
            directory,
            config,
            connections: HashMap::new(),
            playback: HashMap::new(),
            roster: HashMap::new(),
            speak_queue: Vec::new(),
            early_candidates: HashMap::new(),
            seen_messages,
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
            live: false,
            ended: false,
        }
    }

    pub fn handle(&self) -> HostHandle {
        HostHandle {
            events: self.events_tx.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Acquire the microphone, seed the waiting room, and wire the channel
    /// subscriptions. Microphone failure is fatal to session setup.
    pub async fn start(&mut self) -> Result<()> {
        self.factory
            .acquire_local_audio()
            .await
            .context("failed to acquire microphone")?;

        self.channel
            .write_value(&self.paths.status(), encode(&RoomStatus::Waiting)?)
            .await?;
        self.channel
            .write_value(&self.paths.participant(&self.host.id), encode(&self.host)?)
            .await?;

        self.subscribe_presence().await?;
        self.subscribe_speak_requests().await?;

        info!(session = %self.session.id, room = %self.session.webrtc_room_id, "waiting room open");
        Ok(())
    }

    /// Drain the inbound queue until the session is shut down.
    pub async fn run(mut self) -> Result<()> {
        let mut events = self
            .events_rx
            .take()
            .context("host run loop already started")?;
        let mut sweep = tokio::time::interval(self.config.sweep_interval());
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        if let Err(e) = self.handle_event(event).await {
                            warn!(error = %e, "host event handling failed");
                        }
                    }
                    None => break,
                },
                _ = sweep.tick() => self.sweep_stalled().await,
            }
        }
        Ok(())
    }

    pub(crate) async fn handle_event(&mut self, event: HostEvent) -> Result<()> {
        if self.ended {
            debug!("ignoring event after session end");
            return Ok(());
        }
        match event {
            HostEvent::ParticipantAdded(record) => self.handle_participant_added(record).await,
            HostEvent::ParticipantRemoved(pid) => self.handle_participant_removed(pid).await,
            HostEvent::Signal {
                participant_id,
                message,
            } => self.handle_signal(participant_id, message).await,
            HostEvent::SpeakRequested {
                request_id,
                participant_id,
                name,
                timestamp,
            } => {
                self.enqueue_speak_request(SpeakRequestEntry {
                    request_id,
                    participant_id,
                    name,
                    timestamp,
                });
                Ok(())
            }
            HostEvent::SpeakRequestRemoved { request_id } => {
                self.speak_queue.retain(|e| e.request_id != request_id);
                Ok(())
            }
            HostEvent::Transport {
                participant_id,
                event,
            } => self.handle_transport_event(participant_id, event).await,
            HostEvent::Command(command) => self.handle_command(command).await,
        }
    }

    async fn handle_command(&mut self, command: HostCommand) -> Result<()> {
        match command {
            HostCommand::ApproveSpeak { request_id } => self.approve_speak(&request_id).await,
            HostCommand::ApproveNextSpeaker => {
                if let Some(front) = self.speak_queue.first().cloned() {
                    self.approve_speak(&front.request_id).await
                } else {
                    Ok(())
                }
            }
            HostCommand::DenySpeak { request_id } => self.deny_speak(&request_id).await,
            HostCommand::RevokeSpeak { participant_id } => {
                self.revoke_speak(&participant_id).await
            }
            HostCommand::EndSession => self.end_session().await,
        }
    }

    async fn handle_participant_added(&mut self, record: ParticipantRecord) -> Result<()> {
        let pid = ParticipantId::from_string(record.id.clone());
        let first_seen = !self.roster.contains_key(&pid);
        self.roster.insert(pid.clone(), record);
        if !first_seen {
            // record overwrite (canSpeak flip); nothing else to do
            return Ok(());
        }

        info!(participant = %pid, "listener joined");
        if let Err(e) = self.subscribe_participant_signals(pid.clone()).await {
            warn!(participant = %pid, error = %e, "failed to subscribe listener signals");
        }
        self.refresh_participant_count().await;

        if !self.live {
            self.live = true;
            self.session.mark_live();
            if let Err(e) = self
                .channel
                .write_value(&self.paths.status(), encode(&RoomStatus::Live)?)
                .await
            {
                warn!(error = %e, "failed to publish live status");
            }
            if let Err(e) = self
                .directory
                .update_status(&self.session.id, SessionStatus::Live)
                .await
            {
                warn!(error = %e, "failed to mirror live status to directory");
            }
            info!(session = %self.session.id, "session went live");
        }
        Ok(())
    }

    async fn handle_participant_removed(&mut self, pid: ParticipantId) -> Result<()> {
        if self.roster.remove(&pid).is_none() {
            return Ok(());
        }
        info!(participant = %pid, "listener left");
        self.teardown_participant(&pid).await;
        self.speak_queue.retain(|e| e.participant_id != pid.as_str());
        self.refresh_participant_count().await;
        Ok(())
    }

    async fn handle_signal(
        &mut self,
        pid: ParticipantId,
        message: SignalMessage,
    ) -> Result<()> {
        match message {
            SignalMessage::Offer { sdp, message_id } => {
                if !self.seen_messages.insert(&message_id) {
                    debug!(participant = %pid, message_id, "duplicate offer dropped");
                    return Ok(());
                }
                if let Err(e) = self.handle_offer(pid.clone(), sdp).await {
                    warn!(participant = %pid, error = %e, "offer handling failed");
                    self.teardown_participant(&pid).await;
                }
            }
            SignalMessage::IceCandidate {
                candidate,
                sdp_mid,
                sdp_mline_index,
            } => {
                let init = IceCandidateInit {
                    candidate,
                    sdp_mid,
                    sdp_mline_index,
                };
                match self.connections.get_mut(&pid) {
                    Some(negotiation) => {
                        if let Err(e) = negotiation.add_remote_candidate(init).await {
                            warn!(participant = %pid, error = %e, "candidate rejected");
                            self.teardown_participant(&pid).await;
                        }
                    }
                    None => self.early_candidates.entry(pid).or_default().push(init),
                }
            }
            other => debug!(participant = %pid, message = ?other, "unexpected signal ignored"),
        }
        Ok(())
    }

    /// Build a dedicated peer connection for the listener's offer and write
    /// the answer back. Failures here are contained to this participant.
    async fn handle_offer(&mut self, pid: ParticipantId, sdp: String) -> Result<()> {
        // A new offer for a known participant means renegotiation: tear the
        // old connection down and let the fresh round proceed.
        if let Some(mut old) = self.connections.remove(&pid) {
            debug!(participant = %pid, "renegotiation offer, replacing connection");
            if let Err(e) = old.close().await {
                warn!(participant = %pid, error = %e, "stale connection close failed");
            }
            self.playback.remove(&pid);
        }

        let handle = self
            .factory
            .create_transport(true)
            .await
            .context("transport creation failed")?;
        self.spawn_transport_forwarder(pid.clone(), handle.events);

        let mut negotiation = PeerNegotiation::new(pid.clone(), handle.transport);
        if let Some(buffered) = self.early_candidates.remove(&pid) {
            negotiation.buffer_candidates(buffered);
        }
        let answer_sdp = negotiation
            .accept_remote_offer(&sdp)
            .await
            .context("offer negotiation failed")?;

        let answer = SignalMessage::Answer {
            sdp: answer_sdp,
            message_id: Uuid::new_v4().to_string(),
        };
        self.channel
            .write_value(&self.paths.answer(pid.as_str()), encode(&answer)?)
            .await
            .context("answer write failed")?;

        self.connections.insert(pid, negotiation);
        Ok(())
    }

    async fn handle_transport_event(
        &mut self,
        pid: ParticipantId,
        event: TransportEvent,
    ) -> Result<()> {
        match event {
            TransportEvent::LocalCandidate(candidate) => {
                let message = SignalMessage::IceCandidate {
                    candidate: candidate.candidate,
                    sdp_mid: candidate.sdp_mid,
                    sdp_mline_index: candidate.sdp_mline_index,
                };
                if let Err(e) = self
                    .channel
                    .push_value(&self.paths.host_candidates(pid.as_str()), encode(&message)?)
                    .await
                {
                    warn!(participant = %pid, error = %e, "candidate publish failed");
                }
            }
            TransportEvent::IceState(state) => {
                let verdict = match self.connections.get_mut(&pid) {
                    Some(negotiation) => negotiation.on_ice_state(state),
                    None => return Ok(()),
                };
                match verdict {
                    IceVerdict::Connected => {
                        debug!(participant = %pid, "transport connected")
                    }
                    IceVerdict::Teardown => {
                        warn!(participant = %pid, ?state, "transport lost, tearing down");
                        self.teardown_participant(&pid).await;
                    }
                    IceVerdict::Proceed => {}
                }
            }
            TransportEvent::RemoteTrack { track_id } => {
                self.playback.entry(pid).or_default().push(track_id);
            }
        }
        Ok(())
    }

    fn enqueue_speak_request(&mut self, entry: SpeakRequestEntry) {
        if self
            .speak_queue
            .iter()
            .any(|e| e.request_id == entry.request_id)
        {
            return; // replayed request
        }
        let position = self
            .speak_queue
            .iter()
            .position(|e| e.timestamp > entry.timestamp)
            .unwrap_or(self.speak_queue.len());
        self.speak_queue.insert(position, entry);
    }

    /// Grant speaking rights: flip `canSpeak` on the participant record,
    /// drop the request, and tear down the current connection so the
    /// listener re-initiates with an outbound audio track.
    async fn approve_speak(&mut self, request_id: &str) -> Result<()> {
        let Some(position) = self
            .speak_queue
            .iter()
            .position(|e| e.request_id == request_id)
        else {
            debug!(request_id, "speak request no longer queued");
            return Ok(());
        };
        let entry = self.speak_queue.remove(position);
        let pid = ParticipantId::from_string(entry.participant_id.clone());

        if let Some(record) = self.roster.get_mut(&pid) {
            record.can_speak = true;
            let updated = record.clone();
            self.channel
                .write_value(&self.paths.participant(pid.as_str()), encode(&updated)?)
                .await?;
        } else {
            debug!(participant = %pid, "approved participant already left");
        }
        self.channel
            .remove_value(&self.paths.speak_request(request_id))
            .await?;

        info!(participant = %pid, "speaking rights granted");
        self.teardown_participant(&pid).await;
        Ok(())
    }

    async fn deny_speak(&mut self, request_id: &str) -> Result<()> {
        self.speak_queue.retain(|e| e.request_id != request_id);
        self.channel
            .remove_value(&self.paths.speak_request(request_id))
            .await?;
        Ok(())
    }

    /// Revoke speaking rights on an active speaker; the connection is torn
    /// down and a fresh negotiation is required if re-granted.
    async fn revoke_speak(&mut self, pid: &ParticipantId) -> Result<()> {
        if let Some(record) = self.roster.get_mut(pid) {
            if record.can_speak {
                record.can_speak = false;
                let updated = record.clone();
                self.channel
                    .write_value(&self.paths.participant(pid.as_str()), encode(&updated)?)
                    .await?;
                info!(participant = %pid, "speaking rights revoked");
                self.teardown_participant(pid).await;
            }
        }
        Ok(())
    }

    /// Stop all local tracks, close every peer connection, clear playback,
    /// mark the session ended, and schedule removal of the signaling
    /// subtree after the grace delay so late messages can drain.
    async fn end_session(&mut self) -> Result<()> {
        self.ended = true;
        self.session.end();
        self.factory.release_local_audio().await;

        let pids: Vec<ParticipantId> = self.connections.keys().cloned().collect();
        for pid in pids {
            self.teardown_participant(&pid).await;
        }
        self.playback.clear();
        self.speak_queue.clear();

        if let Err(e) = self
            .channel
            .write_value(&self.paths.status(), encode(&RoomStatus::Ended)?)
            .await
        {
            warn!(error = %e, "failed to publish ended status");
        }
        if let Err(e) = self
            .directory
            .update_status(&self.session.id, SessionStatus::Ended)
            .await
        {
            warn!(error = %e, "failed to mirror ended status to directory");
        }

        let channel = Arc::clone(&self.channel);
        let root = self.paths.root();
        // Deadline counts from the moment the session ended, not from the
        // cleanup task's first poll
        let deadline = tokio::time::Instant::now() + self.config.cleanup_grace();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Err(e) = channel.remove_value(&root).await {
                warn!(error = %e, "post-session signaling cleanup failed");
            }
        });

        info!(session = %self.session.id, "session ended");
        self.cancel.cancel();
        Ok(())
    }

    /// Teardown is always scoped to one participant; other connections are
    /// untouched.
    async fn teardown_participant(&mut self, pid: &ParticipantId) {
        if let Some(mut negotiation) = self.connections.remove(pid) {
            if let Err(e) = negotiation.close().await {
                warn!(participant = %pid, error = %e, "connection close failed");
            }
        }
        self.playback.remove(pid);
        self.early_candidates.remove(pid);
    }

    async fn sweep_stalled(&mut self) {
        let timeout = self.config.negotiation_timeout();
        let stalled: Vec<ParticipantId> = self
            .connections
            .iter()
            .filter(|(_, n)| n.is_expired(timeout))
            .map(|(pid, _)| pid.clone())
            .collect();
        for pid in stalled {
            warn!(participant = %pid, "negotiation timed out, abandoning");
            self.teardown_participant(&pid).await;
        }
    }

    async fn refresh_participant_count(&mut self) {
        let count = self.roster.len() as u32;
        self.session.participant_count = count;
        if let Err(e) = self
            .directory
            .set_participant_count(&self.session.id, count)
            .await
        {
            warn!(error = %e, "failed to mirror participant count");
        }
    }

    async fn subscribe_presence(&self) -> Result<()> {
        let mut children = self
            .channel
            .subscribe_child_added(&self.paths.participants())
            .await?;
        let events = self.events_tx.clone();
        let cancel = self.cancel.clone();
        let host_id = self.host.id.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    child = children.recv() => match child {
                        Some(ChildEvent::Added { value, .. }) => {
                            if let Some(record) = ParticipantRecord::decode(&value) {
                                if record.id != host_id {
                                    let _ = events.send(HostEvent::ParticipantAdded(record));
                                }
                            }
                        }
                        Some(ChildEvent::Removed { key }) => {
                            if key != host_id {
                                let _ = events.send(HostEvent::ParticipantRemoved(
                                    ParticipantId::from_string(key),
                                ));
                            }
                        }
                        None => break,
                    },
                }
            }
        });
        Ok(())
    }

    async fn subscribe_speak_requests(&self) -> Result<()> {
        let mut children = self
            .channel
            .subscribe_child_added(&self.paths.speak_requests())
            .await?;
        let events = self.events_tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    child = children.recv() => match child {
                        Some(ChildEvent::Added { key, value }) => {
                            if let Some(SignalMessage::SpeakRequest {
                                participant_id,
                                name,
                                timestamp,
                            }) = SignalMessage::decode(&value)
                            {
                                let _ = events.send(HostEvent::SpeakRequested {
                                    request_id: key,
                                    participant_id,
                                    name,
                                    timestamp,
                                });
                            }
                        }
                        Some(ChildEvent::Removed { key }) => {
                            let _ = events.send(HostEvent::SpeakRequestRemoved { request_id: key });
                        }
                        None => break,
                    },
                }
            }
        });
        Ok(())
    }

    /// Watch one listener's offer slot and candidate list, forwarding both
    /// into the inbound queue.
    async fn subscribe_participant_signals(&self, pid: ParticipantId) -> Result<()> {
        let mut offers = self
            .channel
            .subscribe_value(&self.paths.offer(pid.as_str()))
            .await?;
        let events = self.events_tx.clone();
        let cancel = self.cancel.clone();
        let offer_pid = pid.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    value = offers.recv() => match value {
                        Some(Some(value)) => {
                            if let Some(message) = SignalMessage::decode(&value) {
                                let _ = events.send(HostEvent::Signal {
                                    participant_id: offer_pid.clone(),
                                    message,
                                });
                            }
                        }
                        Some(None) => {}
                        None => break,
                    },
                }
            }
        });

        let mut candidates = self
            .channel
            .subscribe_child_added(&self.paths.listener_candidates(pid.as_str()))
            .await?;
        let events = self.events_tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    child = candidates.recv() => match child {
                        Some(ChildEvent::Added { value, .. }) => {
                            if let Some(message) = SignalMessage::decode(&value) {
                                let _ = events.send(HostEvent::Signal {
                                    participant_id: pid.clone(),
                                    message,
                                });
                            }
                        }
                        Some(ChildEvent::Removed { .. }) => {}
                        None => break,
                    },
                }
            }
        });
        Ok(())
    }

    fn spawn_transport_forwarder(
        &self,
        pid: ParticipantId,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let events = self.events_tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = transport_events.recv() => match event {
                        Some(event) => {
                            let _ = events.send(HostEvent::Transport {
                                participant_id: pid.clone(),
                                event,
                            });
                        }
                        None => break,
                    },
                }
            }
        });
    }

    // Read-only views for the UI layer

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn has_connection(&self, pid: &ParticipantId) -> bool {
        self.connections.contains_key(pid)
    }

    pub fn playback_tracks(&self, pid: &ParticipantId) -> Vec<String> {
        self.playback.get(pid).cloned().unwrap_or_default()
    }

    pub fn speak_queue(&self) -> &[SpeakRequestEntry] {
        &self.speak_queue
    }

    pub fn participant(&self, pid: &ParticipantId) -> Option<&ParticipantRecord> {
        self.roster.get(pid)
    }

    pub fn roster_len(&self) -> usize {
        self.roster.len()
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Drain whatever the forwarder tasks have queued so far. Test-only;
    /// production uses `run`.
    #[cfg(test)]
    pub(crate) async fn pump(&mut self) {
        let mut events = self.events_rx.take().expect("event queue taken");
        for _ in 0..4 {
            tokio::task::yield_now().await;
            while let Ok(event) = events.try_recv() {
                if let Err(e) = self.handle_event(event).await {
                    warn!(error = %e, "host event handling failed");
                }
            }
        }
        self.events_rx = Some(events);
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).context("failed to encode signaling payload")
}
