use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use shared::protocol::{ParticipantRecord, RoomStatus, SignalMessage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::domain::aggregates::{listener_record, ParticipantId, SessionId};
use crate::error::JoinError;

use super::dedup::DedupCache;
use super::events::{ListenerCommand, ListenerEvent};
use super::negotiation::{IceVerdict, PeerNegotiation};
use super::ports::{
    ChildEvent, IceCandidateInit, PeerTransportFactory, SessionDirectory, SignalingChannel,
    TransportEvent,
};
use super::room_paths::RoomPaths;

/// Cloneable handle for driving a running listener manager
#[derive(Clone)]
pub struct ListenerHandle {
    events: mpsc::UnboundedSender<ListenerEvent>,
    cancel: CancellationToken,
}

impl ListenerHandle {
    pub fn request_speak(&self) -> Result<()> {
        self.send(ListenerCommand::RequestSpeak)
    }

    pub fn leave(&self) -> Result<()> {
        self.send(ListenerCommand::Leave)
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn send(&self, command: ListenerCommand) -> Result<()> {
        self.events
            .send(ListenerEvent::Command(command))
            .map_err(|_| anyhow::anyhow!("listener session is no longer running"))
    }
}

/// Listener-side peer session manager: one connection to the host, a local
/// stream only while speaking rights are granted, and playback for the
/// host's audio.
pub struct ListenerSessionManager {
    paths: RoomPaths,
    channel: Arc<dyn SignalingChannel>,
    factory: Arc<dyn PeerTransportFactory>,
    config: SessionConfig,

    record: ParticipantRecord,
    host_id: ParticipantId,
    connection: Option<PeerNegotiation>,
    playback: Vec<String>,
    early_candidates: Vec<IceCandidateInit>,
    seen_messages: DedupCache,
    audio_acquired: bool,

    events_tx: mpsc::UnboundedSender<ListenerEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<ListenerEvent>>,
    cancel: CancellationToken,
    left: bool,
}

impl ListenerSessionManager {
    /// Join a session. Joinability is evaluated client-side before any
    /// signaling occurs; a rejected join writes nothing to the channel.
    pub async fn join(
        session_id: &SessionId,
        display_name: &str,
        avatar: Option<String>,
        channel: Arc<dyn SignalingChannel>,
        factory: Arc<dyn PeerTransportFactory>,
        directory: Arc<dyn SessionDirectory>,
        config: SessionConfig,
    ) -> Result<Self, JoinError> {
        let session = directory
            .find_by_id(session_id)
            .await
            .map_err(JoinError::Directory)?
            .ok_or(JoinError::NotFound)?;
        let verdict = session.joinability(Utc::now());
        if !verdict.joinable {
            return Err(JoinError::NotJoinable(
                verdict.reason.unwrap_or_else(|| "not joinable".to_string()),
            ));
        }

        let record = listener_record(display_name, avatar);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut manager = Self {
            paths: RoomPaths::new(&session.webrtc_room_id),
            channel,
            factory,
            seen_messages: DedupCache::new(config.dedup_capacity),
            config,
            record,
            host_id: ParticipantId::host_of(&session),
            connection: None,
            playback: Vec::new(),
            early_candidates: Vec::new(),
            audio_acquired: false,
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
            left: false,
        };

        manager.subscribe_signaling().await?;
        manager
            .channel
            .write_value(
                &manager.paths.participant(&manager.record.id),
                encode(&manager.record).map_err(JoinError::Setup)?,
            )
            .await?;
        manager
            .start_negotiation(false)
            .await
            .map_err(JoinError::Setup)?;

        info!(participant = %manager.record.id, "joined session");
        Ok(manager)
    }

    pub fn handle(&self) -> ListenerHandle {
        ListenerHandle {
            events: self.events_tx.clone(),
            cancel: self.cancel.clone(),
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let mut events = self
            .events_rx
            .take()
            .context("listener run loop already started")?;
        let mut sweep = tokio::time::interval(self.config.sweep_interval());
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        if let Err(e) = self.handle_event(event).await {
                            warn!(error = %e, "listener event handling failed");
                        }
                    }
                    None => break,
                },
                _ = sweep.tick() => self.sweep_stalled().await,
            }
        }
        Ok(())
    }

    pub(crate) async fn handle_event(&mut self, event: ListenerEvent) -> Result<()> {
        if self.left {
            return Ok(());
        }
        match event {
            ListenerEvent::Signal(message) => self.handle_signal(message).await,
            ListenerEvent::SelfRecord(record) => self.handle_self_record(record).await,
            ListenerEvent::RoomStatus(status) => {
                if status == RoomStatus::Ended {
                    info!("host ended the session");
                    self.shutdown_local().await;
                }
                Ok(())
            }
            ListenerEvent::Transport(event) => self.handle_transport_event(event).await,
            ListenerEvent::Command(ListenerCommand::RequestSpeak) => self.request_speak().await,
            ListenerEvent::Command(ListenerCommand::Leave) => self.leave().await,
        }
    }

    async fn handle_signal(&mut self, message: SignalMessage) -> Result<()> {
        match message {
            SignalMessage::Answer { sdp, message_id } => {
                if !self.seen_messages.insert(&message_id) {
                    debug!(message_id, "duplicate answer dropped");
                    return Ok(());
                }
                match self.connection.as_mut() {
                    Some(negotiation) => {
                        if let Err(e) = negotiation.apply_remote_answer(&sdp).await {
                            // No automatic retry; the user rejoins manually.
                            warn!(error = %e, "answer rejected, dropping connection");
                            self.teardown_connection().await;
                        }
                    }
                    None => debug!("answer arrived without a pending negotiation"),
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
                match self.connection.as_mut() {
                    Some(negotiation) => {
                        if let Err(e) = negotiation.add_remote_candidate(init).await {
                            warn!(error = %e, "host candidate rejected");
                            self.teardown_connection().await;
                        }
                    }
                    None => self.early_candidates.push(init),
                }
            }
            other => debug!(message = ?other, "unexpected signal ignored"),
        }
        Ok(())
    }

    /// The host flipped `canSpeak` on our presence record: renegotiate with
    /// tracks added or removed. Teardown-and-reoffer rather than in-place
    /// track replacement; speak grants are infrequent enough.
    async fn handle_self_record(&mut self, record: ParticipantRecord) -> Result<()> {
        let changed = record.can_speak != self.record.can_speak;
        self.record = record;
        if !changed {
            return Ok(());
        }

        self.teardown_connection().await;
        let mut send_audio = self.record.can_speak;
        if send_audio && !self.audio_acquired {
            match self.factory.acquire_local_audio().await {
                Ok(()) => self.audio_acquired = true,
                Err(e) => {
                    warn!(error = %e, "microphone unavailable, staying listen-only");
                    send_audio = false;
                }
            }
        }
        if !self.record.can_speak && self.audio_acquired {
            self.factory.release_local_audio().await;
            self.audio_acquired = false;
        }

        if let Err(e) = self.start_negotiation(send_audio).await {
            warn!(error = %e, "renegotiation failed");
            self.teardown_connection().await;
        }
        Ok(())
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) -> Result<()> {
        match event {
            TransportEvent::LocalCandidate(candidate) => {
                let message = SignalMessage::IceCandidate {
                    candidate: candidate.candidate,
                    sdp_mid: candidate.sdp_mid,
                    sdp_mline_index: candidate.sdp_mline_index,
                };
                if let Err(e) = self
                    .channel
                    .push_value(
                        &self.paths.listener_candidates(&self.record.id),
                        encode(&message)?,
                    )
                    .await
                {
                    warn!(error = %e, "candidate publish failed");
                }
            }
            TransportEvent::IceState(state) => {
                let verdict = match self.connection.as_mut() {
                    Some(negotiation) => negotiation.on_ice_state(state),
                    None => return Ok(()),
                };
                match verdict {
                    IceVerdict::Connected => debug!("transport connected"),
                    IceVerdict::Teardown => {
                        warn!(?state, "transport lost; rejoin to reconnect");
                        self.teardown_connection().await;
                    }
                    IceVerdict::Proceed => {}
                }
            }
            TransportEvent::RemoteTrack { track_id } => self.playback.push(track_id),
        }
        Ok(())
    }

    async fn request_speak(&mut self) -> Result<()> {
        let message = SignalMessage::SpeakRequest {
            participant_id: self.record.id.clone(),
            name: self.record.name.clone(),
            timestamp: Utc::now().timestamp_millis(),
        };
        self.channel
            .push_value(&self.paths.speak_requests(), encode(&message)?)
            .await?;
        Ok(())
    }

    async fn leave(&mut self) -> Result<()> {
        self.shutdown_local().await;
        if let Err(e) = self
            .channel
            .remove_value(&self.paths.participant(&self.record.id))
            .await
        {
            warn!(error = %e, "presence removal failed");
        }
        if let Err(e) = self
            .channel
            .remove_value(&self.paths.peer(&self.record.id))
            .await
        {
            warn!(error = %e, "signaling cleanup failed");
        }
        info!(participant = %self.record.id, "left session");
        Ok(())
    }

    async fn shutdown_local(&mut self) {
        self.left = true;
        self.teardown_connection().await;
        if self.audio_acquired {
            self.factory.release_local_audio().await;
            self.audio_acquired = false;
        }
        self.cancel.cancel();
    }

    /// Create the single connection to the host and publish our offer.
    async fn start_negotiation(&mut self, send_audio: bool) -> Result<()> {
        let handle = self
            .factory
            .create_transport(send_audio)
            .await
            .context("transport creation failed")?;
        self.spawn_transport_forwarder(handle.events);

        let mut negotiation = PeerNegotiation::new(self.host_id.clone(), handle.transport);
        if !self.early_candidates.is_empty() {
            negotiation.buffer_candidates(std::mem::take(&mut self.early_candidates));
        }
        let offer_sdp = negotiation
            .initiate_offer()
            .await
            .context("offer creation failed")?;
        let offer = SignalMessage::Offer {
            sdp: offer_sdp,
            message_id: Uuid::new_v4().to_string(),
        };
        self.channel
            .write_value(&self.paths.offer(&self.record.id), encode(&offer)?)
            .await
            .context("offer write failed")?;
        negotiation.mark_offer_published();
        self.connection = Some(negotiation);
        Ok(())
    }

    async fn teardown_connection(&mut self) {
        if let Some(mut negotiation) = self.connection.take() {
            if let Err(e) = negotiation.close().await {
                warn!(error = %e, "connection close failed");
            }
        }
        self.playback.clear();
        self.early_candidates.clear();
    }

    async fn sweep_stalled(&mut self) {
        let timeout = self.config.negotiation_timeout();
        let expired = self
            .connection
            .as_ref()
            .map(|n| n.is_expired(timeout))
            .unwrap_or(false);
        if expired {
            warn!("negotiation timed out, abandoning");
            self.teardown_connection().await;
        }
    }

    async fn subscribe_signaling(&mut self) -> Result<(), JoinError> {
        let pid = self.record.id.clone();

        let mut answers = self.channel.subscribe_value(&self.paths.answer(&pid)).await?;
        let events = self.events_tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    value = answers.recv() => match value {
                        Some(Some(value)) => {
                            if let Some(message) = SignalMessage::decode(&value) {
                                let _ = events.send(ListenerEvent::Signal(message));
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
            .subscribe_child_added(&self.paths.host_candidates(&pid))
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
                                let _ = events.send(ListenerEvent::Signal(message));
                            }
                        }
                        Some(ChildEvent::Removed { .. }) => {}
                        None => break,
                    },
                }
            }
        });

        let mut own_record = self
            .channel
            .subscribe_value(&self.paths.participant(&pid))
            .await?;
        let events = self.events_tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    value = own_record.recv() => match value {
                        Some(Some(value)) => {
                            if let Some(record) = ParticipantRecord::decode(&value) {
                                let _ = events.send(ListenerEvent::SelfRecord(record));
                            }
                        }
                        Some(None) => {}
                        None => break,
                    },
                }
            }
        });

        let mut status = self.channel.subscribe_value(&self.paths.status()).await?;
        let events = self.events_tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    value = status.recv() => match value {
                        Some(Some(value)) => {
                            if let Some(status) = RoomStatus::decode(&value) {
                                let _ = events.send(ListenerEvent::RoomStatus(status));
                            }
                        }
                        Some(None) => {}
                        None => break,
                    },
                }
            }
        });

        Ok(())
    }

    fn spawn_transport_forwarder(
        &self,
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
                            let _ = events.send(ListenerEvent::Transport(event));
                        }
                        None => break,
                    },
                }
            }
        });
    }

    // Read-only views for the UI layer

    pub fn participant_id(&self) -> ParticipantId {
        ParticipantId::from_string(self.record.id.clone())
    }

    pub fn can_speak(&self) -> bool {
        self.record.can_speak
    }

    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    pub fn playback_tracks(&self) -> &[String] {
        &self.playback
    }

    pub fn has_left(&self) -> bool {
        self.left
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
                    warn!(error = %e, "listener event handling failed");
                }
            }
        }
        self.events_rx = Some(events);
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).context("failed to encode signaling payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{
        ChildEvent, MockPeerTransportFactory, MockSessionDirectory, TransportHandle,
    };
    use crate::domain::aggregates::{PodcastSession, SessionStatus};
    use crate::error::MediaError;
    use crate::infrastructure::driven::{MemorySessionDirectory, MemorySignaling};
    use crate::infrastructure::driving::loopback::LoopbackTransport;
    use crate::infrastructure::driving::LoopbackTransportFactory;

    struct Fixture {
        listener: ListenerSessionManager,
        channel: Arc<MemorySignaling>,
        paths: RoomPaths,
    }

    impl Fixture {
        fn pid(&self) -> String {
            self.listener.record.id.clone()
        }

        async fn read(&self, path: &str) -> Option<Value> {
            self.channel.read_value(path).await.unwrap()
        }

        async fn write_answer(&mut self, message_id: &str) {
            let answer = SignalMessage::Answer {
                sdp: "v=0 host-answer".to_string(),
                message_id: message_id.to_string(),
            };
            let path = self.paths.answer(&self.pid());
            self.channel
                .write_value(&path, encode(&answer).unwrap())
                .await
                .unwrap();
            self.listener.pump().await;
        }
    }

    async fn joined_listener() -> Fixture {
        let channel = Arc::new(MemorySignaling::new());
        let directory = Arc::new(MemorySessionDirectory::new());
        let session = PodcastSession::new("Youth Hour", "host-1", "Alex", 10);
        directory.save(&session).await.unwrap();
        let paths = RoomPaths::new(&session.webrtc_room_id);

        let mut listener = ListenerSessionManager::join(
            &session.id,
            "Jordan",
            None,
            channel.clone(),
            Arc::new(LoopbackTransportFactory::new(true)),
            directory,
            SessionConfig::default(),
        )
        .await
        .unwrap();
        listener.pump().await;
        Fixture {
            listener,
            channel,
            paths,
        }
    }

    #[tokio::test]
    async fn join_writes_presence_and_an_offer() {
        let fixture = joined_listener().await;
        let pid = fixture.pid();

        let presence = fixture.read(&fixture.paths.participant(&pid)).await.unwrap();
        assert_eq!(presence["role"], "listener");
        assert_eq!(presence["canSpeak"], false);

        let offer = fixture.read(&fixture.paths.offer(&pid)).await.unwrap();
        assert_eq!(offer["type"], "offer");
        assert!(fixture.listener.has_connection());
    }

    #[tokio::test]
    async fn rejected_join_touches_no_signaling_state() {
        let channel = Arc::new(MemorySignaling::new());
        let mut session = PodcastSession::new("Youth Hour", "host-1", "Alex", 10);
        session.end();
        let paths = RoomPaths::new(&session.webrtc_room_id);
        let session_id = session.id.clone();

        let mut directory = MockSessionDirectory::new();
        directory
            .expect_find_by_id()
            .returning(move |_| Ok(Some(session.clone())));
        let mut factory = MockPeerTransportFactory::new();
        factory.expect_create_transport().never();

        let mut participants = channel
            .subscribe_child_added(&paths.participants())
            .await
            .unwrap();

        let result = ListenerSessionManager::join(
            &session_id,
            "Jordan",
            None,
            channel.clone(),
            Arc::new(factory),
            Arc::new(directory),
            SessionConfig::default(),
        )
        .await;

        match result {
            Err(JoinError::NotJoinable(reason)) => {
                assert_eq!(reason, "This podcast has ended");
            }
            other => panic!("expected NotJoinable, got {:?}", other.err()),
        }
        assert!(participants.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let mut directory = MockSessionDirectory::new();
        directory.expect_find_by_id().returning(|_| Ok(None));

        let result = ListenerSessionManager::join(
            &crate::domain::aggregates::SessionId::generate(),
            "Jordan",
            None,
            Arc::new(MemorySignaling::new()),
            Arc::new(LoopbackTransportFactory::new(false)),
            Arc::new(directory),
            SessionConfig::default(),
        )
        .await;

        assert!(matches!(result, Err(JoinError::NotFound)));
    }

    #[tokio::test]
    async fn full_session_reports_capacity() {
        let mut session = PodcastSession::new("Youth Hour", "host-1", "Alex", 2);
        session.status = SessionStatus::Live;
        session.participant_count = 2;
        let session_id = session.id.clone();
        let mut directory = MockSessionDirectory::new();
        directory
            .expect_find_by_id()
            .returning(move |_| Ok(Some(session.clone())));

        let result = ListenerSessionManager::join(
            &session_id,
            "Jordan",
            None,
            Arc::new(MemorySignaling::new()),
            Arc::new(LoopbackTransportFactory::new(false)),
            Arc::new(directory),
            SessionConfig::default(),
        )
        .await;

        assert!(
            matches!(result, Err(JoinError::NotJoinable(ref reason)) if reason == "The session is full")
        );
    }

    #[tokio::test]
    async fn answer_completes_negotiation_and_registers_playback() {
        let mut fixture = joined_listener().await;
        fixture.write_answer("a1").await;

        assert!(fixture.listener.has_connection());
        // Both descriptions set: the loopback connects and hands us a track
        assert_eq!(fixture.listener.playback_tracks().len(), 1);
        // Our gathered candidate went out on the channel
        let mut candidates = fixture
            .channel
            .subscribe_child_added(&fixture.paths.listener_candidates(&fixture.pid()))
            .await
            .unwrap();
        assert!(matches!(
            candidates.try_recv(),
            Ok(ChildEvent::Added { value, .. }) if value["type"] == "ice-candidate"
        ));
    }

    #[tokio::test]
    async fn duplicate_answers_are_dropped() {
        let mut fixture = joined_listener().await;
        fixture.write_answer("a1").await;
        // Redelivery of the settled answer must not be re-applied
        fixture.write_answer("a1").await;
        assert!(fixture.listener.has_connection());
    }

    #[tokio::test]
    async fn speak_grant_renegotiates_with_audio() {
        let mut fixture = joined_listener().await;
        fixture.write_answer("a1").await;
        let pid = fixture.pid();
        let first_offer = fixture.read(&fixture.paths.offer(&pid)).await.unwrap();

        let mut record = fixture.listener.record.clone();
        record.can_speak = true;
        fixture
            .channel
            .write_value(&fixture.paths.participant(&pid), encode(&record).unwrap())
            .await
            .unwrap();
        fixture.listener.pump().await;

        assert!(fixture.listener.can_speak());
        assert!(fixture.listener.has_connection());
        let second_offer = fixture.read(&fixture.paths.offer(&pid)).await.unwrap();
        assert_ne!(second_offer["messageId"], first_offer["messageId"]);
    }

    #[tokio::test]
    async fn revoked_grant_drops_back_to_listen_only() {
        let mut fixture = joined_listener().await;
        let pid = fixture.pid();

        let mut record = fixture.listener.record.clone();
        record.can_speak = true;
        fixture
            .channel
            .write_value(&fixture.paths.participant(&pid), encode(&record).unwrap())
            .await
            .unwrap();
        fixture.listener.pump().await;
        assert!(fixture.listener.audio_acquired);

        record.can_speak = false;
        fixture
            .channel
            .write_value(&fixture.paths.participant(&pid), encode(&record).unwrap())
            .await
            .unwrap();
        fixture.listener.pump().await;

        assert!(!fixture.listener.can_speak());
        assert!(!fixture.listener.audio_acquired);
        assert!(fixture.listener.has_connection());
    }

    #[tokio::test]
    async fn microphone_failure_falls_back_to_listen_only() {
        let channel = Arc::new(MemorySignaling::new());
        let directory = Arc::new(MemorySessionDirectory::new());
        let session = PodcastSession::new("Youth Hour", "host-1", "Alex", 10);
        directory.save(&session).await.unwrap();
        let paths = RoomPaths::new(&session.webrtc_room_id);

        let mut factory = MockPeerTransportFactory::new();
        factory
            .expect_acquire_local_audio()
            .times(1)
            .returning(|| Err(MediaError::NoDevice));
        // Every transport is created receive-only, grant or not
        factory
            .expect_create_transport()
            .withf(|send_audio| !send_audio)
            .returning(|_| {
                let (_tx, rx) = mpsc::unbounded_channel();
                Ok(TransportHandle {
                    transport: Arc::new(LoopbackTransport::detached()),
                    events: rx,
                })
            });

        let mut listener = ListenerSessionManager::join(
            &session.id,
            "Jordan",
            None,
            channel.clone(),
            Arc::new(factory),
            directory,
            SessionConfig::default(),
        )
        .await
        .unwrap();
        listener.pump().await;

        let pid = listener.record.id.clone();
        let mut record = listener.record.clone();
        record.can_speak = true;
        channel
            .write_value(&paths.participant(&pid), encode(&record).unwrap())
            .await
            .unwrap();
        listener.pump().await;

        assert!(listener.can_speak());
        assert!(!listener.audio_acquired);
        assert!(listener.has_connection());
    }

    #[tokio::test]
    async fn host_ending_the_room_shuts_the_listener_down() {
        let mut fixture = joined_listener().await;
        fixture
            .channel
            .write_value(&fixture.paths.status(), encode(&RoomStatus::Ended).unwrap())
            .await
            .unwrap();
        fixture.listener.pump().await;

        assert!(fixture.listener.has_left());
        assert!(!fixture.listener.has_connection());
        assert!(fixture.listener.playback_tracks().is_empty());
    }

    #[tokio::test]
    async fn leaving_removes_presence_and_signaling_slots() {
        let mut fixture = joined_listener().await;
        let pid = fixture.pid();
        let handle = fixture.listener.handle();
        handle.leave().unwrap();
        fixture.listener.pump().await;

        assert!(fixture.listener.has_left());
        assert_eq!(fixture.read(&fixture.paths.participant(&pid)).await, None);
        assert_eq!(fixture.read(&fixture.paths.offer(&pid)).await, None);
    }

    #[tokio::test]
    async fn request_speak_pushes_to_the_queue() {
        let mut fixture = joined_listener().await;
        let mut requests = fixture
            .channel
            .subscribe_child_added(&fixture.paths.speak_requests())
            .await
            .unwrap();

        let handle = fixture.listener.handle();
        handle.request_speak().unwrap();
        fixture.listener.pump().await;

        match requests.try_recv() {
            Ok(ChildEvent::Added { value, .. }) => {
                assert_eq!(value["type"], "speak-request");
                assert_eq!(value["participantId"], fixture.pid());
                assert_eq!(value["name"], "Jordan");
            }
            other => panic!("expected a queued speak request, got {:?}", other),
        }
    }
}
