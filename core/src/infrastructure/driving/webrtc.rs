use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::{
    api::{
        media_engine::{MediaEngine, MIME_TYPE_OPUS},
        APIBuilder, API,
    },
    ice_transport::{
        ice_candidate::{RTCIceCandidate, RTCIceCandidateInit},
        ice_connection_state::RTCIceConnectionState,
        ice_server::RTCIceServer,
    },
    peer_connection::{
        configuration::RTCConfiguration, sdp::session_description::RTCSessionDescription,
        RTCPeerConnection,
    },
    rtp_transceiver::{
        rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType},
        rtp_transceiver_direction::RTCRtpTransceiverDirection,
        RTCRtpTransceiverInit,
    },
    track::track_local::{
        track_local_static_rtp::TrackLocalStaticRTP, TrackLocal, TrackLocalWriter,
    },
};

use crate::application::ports::{
    IceCandidateInit, IceConnectionState, PeerTransport, PeerTransportFactory, SdpKind,
    SessionDescription, TransportEvent, TransportHandle,
};
use crate::config::SessionConfig;
use crate::error::{MediaError, NegotiationError};

/// Peer transport backed by the `webrtc` crate. One factory per process;
/// the local audio track is shared by every sending transport it creates.
pub struct WebRtcTransportFactory {
    api: API,
    config: SessionConfig,
    audio: RwLock<Option<LocalAudio>>,
}

struct LocalAudio {
    track: Arc<TrackLocalStaticRTP>,
    cancel: CancellationToken,
}

impl WebRtcTransportFactory {
    pub fn new(config: SessionConfig) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    clock_rate: 48000,
                    channels: 2,
                    sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                    rtcp_feedback: vec![],
                },
                payload_type: 111,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )?;

        let api = APIBuilder::new().with_media_engine(media_engine).build();

        Ok(Self {
            api,
            config,
            audio: RwLock::new(None),
        })
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.config.stun_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }
}

#[async_trait]
impl PeerTransportFactory for WebRtcTransportFactory {
    async fn acquire_local_audio(&self) -> Result<(), MediaError> {
        let mut audio = self.audio.write().await;
        if audio.is_some() {
            return Ok(());
        }

        let track = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: "".to_owned(),
                rtcp_feedback: vec![],
            },
            "audio".to_owned(),
            "podcast".to_owned(),
        ));

        let cancel = CancellationToken::new();
        let track_clone = Arc::clone(&track);
        let token = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = send_comfort_noise(track_clone, token).await {
                warn!("audio sender error: {}", e);
            }
        });

        *audio = Some(LocalAudio { track, cancel });
        Ok(())
    }

    async fn release_local_audio(&self) {
        let mut audio = self.audio.write().await;
        if let Some(local) = audio.take() {
            local.cancel.cancel();
            info!("released local audio track");
        }
    }

    async fn create_transport(
        &self,
        send_audio: bool,
    ) -> Result<TransportHandle, NegotiationError> {
        let peer_connection = Arc::new(
            self.api
                .new_peer_connection(self.rtc_configuration())
                .await
                .map_err(|e| NegotiationError::Transport(e.to_string()))?,
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let candidate_tx = events_tx.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = candidate_tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(json) => {
                        let _ = tx.send(TransportEvent::LocalCandidate(IceCandidateInit {
                            candidate: json.candidate,
                            sdp_mid: json.sdp_mid,
                            sdp_mline_index: json.sdp_mline_index,
                        }));
                    }
                    Err(e) => warn!("failed to serialize ICE candidate: {}", e),
                }
            })
        }));

        let state_tx = events_tx.clone();
        peer_connection.on_ice_connection_state_change(Box::new(
            move |state: RTCIceConnectionState| {
                let tx = state_tx.clone();
                Box::pin(async move {
                    debug!("ICE connection state: {}", state);
                    if let Some(mapped) = map_ice_state(state) {
                        let _ = tx.send(TransportEvent::IceState(mapped));
                    }
                })
            },
        ));

        let track_tx = events_tx.clone();
        peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            let tx = track_tx.clone();
            Box::pin(async move {
                info!(
                    "remote track: id={} codec={}",
                    track.id(),
                    track.codec().capability.mime_type
                );
                let _ = tx.send(TransportEvent::RemoteTrack {
                    track_id: track.id(),
                });
                // Drain RTP in a separate task so this handler returns
                // immediately; holding it blocks delivery of later tracks.
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 1500];
                    while track.read(&mut buf).await.is_ok() {}
                });
            })
        }));

        if send_audio {
            let audio = self.audio.read().await;
            let local = audio
                .as_ref()
                .ok_or_else(|| NegotiationError::Transport("local audio not acquired".into()))?;
            peer_connection
                .add_track(Arc::clone(&local.track) as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| NegotiationError::Transport(e.to_string()))?;
        } else {
            let init = RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Recvonly,
                send_encodings: vec![],
            };
            peer_connection
                .add_transceiver_from_kind(RTPCodecType::Audio, Some(init))
                .await
                .map_err(|e| NegotiationError::Transport(e.to_string()))?;
        }

        Ok(TransportHandle {
            transport: Arc::new(WebRtcTransport { peer_connection }),
            events: events_rx,
        })
    }
}

pub struct WebRtcTransport {
    peer_connection: Arc<RTCPeerConnection>,
}

impl WebRtcTransport {
    fn parse_description(
        description: SessionDescription,
    ) -> Result<RTCSessionDescription, NegotiationError> {
        let result = match description.kind {
            SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
        };
        result.map_err(|e| NegotiationError::BadDescription(e.to_string()))
    }
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn create_offer(&self) -> Result<String, NegotiationError> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| NegotiationError::Transport(e.to_string()))?;
        Ok(offer.sdp)
    }

    async fn create_answer(&self) -> Result<String, NegotiationError> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| NegotiationError::Transport(e.to_string()))?;
        Ok(answer.sdp)
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let description = Self::parse_description(description)?;
        self.peer_connection
            .set_local_description(description)
            .await
            .map_err(|e| NegotiationError::Transport(e.to_string()))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let description = Self::parse_description(description)?;
        self.peer_connection
            .set_remote_description(description)
            .await
            .map_err(|e| NegotiationError::Transport(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), NegotiationError> {
        self.peer_connection
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: None,
            })
            .await
            .map_err(|e| NegotiationError::Transport(e.to_string()))
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.peer_connection
            .close()
            .await
            .map_err(|e| NegotiationError::Transport(e.to_string()))
    }
}

fn map_ice_state(state: RTCIceConnectionState) -> Option<IceConnectionState> {
    match state {
        RTCIceConnectionState::New => Some(IceConnectionState::New),
        RTCIceConnectionState::Checking => Some(IceConnectionState::Checking),
        RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
            Some(IceConnectionState::Connected)
        }
        RTCIceConnectionState::Disconnected => Some(IceConnectionState::Disconnected),
        RTCIceConnectionState::Failed => Some(IceConnectionState::Failed),
        RTCIceConnectionState::Closed => Some(IceConnectionState::Closed),
        RTCIceConnectionState::Unspecified => None,
    }
}

/// Keep the audio m-line alive with opus DTX frames until a capture source
/// is wired in. 20ms cadence, 48kHz clock.
async fn send_comfort_noise(
    track: Arc<TrackLocalStaticRTP>,
    cancel: CancellationToken,
) -> Result<()> {
    use tokio::time::{interval, Duration};

    let mut ticker = interval(Duration::from_millis(20));
    let mut sequence_number: u16 = 0;
    let mut timestamp: u32 = rand::random();
    let ssrc: u32 = rand::random();

    info!("starting local audio stream");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("local audio stream stopped");
                break;
            }
            _ = ticker.tick() => {}
        }

        // RTP header, then a single opus DTX frame
        let mut rtp_data = Vec::with_capacity(15);
        rtp_data.push(0x80); // V=2, P=0, X=0, CC=0
        rtp_data.push(111); // M=0, PT=111 (opus)
        rtp_data.extend_from_slice(&sequence_number.to_be_bytes());
        rtp_data.extend_from_slice(&timestamp.to_be_bytes());
        rtp_data.extend_from_slice(&ssrc.to_be_bytes());
        rtp_data.extend_from_slice(&[0xf8, 0xff, 0xfe]);

        if let Err(e) = track.write(&rtp_data).await {
            warn!("failed to write RTP packet: {}", e);
            break;
        }

        sequence_number = sequence_number.wrapping_add(1);
        timestamp = timestamp.wrapping_add(960); // 48kHz / 50 packets per second
    }

    Ok(())
}
