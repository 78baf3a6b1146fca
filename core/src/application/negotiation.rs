use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::domain::aggregates::ParticipantId;
use crate::error::NegotiationError;

use super::ports::{
    IceCandidateInit, IceConnectionState, PeerTransport, SessionDescription,
};

/// Offer/answer axis of one peer connection. `Stable` is reached when the
/// counterpart acknowledges via ICE connect, not via a separate ack message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    OfferCreated,
    AnswerAwaited,
    Stable,
    Closed,
}

/// What the owning manager should do after an ICE state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceVerdict {
    Proceed,
    Connected,
    Teardown,
}

/// One peer connection's negotiation, exclusively owned by a session
/// manager. Candidates arriving before the remote description are buffered
/// and flushed in arrival order; the underlying transport may silently
/// ignore candidates applied out of order.
pub struct PeerNegotiation {
    participant_id: ParticipantId,
    transport: Arc<dyn PeerTransport>,
    state: NegotiationState,
    ice_state: IceConnectionState,
    connected_once: bool,
    remote_description_set: bool,
    pending_candidates: Vec<IceCandidateInit>,
    started_at: Instant,
}

impl PeerNegotiation {
    pub fn new(participant_id: ParticipantId, transport: Arc<dyn PeerTransport>) -> Self {
        Self {
            participant_id,
            transport,
            state: NegotiationState::Idle,
            ice_state: IceConnectionState::New,
            connected_once: false,
            remote_description_set: false,
            pending_candidates: Vec::new(),
            started_at: Instant::now(),
        }
    }

    pub fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn ice_state(&self) -> IceConnectionState {
        self.ice_state
    }

    /// Seed the buffer with candidates that arrived before this connection
    /// existed. Must be called before the remote description is set.
    pub fn buffer_candidates(&mut self, candidates: Vec<IceCandidateInit>) {
        self.pending_candidates.extend(candidates);
    }

    /// Responder path: apply the counterpart's offer, flush buffered
    /// candidates, and produce the answer SDP (already set locally).
    pub async fn accept_remote_offer(&mut self, sdp: &str) -> Result<String, NegotiationError> {
        if self.state != NegotiationState::Idle {
            return Err(NegotiationError::InvalidState(format!(
                "offer received in {:?}",
                self.state
            )));
        }
        self.transport
            .set_remote_description(SessionDescription::offer(sdp))
            .await?;
        self.remote_description_set = true;
        self.flush_candidates().await?;
        let answer = self.transport.create_answer().await?;
        self.transport
            .set_local_description(SessionDescription::answer(answer.clone()))
            .await?;
        // Waiting for the counterpart to acknowledge via ICE connect
        self.state = NegotiationState::AnswerAwaited;
        Ok(answer)
    }

    /// Initiator path: produce and set the local offer SDP.
    pub async fn initiate_offer(&mut self) -> Result<String, NegotiationError> {
        if self.state != NegotiationState::Idle {
            return Err(NegotiationError::InvalidState(format!(
                "offer initiated in {:?}",
                self.state
            )));
        }
        let offer = self.transport.create_offer().await?;
        self.transport
            .set_local_description(SessionDescription::offer(offer.clone()))
            .await?;
        self.state = NegotiationState::OfferCreated;
        Ok(offer)
    }

    /// The offer has been written to the signaling channel.
    pub fn mark_offer_published(&mut self) {
        if self.state == NegotiationState::OfferCreated {
            self.state = NegotiationState::AnswerAwaited;
        }
    }

    /// Initiator path: apply the counterpart's answer and flush buffered
    /// candidates.
    pub async fn apply_remote_answer(&mut self, sdp: &str) -> Result<(), NegotiationError> {
        if self.state != NegotiationState::AnswerAwaited {
            return Err(NegotiationError::InvalidState(format!(
                "answer received in {:?}",
                self.state
            )));
        }
        self.transport
            .set_remote_description(SessionDescription::answer(sdp))
            .await?;
        self.remote_description_set = true;
        self.flush_candidates().await?;
        Ok(())
    }

    /// Apply a candidate from the counterpart, buffering it if the remote
    /// description is not set yet.
    pub async fn add_remote_candidate(
        &mut self,
        candidate: IceCandidateInit,
    ) -> Result<(), NegotiationError> {
        if self.remote_description_set {
            self.transport.add_ice_candidate(candidate).await
        } else {
            self.pending_candidates.push(candidate);
            Ok(())
        }
    }

    async fn flush_candidates(&mut self) -> Result<(), NegotiationError> {
        for candidate in self.pending_candidates.drain(..) {
            self.transport.add_ice_candidate(candidate).await?;
        }
        Ok(())
    }

    /// Fold an ICE state change into the machine. `Failed` and `Closed` are
    /// terminal; `Disconnected` may still recover on its own.
    pub fn on_ice_state(&mut self, state: IceConnectionState) -> IceVerdict {
        self.ice_state = state;
        match state {
            IceConnectionState::Connected => {
                self.connected_once = true;
                if self.state != NegotiationState::Closed {
                    self.state = NegotiationState::Stable;
                }
                IceVerdict::Connected
            }
            IceConnectionState::Failed | IceConnectionState::Closed => IceVerdict::Teardown,
            _ => IceVerdict::Proceed,
        }
    }

    /// A negotiation that never connected within `timeout` of its offer is
    /// abandoned. The window is offer-to-connected only: an established
    /// connection that later dips to `Disconnected` is left alone, since it
    /// may recover on its own; `Failed`/`Closed` tear it down instead.
    pub fn is_expired(&self, timeout: Duration) -> bool {
        !self.connected_once
            && self.state != NegotiationState::Closed
            && self.started_at.elapsed() >= timeout
    }

    pub async fn close(&mut self) -> Result<(), NegotiationError> {
        if self.state == NegotiationState::Closed {
            return Ok(());
        }
        self.state = NegotiationState::Closed;
        self.ice_state = IceConnectionState::Closed;
        self.pending_candidates.clear();
        debug!(participant = %self.participant_id, "peer connection closed");
        self.transport.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::driving::loopback::LoopbackTransport;

    fn candidate(n: u16) -> IceCandidateInit {
        IceCandidateInit {
            candidate: format!("candidate:{} 1 udp 2130706431 192.0.2.1 5000{} typ host", n, n),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        }
    }

    fn negotiation() -> (PeerNegotiation, Arc<LoopbackTransport>) {
        let transport = Arc::new(LoopbackTransport::detached());
        let negotiation = PeerNegotiation::new(
            ParticipantId::from_string("p1".to_string()),
            transport.clone(),
        );
        (negotiation, transport)
    }

    #[tokio::test]
    async fn candidates_buffered_before_remote_description_flush_in_order() {
        let (mut negotiation, transport) = negotiation();

        negotiation.add_remote_candidate(candidate(1)).await.unwrap();
        negotiation.add_remote_candidate(candidate(2)).await.unwrap();
        negotiation.add_remote_candidate(candidate(3)).await.unwrap();
        assert!(transport.applied_candidates().is_empty());

        negotiation.accept_remote_offer("v=0 offer").await.unwrap();

        let applied = transport.applied_candidates();
        assert_eq!(applied, vec![candidate(1), candidate(2), candidate(3)]);
    }

    #[tokio::test]
    async fn candidates_after_remote_description_apply_immediately() {
        let (mut negotiation, transport) = negotiation();
        negotiation.accept_remote_offer("v=0 offer").await.unwrap();
        negotiation.add_remote_candidate(candidate(7)).await.unwrap();
        assert_eq!(transport.applied_candidates(), vec![candidate(7)]);
    }

    #[tokio::test]
    async fn responder_reaches_stable_only_on_ice_connect() {
        let (mut negotiation, _transport) = negotiation();
        negotiation.accept_remote_offer("v=0 offer").await.unwrap();
        assert_eq!(negotiation.state(), NegotiationState::AnswerAwaited);

        assert_eq!(
            negotiation.on_ice_state(IceConnectionState::Checking),
            IceVerdict::Proceed
        );
        assert_eq!(
            negotiation.on_ice_state(IceConnectionState::Connected),
            IceVerdict::Connected
        );
        assert_eq!(negotiation.state(), NegotiationState::Stable);
    }

    #[tokio::test]
    async fn initiator_walks_offer_created_then_answer_awaited() {
        let (mut negotiation, transport) = negotiation();
        let offer = negotiation.initiate_offer().await.unwrap();
        assert!(!offer.is_empty());
        assert_eq!(negotiation.state(), NegotiationState::OfferCreated);

        negotiation.mark_offer_published();
        assert_eq!(negotiation.state(), NegotiationState::AnswerAwaited);

        negotiation.apply_remote_answer("v=0 answer").await.unwrap();
        assert_eq!(negotiation.state(), NegotiationState::AnswerAwaited);
        assert!(transport.remote_description().is_some());
    }

    #[tokio::test]
    async fn duplicate_answer_is_an_invalid_state() {
        let (mut negotiation, _transport) = negotiation();
        negotiation.initiate_offer().await.unwrap();
        negotiation.mark_offer_published();
        negotiation.apply_remote_answer("v=0 answer").await.unwrap();
        negotiation.on_ice_state(IceConnectionState::Connected);

        let err = negotiation.apply_remote_answer("v=0 answer").await;
        assert!(matches!(err, Err(NegotiationError::InvalidState(_))));
    }

    #[tokio::test]
    async fn failed_ice_asks_for_teardown() {
        let (mut negotiation, _transport) = negotiation();
        negotiation.accept_remote_offer("v=0 offer").await.unwrap();
        assert_eq!(
            negotiation.on_ice_state(IceConnectionState::Failed),
            IceVerdict::Teardown
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unconnected_negotiation_expires_after_timeout() {
        let (mut negotiation, _transport) = negotiation();
        negotiation.accept_remote_offer("v=0 offer").await.unwrap();
        let timeout = Duration::from_secs(30);
        assert!(!negotiation.is_expired(timeout));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(negotiation.is_expired(timeout));

        negotiation.on_ice_state(IceConnectionState::Connected);
        assert!(!negotiation.is_expired(timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn established_connection_that_disconnects_is_not_expired() {
        let (mut negotiation, _transport) = negotiation();
        negotiation.accept_remote_offer("v=0 offer").await.unwrap();
        negotiation.on_ice_state(IceConnectionState::Connected);

        // Long-lived session whose ICE dips after establishment; it may
        // still recover, so the sweep must leave it alone
        tokio::time::advance(Duration::from_secs(31)).await;
        negotiation.on_ice_state(IceConnectionState::Disconnected);
        assert!(!negotiation.is_expired(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_clears_buffered_candidates() {
        let (mut negotiation, _transport) = negotiation();
        negotiation.add_remote_candidate(candidate(1)).await.unwrap();
        negotiation.close().await.unwrap();
        assert_eq!(negotiation.state(), NegotiationState::Closed);
        negotiation.close().await.unwrap();
    }
}
