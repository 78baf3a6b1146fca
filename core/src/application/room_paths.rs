/// Path layout of one session's subtree in the signaling store:
///
/// ```text
/// rooms/{roomId}/status
/// rooms/{roomId}/participants/{participantId}
/// rooms/{roomId}/webrtc/{participantId}/{offer|answer|hostIceCandidates|listenerIceCandidates}
/// rooms/{roomId}/speakRequests/{requestId}
/// ```
///
/// Everything is namespaced per room; no cross-session paths exist.
#[derive(Debug, Clone)]
pub struct RoomPaths {
    root: String,
}

impl RoomPaths {
    pub fn new(room_id: &str) -> Self {
        Self {
            root: format!("rooms/{}", room_id),
        }
    }

    pub fn root(&self) -> String {
        self.root.clone()
    }

    pub fn status(&self) -> String {
        format!("{}/status", self.root)
    }

    pub fn participants(&self) -> String {
        format!("{}/participants", self.root)
    }

    pub fn participant(&self, participant_id: &str) -> String {
        format!("{}/participants/{}", self.root, participant_id)
    }

    pub fn peer(&self, participant_id: &str) -> String {
        format!("{}/webrtc/{}", self.root, participant_id)
    }

    pub fn offer(&self, participant_id: &str) -> String {
        format!("{}/offer", self.peer(participant_id))
    }

    pub fn answer(&self, participant_id: &str) -> String {
        format!("{}/answer", self.peer(participant_id))
    }

    pub fn host_candidates(&self, participant_id: &str) -> String {
        format!("{}/hostIceCandidates", self.peer(participant_id))
    }

    pub fn listener_candidates(&self, participant_id: &str) -> String {
        format!("{}/listenerIceCandidates", self.peer(participant_id))
    }

    pub fn speak_requests(&self) -> String {
        format!("{}/speakRequests", self.root)
    }

    pub fn speak_request(&self, request_id: &str) -> String {
        format!("{}/speakRequests/{}", self.root, request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_namespaced_per_room() {
        let paths = RoomPaths::new("room1");
        assert_eq!(paths.status(), "rooms/room1/status");
        assert_eq!(paths.participant("p1"), "rooms/room1/participants/p1");
        assert_eq!(paths.offer("p1"), "rooms/room1/webrtc/p1/offer");
        assert_eq!(
            paths.listener_candidates("p1"),
            "rooms/room1/webrtc/p1/listenerIceCandidates"
        );
        assert_eq!(paths.speak_request("r1"), "rooms/room1/speakRequests/r1");
    }
}
