use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::application::ports::SessionDirectory;
use crate::domain::aggregates::{PodcastSession, SessionId, SessionStatus};

/// In-memory implementation of the session directory. In production this is
/// the document store's `podcasts` collection.
pub struct MemorySessionDirectory {
    sessions: RwLock<HashMap<String, PodcastSession>>,
}

impl MemorySessionDirectory {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemorySessionDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionDirectory for MemorySessionDirectory {
    async fn save(&self, session: &PodcastSession) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id.to_string(), session.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &SessionId) -> Result<Option<PodcastSession>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(id.as_str()).cloned())
    }

    async fn list_sessions(&self) -> Result<Vec<PodcastSession>> {
        let sessions = self.sessions.read().await;
        let mut all: Vec<PodcastSession> = sessions.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn update_status(&self, id: &SessionId, status: SessionStatus) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(id.as_str()) {
            session.status = status;
        }
        Ok(())
    }

    async fn set_participant_count(&self, id: &SessionId, count: u32) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(id.as_str()) {
            session.participant_count = count;
        }
        Ok(())
    }
}
