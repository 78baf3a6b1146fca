use anyhow::Result;
use async_trait::async_trait;

use crate::domain::aggregates::{PodcastSession, SessionId, SessionStatus};

/// Port for the document-store-backed session catalog. Status updates here
/// are advisory display state; the signaling channel remains the source of
/// truth for connectivity.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionDirectory: Send + Sync {
    async fn save(&self, session: &PodcastSession) -> Result<()>;
    async fn find_by_id(&self, id: &SessionId) -> Result<Option<PodcastSession>>;
    async fn list_sessions(&self) -> Result<Vec<PodcastSession>>;
    async fn update_status(&self, id: &SessionId, status: SessionStatus) -> Result<()>;
    async fn set_participant_count(&self, id: &SessionId, count: u32) -> Result<()>;
}
