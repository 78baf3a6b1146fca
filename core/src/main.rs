use std::sync::Arc;

use tokio::time::{sleep, Duration};
use tracing::info;

use podcast_core::application::ports::SessionDirectory;
use podcast_core::application::{HostSessionManager, ListenerSessionManager};
use podcast_core::config::SessionConfig;
use podcast_core::domain::aggregates::PodcastSession;
use podcast_core::infrastructure::driven::{MemorySessionDirectory, MemorySignaling};
use podcast_core::infrastructure::driving::LoopbackTransportFactory;

/// End-to-end walkthrough of a session on in-memory adapters: a host opens
/// the waiting room, a listener joins, asks to speak, gets approved, and the
/// host ends the session.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let channel = Arc::new(MemorySignaling::new());
    let directory = Arc::new(MemorySessionDirectory::new());

    let session = PodcastSession::new("Morning Youth Hour", "host-account-1", "Alex", 25);
    directory.save(&session).await?;
    let session_id = session.id.clone();

    let host_factory = Arc::new(LoopbackTransportFactory::new(true));
    let mut host = HostSessionManager::new(
        session,
        channel.clone(),
        host_factory,
        directory.clone(),
        SessionConfig::default(),
    );
    let host_handle = host.handle();
    host.start().await?;
    let host_task = tokio::spawn(host.run());

    let listener_factory = Arc::new(LoopbackTransportFactory::new(true));
    let listener = ListenerSessionManager::join(
        &session_id,
        "Jordan",
        None,
        channel.clone(),
        listener_factory,
        directory.clone(),
        SessionConfig::default(),
    )
    .await?;
    let listener_handle = listener.handle();
    let listener_task = tokio::spawn(listener.run());

    // Let the offer/answer exchange settle, then walk the speak flow
    sleep(Duration::from_millis(100)).await;
    listener_handle.request_speak()?;

    sleep(Duration::from_millis(100)).await;
    host_handle.approve_next_speaker()?;

    sleep(Duration::from_millis(200)).await;
    host_handle.end_session()?;

    let _ = host_task.await?;
    let _ = listener_task.await?;

    info!("demo complete");
    Ok(())
}
