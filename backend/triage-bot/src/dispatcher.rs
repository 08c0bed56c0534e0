//! Runs the inbound message loop and the registry sync timer side by side.
//!
//! Each inbound event is handled in its own task, so a slow verifier run
//! only delays the submission it belongs to. Handler errors and panics are
//! logged at the task boundary and never reach either loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cache::ProjectCache;
use crate::errors::Result;
use crate::registry::Registry;
use crate::sync;
use crate::telegram::Inbound;

const MAX_BACKOFF_SECS: u64 = 60;
const INITIAL_BACKOFF_SECS: u64 = 2;

/// Source of inbound chat events.
#[async_trait]
pub trait Inbox: Send {
    /// Wait for the next batch of events.
    async fn poll(&mut self) -> Result<Vec<Inbound>>;
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, inbound: Inbound) -> Result<()>;
}

/// Run both loops until the process is stopped.
pub async fn run<I, H, R>(
    inbox: I,
    handler: Arc<H>,
    registry: R,
    cache: ProjectCache,
    sync_interval_secs: u64,
) where
    I: Inbox + 'static,
    H: EventHandler + 'static,
    R: Registry + 'static,
{
    let sync_task = tokio::spawn(sync::run(registry, cache, sync_interval_secs));
    let inbound_task = tokio::spawn(inbound_loop(inbox, handler));

    let (inbound, sync) = tokio::join!(inbound_task, sync_task);
    if let Err(e) = inbound {
        error!("Inbound loop terminated: {e}");
    }
    if let Err(e) = sync {
        error!("Registry sync loop terminated: {e}");
    }
}

/// Poll `inbox` forever, dispatching every event to `handler`.
pub async fn inbound_loop<I, H>(mut inbox: I, handler: Arc<H>)
where
    I: Inbox,
    H: EventHandler + 'static,
{
    info!("Inbound loop starting");
    let mut backoff = INITIAL_BACKOFF_SECS;

    loop {
        match inbox.poll().await {
            Ok(events) => {
                backoff = INITIAL_BACKOFF_SECS;
                for event in events {
                    dispatch(handler.clone(), event);
                }
            }
            Err(e) => {
                warn!("Polling for updates failed (will retry in {backoff}s): {e}");
                tokio::time::sleep(Duration::from_secs(backoff)).await;
                backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
            }
        }
    }
}

/// Handle one event on its own task, logging whatever goes wrong.
pub fn dispatch<H: EventHandler + 'static>(handler: Arc<H>, event: Inbound) -> JoinHandle<()> {
    let chat_id = event.key.chat_id;
    let work = tokio::spawn(async move { handler.handle(event).await });

    tokio::spawn(async move {
        match work.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Handler error for chat {chat_id}: {e}"),
            Err(e) => error!("Handler for chat {chat_id} aborted: {e}"),
        }
    })
}
