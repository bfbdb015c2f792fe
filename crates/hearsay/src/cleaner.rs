//! Storage cleaner.
//!
//! Periodically compares the total size of stored messages with the
//! configured limit. Over the limit, it pauses message writers, expires the
//! oldest messages and lets writers continue.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use hearsay_store::Database;
use hearsay_sync::{Expired, SyncEngine};

use crate::config::CleanerConfig;
use crate::error::Result;

/// Expire old messages if stored size exceeds the limit.
///
/// Writers are paused for the duration and always let through again, even
/// if expiry fails.
pub fn clean<D: Database>(engine: &SyncEngine<D>, config: &CleanerConfig) -> Result<Expired> {
    let stored = engine.stored_bytes()?;
    if stored <= config.max_stored_bytes {
        return Ok(Expired::default());
    }
    let excess = stored - config.max_stored_bytes + config.target_free_bytes;
    debug!(stored, limit = config.max_stored_bytes, excess, "storage over limit");

    engine.gate().disallow_writes();
    let expired = engine.expire_messages(excess);
    engine.gate().allow_writes();
    Ok(expired?)
}

/// A running cleaner task.
pub struct Cleaner {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Cleaner {
    /// Spawn the cleaner on the current tokio runtime.
    pub fn spawn<D: Database + 'static>(engine: Arc<SyncEngine<D>>, config: CleanerConfig) -> Self {
        let (shutdown, mut stop) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(config.interval);
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    _ = ticks.tick() => {}
                }
                // Store I/O blocks, so each pass runs off the async workers
                let pass = {
                    let engine = Arc::clone(&engine);
                    let config = config.clone();
                    tokio::task::spawn_blocking(move || clean(&engine, &config))
                };
                match pass.await {
                    Ok(Ok(expired)) if expired.count > 0 => {
                        info!(count = expired.count, bytes = expired.bytes, "cleaner freed space");
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!(error = %e, "cleaner failed"),
                    Err(e) => warn!(error = %e, "cleaner pass panicked"),
                }
            }
            debug!("cleaner stopped");
        });
        Self { shutdown, handle }
    }

    /// Stop the task and wait for it to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.handle.await {
            warn!(error = %e, "cleaner task ended abnormally");
        }
    }
}
