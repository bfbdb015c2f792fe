//! The hearsay node: one sync engine over one store, plus the storage
//! cleaner that keeps the store under its size limit.

use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::info;

use hearsay_store::{Database, MemoryDatabase, SqliteDatabase};
use hearsay_sync::{EventListener, NoopListener, SyncEngine};

use crate::cleaner::{clean, Cleaner};
use crate::config::HearsayConfig;
use crate::error::{HearsayError, Result};

/// A hearsay node.
///
/// All sync operations live on the [`SyncEngine`] returned by
/// [`engine`](Self::engine). The node owns the engine's lifecycle: it runs
/// the cleaner while started and closes the write gate on
/// [`close`](Self::close).
pub struct Hearsay<D: Database + 'static> {
    engine: Arc<SyncEngine<D>>,
    config: HearsayConfig,
    cleaner: Mutex<Option<Cleaner>>,
}

impl Hearsay<SqliteDatabase> {
    /// Open (or create) a node backed by an SQLite file.
    pub fn open(path: impl AsRef<Path>, config: HearsayConfig) -> Result<Self> {
        let db = SqliteDatabase::open(path)?;
        Ok(Self::new(db, config, Arc::new(NoopListener)))
    }
}

impl Hearsay<MemoryDatabase> {
    /// A node that keeps everything in memory.
    pub fn in_memory(config: HearsayConfig) -> Self {
        Self::new(MemoryDatabase::new(), config, Arc::new(NoopListener))
    }
}

impl<D: Database + 'static> Hearsay<D> {
    /// Create a node over a store, reporting events to `events`.
    pub fn new(db: D, config: HearsayConfig, events: Arc<dyn EventListener>) -> Self {
        let engine = SyncEngine::new(db, config.sync.clone()).with_listener(events);
        Self {
            engine: Arc::new(engine),
            config,
            cleaner: Mutex::new(None),
        }
    }

    /// Create a node around an engine built by the caller.
    pub fn with_engine(engine: SyncEngine<D>, config: HearsayConfig) -> Self {
        Self {
            engine: Arc::new(engine),
            config,
            cleaner: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &Arc<SyncEngine<D>> {
        &self.engine
    }

    pub fn config(&self) -> &HearsayConfig {
        &self.config
    }

    /// Start the storage cleaner. Must be called from within a tokio
    /// runtime. Starting twice has no effect.
    pub fn start(&self) -> Result<()> {
        if self.engine.gate().is_closed() {
            return Err(HearsayError::Closed);
        }
        let mut cleaner = self.cleaner.lock().unwrap_or_else(|p| p.into_inner());
        if cleaner.is_none() {
            *cleaner = Some(Cleaner::spawn(
                Arc::clone(&self.engine),
                self.config.cleaner.clone(),
            ));
            info!(
                interval_ms = self.config.cleaner.interval.as_millis() as u64,
                max_stored_bytes = self.config.cleaner.max_stored_bytes,
                "started"
            );
        }
        Ok(())
    }

    /// Run one cleaning pass now. Returns the number of messages expired.
    pub fn clean_now(&self) -> Result<usize> {
        Ok(clean(&self.engine, &self.config.cleaner)?.count)
    }

    /// Stop the cleaner and close the write gate. Writers waiting on the
    /// gate fail with [`SyncError::Closed`](hearsay_sync::SyncError::Closed).
    pub async fn close(&self) {
        let cleaner = self
            .cleaner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(cleaner) = cleaner {
            cleaner.stop().await;
        }
        self.engine.gate().close();
        info!("closed");
    }
}
