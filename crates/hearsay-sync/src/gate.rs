//! Write gate.
//!
//! Everything that stores a new message first waits for permission to
//! write. Maintenance pauses writers with [`WriteGate::disallow_writes`]
//! while it frees space; reads and in-flight transactions are unaffected.
//! The gate is a permission check taken before any lock, never held.

use tokio::sync::watch;

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Open,
    Paused,
    Closed,
}

/// Throttles message writers.
#[derive(Debug)]
pub struct WriteGate {
    state: watch::Sender<GateState>,
}

impl WriteGate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(GateState::Open);
        Self { state }
    }

    /// Wait until writes are allowed.
    ///
    /// Returns [`SyncError::Closed`] once the gate is closed. Dropping the
    /// future cancels the wait.
    pub async fn wait_for_permission_to_write(&self) -> Result<()> {
        let mut rx = self.state.subscribe();
        let state = *rx
            .wait_for(|s| *s != GateState::Paused)
            .await
            .map_err(|_| SyncError::Closed)?;
        match state {
            GateState::Closed => Err(SyncError::Closed),
            _ => Ok(()),
        }
    }

    /// Pause writers. No effect once closed.
    pub fn disallow_writes(&self) {
        self.state.send_if_modified(|s| {
            if *s == GateState::Open {
                *s = GateState::Paused;
                true
            } else {
                false
            }
        });
    }

    /// Let paused writers through. No effect once closed.
    pub fn allow_writes(&self) {
        self.state.send_if_modified(|s| {
            if *s == GateState::Paused {
                *s = GateState::Open;
                true
            } else {
                false
            }
        });
    }

    /// Close for shutdown, waking every waiter with an error.
    pub fn close(&self) {
        self.state.send_replace(GateState::Closed);
    }

    pub fn is_writable(&self) -> bool {
        *self.state.borrow() == GateState::Open
    }

    pub fn is_closed(&self) -> bool {
        *self.state.borrow() == GateState::Closed
    }
}

impl Default for WriteGate {
    fn default() -> Self {
        Self::new()
    }
}
