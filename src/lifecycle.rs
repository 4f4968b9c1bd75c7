//! Component lifecycle with checked state transitions
//!
//! Every agent, proxy, and client in this crate owns a [`Lifecycle`] and
//! exposes the [`Component`] surface. Open is only valid from the created
//! state; message-facing operations are banned outside the opened state; close
//! and abort are idempotent. Abort is close without waiting for in-flight
//! replies — the components themselves hold no queues, so the two differ only
//! in the state they record.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FabricError;

/// Lifecycle states a component moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Constructed but not yet opened
    Created,
    /// Open and serving requests
    Opened,
    /// Closed; all handlers unregistered
    Closed,
    /// Aborted; like closed, but without draining in-flight work
    Aborted,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Opened => "opened",
            Self::Closed => "closed",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Common open/close/abort surface for routing and messaging components
#[async_trait]
pub trait Component: Send + Sync {
    /// Transitions the component into the opened state, registering its
    /// transport handlers
    async fn open(&self) -> Result<(), FabricError>;

    /// Unregisters handlers and transitions into the closed state
    async fn close(&self) -> Result<(), FabricError>;

    /// Closes without awaiting in-flight replies
    fn abort(&self);
}

/// Atomic lifecycle-state cell shared by all components
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
}

const CREATED: u8 = 0;
const OPENED: u8 = 1;
const CLOSED: u8 = 2;
const ABORTED: u8 = 3;

fn decode(state: u8) -> LifecycleState {
    match state {
        CREATED => LifecycleState::Created,
        OPENED => LifecycleState::Opened,
        CLOSED => LifecycleState::Closed,
        _ => LifecycleState::Aborted,
    }
}

impl Lifecycle {
    /// Creates a lifecycle cell in the created state
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(CREATED),
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        decode(self.state.load(Ordering::Acquire))
    }

    /// Moves created → opened; any other starting state is an error
    pub fn transition_to_opened(&self) -> Result<(), FabricError> {
        self.state
            .compare_exchange(CREATED, OPENED, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| FabricError::InvalidState {
                state: decode(actual),
            })
    }

    /// Moves into the closed state. Closing a created or already-closed
    /// component is a no-op; closing an aborted component stays aborted.
    pub fn transition_to_closed(&self) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| match s {
                ABORTED => None,
                _ => Some(CLOSED),
            });
    }

    /// Moves into the aborted state from any state
    pub fn transition_to_aborted(&self) {
        self.state.store(ABORTED, Ordering::Release);
    }

    /// Fails with `InvalidState` unless the component is opened
    pub fn require_opened(&self) -> Result<(), FabricError> {
        let state = self.state();
        if state == LifecycleState::Opened {
            Ok(())
        } else {
            Err(FabricError::InvalidState { state })
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
