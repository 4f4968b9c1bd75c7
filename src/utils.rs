//! Small shared helpers

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::FabricError;

/// Tracks the remaining budget of a timed operation across its legs.
///
/// Every downstream call receives the *remaining* time, not the original
/// timeout, so a slow first leg shrinks the budget of the second.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    deadline: Instant,
}

impl Deadline {
    /// Starts a budget of `timeout` from now
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
        }
    }

    /// Time left in the budget; zero once elapsed
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Whether the budget is exhausted
    #[must_use]
    pub fn is_elapsed(&self) -> bool {
        self.remaining() == Duration::ZERO
    }
}

/// Awaits `future` within `remaining`, mapping an elapsed budget to
/// [`FabricError::OperationTimeout`]
pub async fn with_timeout<T, F>(remaining: Duration, future: F) -> Result<T, FabricError>
where
    F: Future<Output = Result<T, FabricError>>,
{
    match tokio::time::timeout(remaining, future).await {
        Ok(result) => result,
        Err(_) => Err(FabricError::OperationTimeout),
    }
}
