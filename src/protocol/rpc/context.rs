//! Call context: the deadline and cancellation signal that bound one logical
//! operation, including every round trip it makes.
//!
//! There is no implicit timeout anywhere in the client. A caller that wants
//! one attaches a deadline here; a caller that wants to stop a long tree walk
//! cancels the token. Both are observed between round trips and while waiting
//! on the transport.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{NfsError, NfsResult};

/// Represents the execution context of one client call.
///
/// Cloning is cheap and clones share the cancellation token, so a context can
/// be handed to concurrent sub-tasks of the same operation.
#[derive(Clone, Debug, Default)]
pub struct Context {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl Context {
    /// A context with no deadline and a fresh cancellation token.
    pub fn new() -> Context {
        Context::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Context {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Context {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Context {
        self.cancel = token;
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fails if the call was cancelled or its deadline has passed.
    pub fn check(&self) -> NfsResult<()> {
        if self.cancel.is_cancelled() {
            return Err(NfsError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(NfsError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Drives `fut` until it completes, the token is cancelled or the
    /// deadline passes, whichever comes first.
    pub async fn run<T, F>(&self, fut: F) -> NfsResult<T>
    where
        F: Future<Output = NfsResult<T>>,
    {
        self.check()?;
        let guarded = async {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(NfsError::Cancelled),
                res = fut => res,
            }
        };
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, guarded)
                .await
                .unwrap_or(Err(NfsError::DeadlineExceeded)),
            None => guarded.await,
        }
    }
}
