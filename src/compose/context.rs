//! Cancellation and deadlines for engine operations
//!
//! Every call the engine makes into the container runtime is wrapped by an
//! [`OpContext`], so a caller can abort a long `up` or bound it in time.

use crate::error::{CorralError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation signal plus optional deadlines for one operation
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    token: CancellationToken,
    deadline: Option<Instant>,
    call_timeout: Option<Duration>,
}

impl OpContext {
    /// Unbounded context
    pub fn new() -> Self {
        Self::default()
    }

    /// Expire the whole operation after `timeout`
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Expire the whole operation at `deadline`
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Bound each individual runtime call
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// The cancellation token
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Operation deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Context cancelled together with this one, but cancellable on its own
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
            call_timeout: self.call_timeout,
        }
    }

    /// Context that ignores this one's cancellation and deadline.
    ///
    /// Used for compensation work that must run after the operation failed.
    pub fn detached(&self) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
            call_timeout: self.call_timeout,
        }
    }

    /// Cancel this context and its children
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fail if the context is already cancelled or past its deadline
    pub fn check(&self, what: &str) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(CorralError::Cancelled(what.to_string()));
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Err(CorralError::Timeout(what.to_string()))
            }
            _ => Ok(()),
        }
    }

    fn call_deadline(&self) -> Option<Instant> {
        let per_call = self.call_timeout.map(|t| Instant::now() + t);
        match (self.deadline, per_call) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Run one runtime call under this context
    pub async fn run<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check(what)?;
        self.race(what, self.call_deadline(), fut).await?
    }

    /// Wait for a non-runtime future, such as a lock, under the operation
    /// deadline and cancellation
    pub async fn wait<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        self.check(what)?;
        self.race(what, self.deadline, fut).await
    }

    async fn race<T, F>(&self, what: &str, deadline: Option<Instant>, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        let guarded = async {
            match deadline {
                Some(at) => tokio::time::timeout_at(at, fut)
                    .await
                    .map_err(|_| CorralError::Timeout(what.to_string())),
                None => Ok(fut.await),
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(CorralError::Cancelled(what.to_string())),
            result = guarded => result,
        }
    }
}
