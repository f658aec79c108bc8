//! Bounded-wait race between an async operation and a deadline.
//!
//! Each call to [`BoundedWait::race`] owns its own timer, so races on one
//! instance may overlap freely. The timer is dropped the moment the race
//! settles, whichever side wins. A late result from an operation that lost
//! to the deadline is discarded.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout as tokio_timeout;

#[derive(Debug, Error)]
pub enum RaceError {
    #[error("{operation} timed out after {}ms", elapsed.as_millis())]
    TimedOut {
        operation: String,
        elapsed: Duration,
    },
    /// The operation finished in time but produced nothing. Counted as a
    /// timeout: an absent value is never a valid outcome.
    #[error("{operation} produced no value")]
    NoValue { operation: String },
    #[error("{operation} failed: {source}")]
    Operation {
        operation: String,
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl RaceError {
    /// True for the timeout class (`TimedOut` and `NoValue`).
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. } | Self::NoValue { .. })
    }

    #[must_use]
    pub fn operation(&self) -> &str {
        match self {
            Self::TimedOut { operation, .. }
            | Self::NoValue { operation }
            | Self::Operation { operation, .. } => operation,
        }
    }
}

/// Keeps the armed-timer count honest even when a race future is dropped
/// before it settles.
struct ArmedTimer<'a>(&'a AtomicUsize);

impl<'a> ArmedTimer<'a> {
    fn arm(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for ArmedTimer<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug, Clone)]
pub struct BoundedWait {
    timeout: Duration,
    armed: Arc<AtomicUsize>,
}

impl BoundedWait {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            armed: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn from_millis(timeout_ms: u64) -> Self {
        Self::new(Duration::from_millis(timeout_ms))
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Timers currently pending across all in-flight races on this instance.
    #[must_use]
    pub fn armed_timers(&self) -> usize {
        self.armed.load(Ordering::Acquire)
    }

    /// Race `operation` against the deadline. `name` identifies the
    /// operation in the error.
    pub async fn race<T, F>(&self, name: &str, operation: F) -> Result<T, RaceError>
    where
        F: Future<Output = anyhow::Result<Option<T>>>,
    {
        let outcome = {
            let _timer = ArmedTimer::arm(&self.armed);
            tokio_timeout(self.timeout, operation).await
        };

        match outcome {
            Ok(Ok(Some(value))) => Ok(value),
            Ok(Ok(None)) => Err(RaceError::NoValue {
                operation: name.to_string(),
            }),
            Ok(Err(err)) => Err(RaceError::Operation {
                operation: name.to_string(),
                source: err.into(),
            }),
            Err(_) => Err(RaceError::TimedOut {
                operation: name.to_string(),
                elapsed: self.timeout,
            }),
        }
    }
}
