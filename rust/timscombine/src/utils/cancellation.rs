use std::sync::Arc;
use std::sync::atomic::{
    AtomicBool,
    Ordering,
};
use std::time::{
    Duration,
    Instant,
};

use crate::errors::ClusteringError;

/// Shared flag used to stop in-flight spectra.
///
/// Cloning is cheap and every clone observes the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Limits for building a single spectrum, checked between insertions.
#[derive(Debug, Clone)]
pub struct GroupBudget {
    token: Option<CancellationToken>,
    started: Instant,
    timeout: Option<Duration>,
}

impl GroupBudget {
    pub fn new(token: Option<CancellationToken>, timeout: Option<Duration>) -> Self {
        Self {
            token,
            started: Instant::now(),
            timeout,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None, None)
    }

    pub fn check(&self) -> Result<(), ClusteringError> {
        if let Some(token) = &self.token {
            if token.is_cancelled() {
                return Err(ClusteringError::Cancelled);
            }
        }
        if let Some(timeout) = self.timeout {
            let elapsed = self.started.elapsed();
            if elapsed > timeout {
                return Err(ClusteringError::DeadlineExceeded { elapsed });
            }
        }
        Ok(())
    }
}
