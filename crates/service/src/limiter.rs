//! Connection limiting
//!
//! A permit is taken before a connection is accepted and released when the
//! connection is done, so at most `limit` connections are ever accepted at
//! once. Excess clients wait in the listen backlog.

use k6x_errors::{Error, ServiceError};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone)]
pub struct ConnectionLimiter {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl ConnectionLimiter {
    /// Create a limiter; a zero limit is raised to one
    #[must_use]
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Connections that could be accepted right now
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a free connection slot
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying semaphore has been closed.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, Error> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| {
                ServiceError::Protocol {
                    message: "connection limiter closed".to_string(),
                }
                .into()
            })
    }
}
