//! Admission Controller: bounds how many callbacks execute at once

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::error::{Error, Result};

/// Counting permit pool sized to `max_concurrent_tasks`
///
/// Permits are RAII values: the only way to give one back is to drop (or
/// [`release`](AdmissionPermit::release)) a permit that was handed out, so
/// the number of outstanding permits can never exceed the capacity.
#[derive(Clone, Debug)]
pub struct AdmissionController {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// Proof of admission, held for the duration of one callback execution
#[derive(Debug)]
#[must_use = "dropping the permit releases the admission slot"]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionPermit {
    /// Give the slot back
    pub fn release(self) {}
}

impl AdmissionController {
    /// Create a pool with `capacity` permits
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Take a permit if one is free, without waiting
    ///
    /// Returns `Ok(None)` when every permit is in use and
    /// [`Error::ShuttingDown`] once the pool has been closed.
    pub fn try_acquire(&self) -> Result<Option<AdmissionPermit>> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Ok(Some(AdmissionPermit { _permit: permit })),
            Err(TryAcquireError::NoPermits) => Ok(None),
            Err(TryAcquireError::Closed) => Err(Error::ShuttingDown),
        }
    }

    /// Wait until a permit is free
    pub async fn acquire(&self) -> Result<AdmissionPermit> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map(|permit| AdmissionPermit { _permit: permit })
            .map_err(|_| Error::ShuttingDown)
    }

    /// Configured maximum concurrency
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently free
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Permits currently held
    pub fn in_use(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }

    /// Stop handing out permits; waiters and later callers get `ShuttingDown`
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}
