//! Storage seams the dispatcher works against.
//!
//! The dispatcher only reads drivers and only mutates rides through
//! [`RideStore::conditional_update`], so any backend that can express a compare-and-swap on
//! `(status, driver_id)` can stand in for the in-memory implementations.

pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::engine::matching::{Candidate, ProximityQuery};
use crate::models::driver::Driver;
use crate::models::ride::{Expected, Ride, RidePatch};

pub use memory::{InMemoryDriverRegistry, InMemoryRideStore};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("ride not found: {0}")]
    RideNotFound(Uuid),

    #[error("driver not found: {0}")]
    DriverNotFound(Uuid),

    #[error("duplicate ride id: {0}")]
    DuplicateRide(Uuid),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait DriverRegistry: Send + Sync {
    async fn get(&self, id: Uuid) -> StoreResult<Option<Driver>>;

    /// Eligible drivers for `query`, nearest first.
    async fn find_nearest(&self, query: &ProximityQuery) -> StoreResult<Vec<Candidate>>;
}

#[async_trait]
pub trait RideStore: Send + Sync {
    async fn create(&self, ride: Ride) -> StoreResult<Uuid>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<Ride>>;

    async fn list(&self) -> StoreResult<Vec<Ride>>;

    /// Applies `patch` only if the stored ride still satisfies `expected`.
    ///
    /// Returns the updated ride on success and `None` when the precondition no longer holds.
    async fn conditional_update(
        &self,
        id: Uuid,
        expected: &Expected,
        patch: RidePatch,
    ) -> StoreResult<Option<Ride>>;
}
