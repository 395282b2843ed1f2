use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;
use uuid::Uuid;

use crate::engine::matching::{Candidate, ProximityQuery, rank_candidates};
use crate::models::driver::{Driver, DriverStatus, GeoPoint};
use crate::models::ride::{Expected, Ride, RidePatch};
use crate::store::{DriverRegistry, RideStore, StoreError, StoreResult};

#[derive(Debug, Default)]
pub struct InMemoryDriverRegistry {
    drivers: DashMap<Uuid, Driver>,
}

impl InMemoryDriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, driver: Driver) {
        self.drivers.insert(driver.id, driver);
    }

    pub fn list(&self) -> Vec<Driver> {
        self.drivers
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    pub fn set_status(&self, id: Uuid, status: DriverStatus) -> StoreResult<Driver> {
        let mut driver = self
            .drivers
            .get_mut(&id)
            .ok_or(StoreError::DriverNotFound(id))?;

        driver.status = status;
        driver.updated_at = Utc::now();

        Ok(driver.clone())
    }

    pub fn set_location(&self, id: Uuid, location: GeoPoint) -> StoreResult<Driver> {
        let mut driver = self
            .drivers
            .get_mut(&id)
            .ok_or(StoreError::DriverNotFound(id))?;

        driver.location = Some(location);
        driver.updated_at = Utc::now();

        Ok(driver.clone())
    }
}

#[async_trait]
impl DriverRegistry for InMemoryDriverRegistry {
    async fn get(&self, id: Uuid) -> StoreResult<Option<Driver>> {
        Ok(self.drivers.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_nearest(&self, query: &ProximityQuery) -> StoreResult<Vec<Candidate>> {
        let snapshot: Vec<Driver> = self
            .drivers
            .iter()
            .filter(|entry| entry.value().status == DriverStatus::Online)
            .map(|entry| entry.value().clone())
            .collect();

        Ok(rank_candidates(snapshot, query))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRideStore {
    rides: DashMap<Uuid, Ride>,
}

impl InMemoryRideStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rides.is_empty()
    }
}

#[async_trait]
impl RideStore for InMemoryRideStore {
    async fn create(&self, ride: Ride) -> StoreResult<Uuid> {
        match self.rides.entry(ride.id) {
            Entry::Occupied(_) => Err(StoreError::DuplicateRide(ride.id)),
            Entry::Vacant(slot) => {
                let id = ride.id;
                slot.insert(ride);
                Ok(id)
            }
        }
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Ride>> {
        Ok(self.rides.get(&id).map(|entry| entry.value().clone()))
    }

    async fn list(&self) -> StoreResult<Vec<Ride>> {
        Ok(self
            .rides
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn conditional_update(
        &self,
        id: Uuid,
        expected: &Expected,
        patch: RidePatch,
    ) -> StoreResult<Option<Ride>> {
        // The shard write lock is held from the check through the write.
        let mut ride = self
            .rides
            .get_mut(&id)
            .ok_or(StoreError::RideNotFound(id))?;

        if !expected.matches(&ride) {
            debug!(
                ride_id = %id,
                status = ride.status.as_str(),
                "conditional update precondition failed"
            );
            return Ok(None);
        }

        patch.apply(&mut ride);
        Ok(Some(ride.clone()))
    }
}
