use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::Serialize;
use uuid::Uuid;

use crate::geo::haversine_km;
use crate::models::driver::{Driver, DriverStatus, GeoPoint};
use crate::store::{DriverRegistry, StoreResult};

#[derive(Debug, Clone)]
pub struct ProximityQuery {
    pub pickup: GeoPoint,
    pub vehicle_type: String,
    pub exclude: BTreeSet<Uuid>,
    /// `None` searches without a distance limit.
    pub max_radius_km: Option<f64>,
}

impl ProximityQuery {
    pub fn new(pickup: GeoPoint, vehicle_type: impl Into<String>) -> Self {
        Self {
            pickup,
            vehicle_type: vehicle_type.into(),
            exclude: BTreeSet::new(),
            max_radius_km: None,
        }
    }

    pub fn excluding(mut self, exclude: BTreeSet<Uuid>) -> Self {
        self.exclude = exclude;
        self
    }

    pub fn within_km(mut self, max_radius_km: Option<f64>) -> Self {
        self.max_radius_km = max_radius_km;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub driver: Driver,
    pub distance_km: f64,
}

pub fn is_eligible(driver: &Driver, query: &ProximityQuery) -> bool {
    driver.status == DriverStatus::Online
        && driver.location.is_some()
        && driver.vehicle_type == query.vehicle_type
        && !query.exclude.contains(&driver.id)
}

fn within_radius(distance_km: f64, query: &ProximityQuery) -> bool {
    query
        .max_radius_km
        .is_none_or(|radius| distance_km <= radius)
}

fn by_distance_then_id(a: &Candidate, b: &Candidate) -> Ordering {
    a.distance_km
        .total_cmp(&b.distance_km)
        .then_with(|| a.driver.id.cmp(&b.driver.id))
}

/// Filters `drivers` down to eligible candidates and orders them nearest first.
///
/// Equal distances fall back to ascending driver id so the same inputs always produce the
/// same order.
pub fn rank_candidates<I>(drivers: I, query: &ProximityQuery) -> Vec<Candidate>
where
    I: IntoIterator<Item = Driver>,
{
    let mut candidates: Vec<Candidate> = drivers
        .into_iter()
        .filter(|driver| is_eligible(driver, query))
        .filter_map(|driver| {
            let location = driver.location?;
            let distance_km = haversine_km(&query.pickup, &location);
            within_radius(distance_km, query).then_some(Candidate {
                driver,
                distance_km,
            })
        })
        .collect();

    candidates.sort_by(by_distance_then_id);
    candidates
}

/// The single nearest driver eligible for `query`, or `None` when every candidate is exhausted.
///
/// The registry's answer is re-checked against `query`, so a backend that only pre-filters by
/// distance still yields a correct result.
pub async fn find_nearest_eligible_driver(
    registry: &dyn DriverRegistry,
    query: &ProximityQuery,
) -> StoreResult<Option<Candidate>> {
    let candidates = registry.find_nearest(query).await?;

    Ok(candidates
        .into_iter()
        .filter(|candidate| {
            is_eligible(&candidate.driver, query) && within_radius(candidate.distance_km, query)
        })
        .min_by(by_distance_then_id))
}
