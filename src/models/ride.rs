use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::driver::{DriverSnapshot, GeoPoint};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RideStatus {
    #[serde(rename = "unassigned")]
    Unassigned,
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "accepted")]
    Accepted,
    #[serde(rename = "rejected")]
    Rejected,
    #[serde(rename = "auto-rejected")]
    AutoRejected,
    #[serde(rename = "cancelled")]
    Cancelled,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "no_drivers_available")]
    NoDriversAvailable,
}

impl RideStatus {
    /// States from which a new candidate may be assigned.
    pub const RETRYABLE: [RideStatus; 3] = [
        RideStatus::Unassigned,
        RideStatus::Rejected,
        RideStatus::AutoRejected,
    ];

    pub fn is_retryable(self) -> bool {
        Self::RETRYABLE.contains(&self)
    }

    pub fn is_cancellable(self) -> bool {
        !matches!(self, RideStatus::Cancelled | RideStatus::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RideStatus::Unassigned => "unassigned",
            RideStatus::Pending => "pending",
            RideStatus::Accepted => "accepted",
            RideStatus::Rejected => "rejected",
            RideStatus::AutoRejected => "auto-rejected",
            RideStatus::Cancelled => "cancelled",
            RideStatus::Completed => "completed",
            RideStatus::NoDriversAvailable => "no_drivers_available",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ride {
    pub id: Uuid,
    pub passenger_id: Uuid,
    pub passenger_email: Option<String>,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub vehicle_type: String,
    pub fare: f64,
    pub driver_id: Option<Uuid>,
    pub status: RideStatus,
    /// Drivers who rejected or let the offer lapse, in the order they did so.
    pub rejected_by: Vec<Uuid>,
    pub driver_info: Option<DriverSnapshot>,
    pub distance_km: Option<f64>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    /// When the current candidate was offered the ride; moves forward on every reassignment.
    pub assigned_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    /// When the most recent rejection or lapse happened.
    pub rejected_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Ride {
    pub fn new(request: RideRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            passenger_id: request.passenger_id,
            passenger_email: request.passenger_email,
            pickup: request.pickup,
            dropoff: request.dropoff,
            vehicle_type: request.vehicle_type,
            fare: request.fare,
            driver_id: None,
            status: RideStatus::Unassigned,
            rejected_by: Vec::new(),
            driver_info: None,
            distance_km: None,
            attempts: 0,
            created_at: Utc::now(),
            assigned_at: None,
            accepted_at: None,
            rejected_at: None,
            cancelled_at: None,
            completed_at: None,
        }
    }

    pub fn exclusion_set(&self) -> BTreeSet<Uuid> {
        self.rejected_by.iter().copied().collect()
    }

    pub fn is_offered_to(&self, driver_id: Uuid) -> bool {
        self.status == RideStatus::Pending && self.driver_id == Some(driver_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideRequest {
    pub passenger_id: Uuid,
    #[serde(default)]
    pub passenger_email: Option<String>,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub vehicle_type: String,
    pub fare: f64,
}

/// Precondition for a conditional ride update: the stored status must be one of `statuses`
/// and the stored driver must equal `driver_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Expected {
    pub statuses: Vec<RideStatus>,
    pub driver_id: Option<Uuid>,
}

impl Expected {
    pub fn new(statuses: impl Into<Vec<RideStatus>>, driver_id: Option<Uuid>) -> Self {
        Self {
            statuses: statuses.into(),
            driver_id,
        }
    }

    /// The ride is currently offered to `driver_id` and awaiting an answer.
    pub fn offer(driver_id: Uuid) -> Self {
        Self::new(vec![RideStatus::Pending], Some(driver_id))
    }

    /// The ride is waiting for a (new) candidate and still points at `driver_id`.
    pub fn retryable(driver_id: Option<Uuid>) -> Self {
        Self::new(RideStatus::RETRYABLE.to_vec(), driver_id)
    }

    /// Exactly the state that was observed on `ride`.
    pub fn observed(ride: &Ride) -> Self {
        Self::new(vec![ride.status], ride.driver_id)
    }

    pub fn matches(&self, ride: &Ride) -> bool {
        self.statuses.contains(&ride.status) && self.driver_id == ride.driver_id
    }
}

#[derive(Debug, Clone)]
pub enum RidePatch {
    Assign {
        driver_id: Uuid,
        snapshot: DriverSnapshot,
        distance_km: f64,
        at: DateTime<Utc>,
    },
    Accept {
        at: DateTime<Utc>,
    },
    Reject {
        driver_id: Uuid,
        automatic: bool,
        at: DateTime<Utc>,
    },
    Exhaust,
    Cancel {
        at: DateTime<Utc>,
    },
    Complete {
        at: DateTime<Utc>,
    },
}

impl RidePatch {
    pub fn apply(self, ride: &mut Ride) {
        match self {
            RidePatch::Assign {
                driver_id,
                snapshot,
                distance_km,
                at,
            } => {
                ride.driver_id = Some(driver_id);
                ride.driver_info = Some(snapshot);
                ride.distance_km = Some(distance_km);
                ride.status = RideStatus::Pending;
                ride.assigned_at = Some(at);
                ride.attempts = ride.attempts.saturating_add(1);
            }
            RidePatch::Accept { at } => {
                ride.status = RideStatus::Accepted;
                ride.accepted_at = Some(at);
            }
            RidePatch::Reject {
                driver_id,
                automatic,
                at,
            } => {
                if !ride.rejected_by.contains(&driver_id) {
                    ride.rejected_by.push(driver_id);
                }
                ride.status = if automatic {
                    RideStatus::AutoRejected
                } else {
                    RideStatus::Rejected
                };
                ride.rejected_at = Some(at);
            }
            RidePatch::Exhaust => {
                ride.status = RideStatus::NoDriversAvailable;
                ride.driver_id = None;
                ride.driver_info = None;
                ride.distance_km = None;
            }
            RidePatch::Cancel { at } => {
                ride.status = RideStatus::Cancelled;
                ride.cancelled_at = Some(at);
            }
            RidePatch::Complete { at } => {
                ride.status = RideStatus::Completed;
                ride.completed_at = Some(at);
            }
        }
    }
}
