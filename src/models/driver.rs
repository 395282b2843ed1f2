use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DriverStatus {
    Offline,
    Online,
    OnTrip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub full_name: String,
    pub email: Option<String>,
    pub vehicle_type: String,
    pub vehicle_model: Option<String>,
    pub vehicle_register_number: Option<String>,
    pub status: DriverStatus,
    /// Unset until the driver reports a position.
    pub location: Option<GeoPoint>,
    pub updated_at: DateTime<Utc>,
}

/// Public driver details copied onto a ride when it is offered, for display to the passenger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverSnapshot {
    pub full_name: String,
    pub vehicle_type: String,
    pub vehicle_model: Option<String>,
    pub vehicle_register_number: Option<String>,
}

impl From<&Driver> for DriverSnapshot {
    fn from(driver: &Driver) -> Self {
        Self {
            full_name: driver.full_name.clone(),
            vehicle_type: driver.vehicle_type.clone(),
            vehicle_model: driver.vehicle_model.clone(),
            vehicle_register_number: driver.vehicle_register_number.clone(),
        }
    }
}
