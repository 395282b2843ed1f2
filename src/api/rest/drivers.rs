use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::geo;
use crate::models::driver::{Driver, DriverStatus, GeoPoint};
use crate::state::AppState;
use crate::store::DriverRegistry;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(create_driver).get(list_drivers))
        .route("/drivers/:id", get(get_driver))
        .route("/drivers/:id/status", patch(update_driver_status))
        .route("/drivers/:id/location", patch(update_driver_location))
}

#[derive(Deserialize)]
pub struct CreateDriverRequest {
    pub full_name: String,
    #[serde(default)]
    pub email: Option<String>,
    pub vehicle_type: String,
    #[serde(default)]
    pub vehicle_model: Option<String>,
    #[serde(default)]
    pub vehicle_register_number: Option<String>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub status: Option<DriverStatus>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: DriverStatus,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

fn check_location(location: &GeoPoint) -> Result<(), AppError> {
    if geo::is_valid(location) {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!(
            "location out of range: {}, {}",
            location.lat, location.lng
        )))
    }
}

async fn create_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateDriverRequest>,
) -> Result<(StatusCode, Json<Driver>), AppError> {
    if payload.full_name.trim().is_empty() {
        return Err(AppError::BadRequest("full_name cannot be empty".to_string()));
    }

    if payload.vehicle_type.trim().is_empty() {
        return Err(AppError::BadRequest(
            "vehicle_type cannot be empty".to_string(),
        ));
    }

    if let Some(location) = &payload.location {
        check_location(location)?;
    }

    let driver = Driver {
        id: Uuid::new_v4(),
        full_name: payload.full_name,
        email: payload.email,
        vehicle_type: payload.vehicle_type,
        vehicle_model: payload.vehicle_model,
        vehicle_register_number: payload.vehicle_register_number,
        status: payload.status.unwrap_or(DriverStatus::Offline),
        location: payload.location,
        updated_at: Utc::now(),
    };

    state.drivers.insert(driver.clone());
    Ok((StatusCode::CREATED, Json(driver)))
}

async fn list_drivers(State(state): State<Arc<AppState>>) -> Json<Vec<Driver>> {
    Json(state.drivers.list())
}

async fn get_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Driver>, AppError> {
    let driver = state
        .drivers
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;

    Ok(Json(driver))
}

async fn update_driver_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(state.drivers.set_status(id, payload.status)?))
}

async fn update_driver_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<Driver>, AppError> {
    check_location(&payload.location)?;
    Ok(Json(state.drivers.set_location(id, payload.location)?))
}
