use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::dispatch::CancelRequester;
use crate::error::AppError;
use crate::geo;
use crate::models::ride::{Ride, RideRequest};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/rides", post(request_ride).get(list_rides))
        .route("/rides/:id", get(get_ride))
        .route("/rides/:id/accept", post(accept_ride))
        .route("/rides/:id/reject", post(reject_ride))
        .route("/rides/:id/cancel", post(cancel_ride))
        .route("/rides/:id/complete", post(complete_ride))
}

#[derive(Deserialize)]
pub struct DriverActionRequest {
    pub driver_id: Uuid,
}

/// Exactly one of the two ids identifies who is cancelling.
#[derive(Deserialize)]
pub struct CancelRideRequest {
    #[serde(default)]
    pub passenger_id: Option<Uuid>,
    #[serde(default)]
    pub driver_id: Option<Uuid>,
}

impl TryFrom<CancelRideRequest> for CancelRequester {
    type Error = AppError;

    fn try_from(payload: CancelRideRequest) -> Result<Self, Self::Error> {
        match (payload.passenger_id, payload.driver_id) {
            (Some(id), None) => Ok(CancelRequester::Passenger(id)),
            (None, Some(id)) => Ok(CancelRequester::Driver(id)),
            _ => Err(AppError::BadRequest(
                "exactly one of passenger_id or driver_id is required".to_string(),
            )),
        }
    }
}

fn validate(request: &RideRequest) -> Result<(), AppError> {
    if request.vehicle_type.trim().is_empty() {
        return Err(AppError::BadRequest(
            "vehicle_type cannot be empty".to_string(),
        ));
    }

    if !request.fare.is_finite() || request.fare < 0.0 {
        return Err(AppError::BadRequest(format!(
            "fare must be a non-negative number, got {}",
            request.fare
        )));
    }

    if !geo::is_valid(&request.pickup) || !geo::is_valid(&request.dropoff) {
        return Err(AppError::BadRequest(
            "pickup and dropoff must be valid coordinates".to_string(),
        ));
    }

    Ok(())
}

async fn request_ride(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RideRequest>,
) -> Result<(StatusCode, Json<Ride>), AppError> {
    validate(&payload)?;

    let ride = state.dispatcher.start_dispatch(payload).await?;
    Ok((StatusCode::ACCEPTED, Json(ride)))
}

async fn list_rides(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Ride>>, AppError> {
    Ok(Json(state.dispatcher.list_rides().await?))
}

async fn get_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Ride>, AppError> {
    Ok(Json(state.dispatcher.get_ride(id).await?))
}

async fn accept_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<Ride>, AppError> {
    Ok(Json(
        state.dispatcher.accept_ride(id, payload.driver_id).await?,
    ))
}

async fn reject_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<Ride>, AppError> {
    Ok(Json(
        state.dispatcher.reject_ride(id, payload.driver_id).await?,
    ))
}

async fn cancel_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelRideRequest>,
) -> Result<Json<Ride>, AppError> {
    let requester = CancelRequester::try_from(payload)?;
    Ok(Json(state.dispatcher.cancel_ride(id, requester).await?))
}

async fn complete_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<Ride>, AppError> {
    Ok(Json(
        state.dispatcher.complete_ride(id, payload.driver_id).await?,
    ))
}
