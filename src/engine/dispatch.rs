//! Ride lifecycle: offer, acceptance window, reassignment, terminal states.
//!
//! Every transition is a conditional update on the ride record, guarded by the status and
//! driver the caller last observed. Two triggers racing on one ride (an accept against an
//! expiring offer, a reject against a cancellation) therefore resolve to exactly one winner;
//! the loser sees `None` from the store and backs off.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::engine::matching::{ProximityQuery, find_nearest_eligible_driver};
use crate::engine::queue::{DispatchCommand, enqueue_command};
use crate::error::AppError;
use crate::models::driver::{Driver, DriverSnapshot, DriverStatus};
use crate::models::notification::{Notification, RideEvent, Target};
use crate::models::ride::{Expected, Ride, RidePatch, RideRequest, RideStatus};
use crate::notify::{EmailMessage, EmailSender, NotificationChannel, send_best_effort};
use crate::observability::metrics::Metrics;
use crate::store::{DriverRegistry, RideStore};

pub struct Collaborators {
    pub drivers: Arc<dyn DriverRegistry>,
    pub rides: Arc<dyn RideStore>,
    pub notifier: Arc<dyn NotificationChannel>,
    pub mailer: Arc<dyn EmailSender>,
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub acceptance_window: Duration,
    pub match_radius_km: Option<f64>,
}

impl From<&Config> for DispatchSettings {
    fn from(config: &Config) -> Self {
        Self {
            acceptance_window: config.acceptance_window,
            match_radius_km: config.match_radius_km,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelRequester {
    Passenger(Uuid),
    Driver(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOutcome {
    Assigned,
    Exhausted,
    /// The ride no longer needed a driver when the command ran.
    Skipped,
    /// Another transition landed between reading the ride and writing the offer.
    LostRace,
}

impl AssignOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            AssignOutcome::Assigned => "assigned",
            AssignOutcome::Exhausted => "exhausted",
            AssignOutcome::Skipped => "skipped",
            AssignOutcome::LostRace => "lost_race",
        }
    }
}

struct ArmedOffer {
    driver_id: Uuid,
    handle: AbortHandle,
}

pub struct Dispatcher {
    drivers: Arc<dyn DriverRegistry>,
    rides: Arc<dyn RideStore>,
    notifier: Arc<dyn NotificationChannel>,
    mailer: Arc<dyn EmailSender>,
    settings: DispatchSettings,
    commands: mpsc::Sender<DispatchCommand>,
    offers: DashMap<Uuid, ArmedOffer>,
    metrics: Metrics,
}

impl Dispatcher {
    pub fn new(
        collaborators: Collaborators,
        settings: DispatchSettings,
        metrics: Metrics,
        queue_size: usize,
    ) -> (Arc<Self>, mpsc::Receiver<DispatchCommand>) {
        let (commands, command_rx) = mpsc::channel(queue_size.max(1));

        let dispatcher = Self {
            drivers: collaborators.drivers,
            rides: collaborators.rides,
            notifier: collaborators.notifier,
            mailer: collaborators.mailer,
            settings,
            commands,
            offers: DashMap::new(),
            metrics,
        };

        (Arc::new(dispatcher), command_rx)
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Number of offers with a live acceptance timer.
    pub fn armed_offers(&self) -> usize {
        self.offers.len()
    }

    pub async fn get_ride(&self, ride_id: Uuid) -> Result<Ride, AppError> {
        self.rides
            .get(ride_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("ride {ride_id} not found")))
    }

    pub async fn list_rides(&self) -> Result<Vec<Ride>, AppError> {
        let mut rides = self.rides.list().await?;
        rides.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rides)
    }

    /// Records the request and queues its first assignment.
    ///
    /// Returns as soon as the ride exists; matching happens on the dispatch engine.
    pub async fn start_dispatch(&self, request: RideRequest) -> Result<Ride, AppError> {
        let ride = Ride::new(request);
        let ride_id = self.rides.create(ride.clone()).await?;
        self.metrics.record_transition(RideStatus::Unassigned.as_str());

        info!(
            ride_id = %ride_id,
            passenger_id = %ride.passenger_id,
            vehicle_type = %ride.vehicle_type,
            "ride requested"
        );

        self.schedule_assign(ride_id).await?;
        Ok(ride)
    }

    pub async fn schedule_assign(&self, ride_id: Uuid) -> Result<(), AppError> {
        enqueue_command(
            &self.commands,
            &self.metrics,
            DispatchCommand::Assign { ride_id },
        )
        .await
    }

    pub async fn handle(&self, command: DispatchCommand) {
        match command {
            DispatchCommand::Assign { ride_id } => self.assign_and_arm(ride_id).await,
            DispatchCommand::Expire { ride_id, driver_id } => {
                self.expire_offer(ride_id, driver_id).await
            }
        }
    }

    /// Offers the ride to the nearest driver not yet tried, or settles it as
    /// `no_drivers_available`. Never fails outward; problems are logged.
    pub async fn assign_and_arm(&self, ride_id: Uuid) {
        let start = Instant::now();

        let outcome = match self.try_assign(ride_id).await {
            Ok(outcome) => outcome.as_str(),
            Err(err) => {
                error!(ride_id = %ride_id, error = %err, "assignment attempt failed");
                "error"
            }
        };

        let elapsed = start.elapsed().as_secs_f64();
        self.metrics
            .matching_latency_seconds
            .with_label_values(&[outcome])
            .observe(elapsed);
        self.metrics
            .dispatch_attempts_total
            .with_label_values(&[outcome])
            .inc();
    }

    async fn try_assign(&self, ride_id: Uuid) -> Result<AssignOutcome, AppError> {
        let ride = self.get_ride(ride_id).await?;

        if !ride.status.is_retryable() {
            debug!(
                ride_id = %ride_id,
                status = ride.status.as_str(),
                "ride no longer needs a driver"
            );
            return Ok(AssignOutcome::Skipped);
        }

        let expected = Expected::retryable(ride.driver_id);
        let query = ProximityQuery::new(ride.pickup, ride.vehicle_type.clone())
            .excluding(ride.exclusion_set())
            .within_km(self.settings.match_radius_km);

        let Some(candidate) = find_nearest_eligible_driver(self.drivers.as_ref(), &query).await?
        else {
            return self.settle_exhausted(&ride, &expected).await;
        };

        let patch = RidePatch::Assign {
            driver_id: candidate.driver.id,
            snapshot: DriverSnapshot::from(&candidate.driver),
            distance_km: candidate.distance_km,
            at: Utc::now(),
        };

        let Some(offered) = self
            .rides
            .conditional_update(ride_id, &expected, patch)
            .await?
        else {
            debug!(ride_id = %ride_id, "ride changed during matching; candidate dropped");
            return Ok(AssignOutcome::LostRace);
        };

        self.metrics.record_transition(RideStatus::Pending.as_str());
        info!(
            ride_id = %ride_id,
            driver_id = %candidate.driver.id,
            distance_km = candidate.distance_km,
            attempt = offered.attempts,
            "ride offered"
        );

        self.arm(ride_id, candidate.driver.id);
        self.notify_offer(&offered, &candidate.driver).await;

        Ok(AssignOutcome::Assigned)
    }

    async fn settle_exhausted(
        &self,
        ride: &Ride,
        expected: &Expected,
    ) -> Result<AssignOutcome, AppError> {
        let Some(settled) = self
            .rides
            .conditional_update(ride.id, expected, RidePatch::Exhaust)
            .await?
        else {
            return Ok(AssignOutcome::LostRace);
        };

        self.metrics
            .record_transition(RideStatus::NoDriversAvailable.as_str());
        warn!(
            ride_id = %settled.id,
            tried = settled.rejected_by.len(),
            "no drivers available"
        );

        let payload = json!({
            "ride_id": settled.id,
            "vehicle_type": settled.vehicle_type,
            "tried": settled.rejected_by.len(),
        });
        self.publish(Notification::durable(
            Target::Passenger(settled.passenger_id),
            RideEvent::NoDriversAvailable,
            payload.clone(),
        ))
        .await;
        self.publish(Notification::transient(
            Target::Admins,
            RideEvent::NoDriversAvailable,
            payload,
        ))
        .await;
        self.email(
            settled.passenger_email.as_deref(),
            "No Drivers Available",
            format!(
                "Sorry, no {} driver is available near your pickup point right now.",
                settled.vehicle_type
            ),
        )
        .await;

        Ok(AssignOutcome::Exhausted)
    }

    /// Acceptance-window expiry for `driver_id`'s offer on `ride_id`.
    ///
    /// Only acts if the ride is still pending with that same driver; otherwise the offer was
    /// already answered, reassigned or cancelled and this is a no-op.
    pub async fn expire_offer(&self, ride_id: Uuid, driver_id: Uuid) {
        self.disarm(ride_id, driver_id);

        let patch = RidePatch::Reject {
            driver_id,
            automatic: true,
            at: Utc::now(),
        };

        match self
            .rides
            .conditional_update(ride_id, &Expected::offer(driver_id), patch)
            .await
        {
            Ok(Some(_)) => {
                self.metrics
                    .record_transition(RideStatus::AutoRejected.as_str());
                info!(ride_id = %ride_id, driver_id = %driver_id, "offer lapsed; auto-rejected");

                self.publish(Notification::transient(
                    Target::Driver(driver_id),
                    RideEvent::RideAutoRejected,
                    json!({ "ride_id": ride_id }),
                ))
                .await;

                if let Err(err) = self.schedule_assign(ride_id).await {
                    error!(ride_id = %ride_id, error = %err, "failed to schedule reassignment");
                }
            }
            Ok(None) => {
                debug!(ride_id = %ride_id, driver_id = %driver_id, "offer already settled; expiry ignored");
            }
            Err(err) => {
                warn!(ride_id = %ride_id, error = %err, "offer expiry failed");
            }
        }
    }

    pub async fn accept_ride(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, AppError> {
        let ride = self.get_ride(ride_id).await?;
        let driver = self
            .drivers
            .get(driver_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

        if !ride.is_offered_to(driver_id) {
            return Err(not_offered(&ride, driver_id));
        }
        if driver.status != DriverStatus::Online {
            return Err(AppError::NotEligible(format!(
                "driver {driver_id} is not online"
            )));
        }

        let accepted = self
            .rides
            .conditional_update(
                ride_id,
                &Expected::offer(driver_id),
                RidePatch::Accept { at: Utc::now() },
            )
            .await?
            .ok_or_else(|| {
                AppError::Conflict(format!("ride {ride_id} was settled before acceptance"))
            })?;

        self.disarm(ride_id, driver_id);
        self.metrics.record_transition(RideStatus::Accepted.as_str());
        info!(ride_id = %ride_id, driver_id = %driver_id, "ride accepted");

        self.publish(Notification::durable(
            Target::Passenger(accepted.passenger_id),
            RideEvent::RideAccepted,
            json!({
                "ride_id": ride_id,
                "driver_id": driver_id,
                "driver": accepted.driver_info,
            }),
        ))
        .await;
        self.email(
            accepted.passenger_email.as_deref(),
            "Your Ride Accepted",
            format!(
                "Driver {} has accepted your ride request.\nVehicle: {}\nPlate: {}",
                driver.full_name,
                driver.vehicle_model.as_deref().unwrap_or("-"),
                driver.vehicle_register_number.as_deref().unwrap_or("-"),
            ),
        )
        .await;

        Ok(accepted)
    }

    /// Declines the offer and queues the next candidate search.
    pub async fn reject_ride(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, AppError> {
        let ride = self.get_ride(ride_id).await?;

        if !ride.is_offered_to(driver_id) {
            return Err(not_offered(&ride, driver_id));
        }

        let patch = RidePatch::Reject {
            driver_id,
            automatic: false,
            at: Utc::now(),
        };
        let rejected = self
            .rides
            .conditional_update(ride_id, &Expected::offer(driver_id), patch)
            .await?
            .ok_or_else(|| {
                AppError::Conflict(format!("ride {ride_id} was settled before rejection"))
            })?;

        self.disarm(ride_id, driver_id);
        self.metrics.record_transition(RideStatus::Rejected.as_str());
        info!(ride_id = %ride_id, driver_id = %driver_id, "ride rejected");

        if let Err(err) = self.schedule_assign(ride_id).await {
            error!(ride_id = %ride_id, error = %err, "failed to schedule reassignment");
        }
        Ok(rejected)
    }

    pub async fn cancel_ride(
        &self,
        ride_id: Uuid,
        requester: CancelRequester,
    ) -> Result<Ride, AppError> {
        let ride = self.get_ride(ride_id).await?;

        let is_party = match requester {
            CancelRequester::Passenger(id) => ride.passenger_id == id,
            CancelRequester::Driver(id) => {
                ride.driver_id == Some(id)
                    && matches!(ride.status, RideStatus::Pending | RideStatus::Accepted)
                    && !ride.rejected_by.contains(&id)
            }
        };
        if !is_party {
            return Err(AppError::Conflict(format!(
                "requester may not cancel ride {ride_id}"
            )));
        }
        if !ride.status.is_cancellable() {
            return Err(AppError::Conflict(format!(
                "ride {ride_id} is already {}",
                ride.status.as_str()
            )));
        }

        let cancelled = self
            .rides
            .conditional_update(
                ride_id,
                &Expected::observed(&ride),
                RidePatch::Cancel { at: Utc::now() },
            )
            .await?
            .ok_or_else(|| AppError::Conflict(format!("ride {ride_id} changed; retry")))?;

        if let Some(driver_id) = ride.driver_id {
            self.disarm(ride_id, driver_id);
        }
        self.metrics.record_transition(RideStatus::Cancelled.as_str());
        info!(ride_id = %ride_id, requester = ?requester, "ride cancelled");

        let cancelled_by = match requester {
            CancelRequester::Passenger(_) => "passenger",
            CancelRequester::Driver(_) => "driver",
        };
        let payload = json!({
            "ride_id": ride_id,
            "previous_status": ride.status,
            "cancelled_by": cancelled_by,
        });

        match requester {
            CancelRequester::Passenger(_) => {
                let engaged = matches!(ride.status, RideStatus::Pending | RideStatus::Accepted);
                if let (true, Some(driver_id)) = (engaged, ride.driver_id) {
                    self.publish(Notification::durable(
                        Target::Driver(driver_id),
                        RideEvent::RideCancelled,
                        payload.clone(),
                    ))
                    .await;
                }
            }
            CancelRequester::Driver(_) => {
                self.publish(Notification::durable(
                    Target::Passenger(ride.passenger_id),
                    RideEvent::RideCancelled,
                    payload.clone(),
                ))
                .await;
            }
        }
        self.publish(Notification::transient(
            Target::Admins,
            RideEvent::RideCancelled,
            payload,
        ))
        .await;

        Ok(cancelled)
    }

    pub async fn complete_ride(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, AppError> {
        let ride = self.get_ride(ride_id).await?;

        if ride.status != RideStatus::Accepted || ride.driver_id != Some(driver_id) {
            return Err(AppError::Conflict(format!(
                "ride {ride_id} is not an accepted ride of driver {driver_id}"
            )));
        }

        let completed = self
            .rides
            .conditional_update(
                ride_id,
                &Expected::new(vec![RideStatus::Accepted], Some(driver_id)),
                RidePatch::Complete { at: Utc::now() },
            )
            .await?
            .ok_or_else(|| AppError::Conflict(format!("ride {ride_id} changed; retry")))?;

        self.metrics.record_transition(RideStatus::Completed.as_str());
        info!(ride_id = %ride_id, driver_id = %driver_id, "ride completed");

        self.publish(Notification::durable(
            Target::Passenger(completed.passenger_id),
            RideEvent::RideCompleted,
            json!({ "ride_id": ride_id, "fare": completed.fare }),
        ))
        .await;

        Ok(completed)
    }

    fn arm(&self, ride_id: Uuid, driver_id: Uuid) {
        let commands = self.commands.clone();
        let metrics = self.metrics.clone();
        let window = self.settings.acceptance_window;

        let timer = tokio::spawn(async move {
            sleep(window).await;
            let command = DispatchCommand::Expire { ride_id, driver_id };
            if let Err(err) = enqueue_command(&commands, &metrics, command).await {
                warn!(ride_id = %ride_id, error = %err, "failed to queue offer expiry");
            }
        });

        let armed = ArmedOffer {
            driver_id,
            handle: timer.abort_handle(),
        };
        if let Some(stale) = self.offers.insert(ride_id, armed) {
            stale.handle.abort();
        }
        self.metrics.pending_offers.set(self.offers.len() as i64);
    }

    /// Cancels the acceptance timer for `driver_id`'s offer, leaving any newer offer alone.
    fn disarm(&self, ride_id: Uuid, driver_id: Uuid) {
        if let Some((_, offer)) = self
            .offers
            .remove_if(&ride_id, |_, offer| offer.driver_id == driver_id)
        {
            offer.handle.abort();
        }
        self.metrics.pending_offers.set(self.offers.len() as i64);
    }

    async fn notify_offer(&self, ride: &Ride, driver: &Driver) {
        self.publish(Notification::transient(
            Target::Driver(driver.id),
            RideEvent::RideRequest,
            json!({
                "ride_id": ride.id,
                "passenger_id": ride.passenger_id,
                "pickup": ride.pickup,
                "dropoff": ride.dropoff,
                "vehicle_type": ride.vehicle_type,
                "fare": ride.fare,
                "distance_km": ride.distance_km,
                "expires_in_secs": self.settings.acceptance_window.as_secs(),
            }),
        ))
        .await;

        self.email(
            driver.email.as_deref(),
            "New Ride Request",
            format!(
                "Hello {},\nYou have a new ride request from passenger {}.\n\
                 Pickup: {}, {}\nDrop: {}, {}\nFare: {}\n\
                 Please accept or reject it within {} seconds.",
                driver.full_name,
                ride.passenger_id,
                ride.pickup.lat,
                ride.pickup.lng,
                ride.dropoff.lat,
                ride.dropoff.lng,
                ride.fare,
                self.settings.acceptance_window.as_secs(),
            ),
        )
        .await;
    }

    async fn publish(&self, notification: Notification) {
        let target = notification.target;
        let event = notification.event;
        if let Err(err) = self.notifier.publish(notification).await {
            warn!(recipient = %target, event = ?event, error = %err, "notification failed");
        }
    }

    async fn email(&self, to: Option<&str>, subject: &str, body: String) {
        let Some(to) = to else {
            return;
        };

        let message = EmailMessage {
            to: to.to_string(),
            subject: subject.to_string(),
            body,
        };
        send_best_effort(self.mailer.as_ref(), message).await;
    }
}

fn not_offered(ride: &Ride, driver_id: Uuid) -> AppError {
    AppError::Conflict(format!(
        "ride {} is {} and not offered to driver {driver_id}",
        ride.id,
        ride.status.as_str()
    ))
}

/// Drains the dispatch queue, running each command on its own task.
pub async fn run_dispatch_engine(
    dispatcher: Arc<Dispatcher>,
    mut command_rx: mpsc::Receiver<DispatchCommand>,
) {
    info!("dispatch engine started");

    while let Some(command) = command_rx.recv().await {
        dispatcher.metrics.dispatch_commands_in_queue.dec();

        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            debug!(ride_id = %command.ride_id(), command = ?command, "dispatch command");
            dispatcher.handle(command).await;
        });
    }

    warn!("dispatch engine stopped: command channel closed");
}
