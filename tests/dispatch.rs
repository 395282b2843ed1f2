use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ride_dispatch::config::Config;
use ride_dispatch::engine::dispatch::{
    CancelRequester, Collaborators, DispatchSettings, Dispatcher, run_dispatch_engine,
};
use ride_dispatch::engine::queue::DispatchCommand;
use ride_dispatch::error::AppError;
use ride_dispatch::models::driver::{Driver, DriverStatus, GeoPoint};
use ride_dispatch::models::notification::{Notification, RideEvent, Target};
use ride_dispatch::models::ride::{Ride, RideRequest, RideStatus};
use ride_dispatch::notify::{
    EmailMessage, EmailSender, LogMailer, NotificationChannel, NotificationHub, NotifyError,
};
use ride_dispatch::observability::metrics::Metrics;
use ride_dispatch::state::AppState;
use ride_dispatch::store::{InMemoryDriverRegistry, InMemoryRideStore, RideStore};
use tokio::sync::mpsc;
use uuid::Uuid;

const PICKUP: GeoPoint = GeoPoint {
    lat: 52.52,
    lng: 13.405,
};

fn setup(window: Duration) -> AppState {
    let config = Config {
        acceptance_window: window,
        ..Config::default()
    };
    let (state, rx) = AppState::new(&config);
    tokio::spawn(run_dispatch_engine(state.dispatcher.clone(), rx));
    state
}

fn driver(id_seed: u128, lat_offset: f64) -> Driver {
    Driver {
        id: Uuid::from_u128(id_seed),
        full_name: format!("Driver {id_seed}"),
        email: Some(format!("driver{id_seed}@example.com")),
        vehicle_type: "car".to_string(),
        vehicle_model: Some("Corolla".to_string()),
        vehicle_register_number: Some(format!("B-RD-{id_seed}")),
        status: DriverStatus::Online,
        location: Some(GeoPoint {
            lat: PICKUP.lat + lat_offset,
            lng: PICKUP.lng,
        }),
        updated_at: Utc::now(),
    }
}

fn request(passenger_seed: u128) -> RideRequest {
    RideRequest {
        passenger_id: Uuid::from_u128(passenger_seed),
        passenger_email: Some("passenger@example.com".to_string()),
        pickup: PICKUP,
        dropoff: GeoPoint {
            lat: 52.54,
            lng: 13.42,
        },
        vehicle_type: "car".to_string(),
        fare: 14.5,
    }
}

async fn wait_for<F>(state: &AppState, ride_id: Uuid, predicate: F) -> Ride
where
    F: Fn(&Ride) -> bool,
{
    for _ in 0..300 {
        let ride = state.dispatcher.get_ride(ride_id).await.unwrap();
        if predicate(&ride) {
            return ride;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let ride = state.dispatcher.get_ride(ride_id).await.unwrap();
    panic!("ride never reached the expected state: {ride:?}");
}

async fn eventually<F>(condition: F)
where
    F: Fn() -> bool,
{
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never became true");
}

fn offered_to(driver_id: Uuid) -> impl Fn(&Ride) -> bool {
    move |ride| ride.status == RideStatus::Pending && ride.driver_id == Some(driver_id)
}

fn has_status(status: RideStatus) -> impl Fn(&Ride) -> bool {
    move |ride| ride.status == status
}

struct FailingMailer;

#[async_trait]
impl EmailSender for FailingMailer {
    async fn send(&self, _message: EmailMessage) -> Result<(), NotifyError> {
        Err(NotifyError::Email("smtp relay unreachable".to_string()))
    }
}

struct UnreachableNotifier;

#[async_trait]
impl NotificationChannel for UnreachableNotifier {
    async fn publish(&self, _notification: Notification) -> Result<(), NotifyError> {
        Err(NotifyError::Unavailable("push gateway down".to_string()))
    }
}

struct Detached {
    dispatcher: Arc<Dispatcher>,
    drivers: Arc<InMemoryDriverRegistry>,
    rides: Arc<InMemoryRideStore>,
    commands: mpsc::Receiver<DispatchCommand>,
}

/// A dispatcher with no engine draining its queue, so rides stay where each call leaves them.
fn detached(notifier: Arc<dyn NotificationChannel>) -> Detached {
    let drivers = Arc::new(InMemoryDriverRegistry::new());
    let rides = Arc::new(InMemoryRideStore::new());
    let collaborators = Collaborators {
        drivers: drivers.clone(),
        rides: rides.clone(),
        notifier,
        mailer: Arc::new(LogMailer::new("dispatch@localhost")),
    };
    let (dispatcher, commands) = Dispatcher::new(
        collaborators,
        DispatchSettings::from(&Config::default()),
        Metrics::new(),
        64,
    );

    Detached {
        dispatcher,
        drivers,
        rides,
        commands,
    }
}

async fn offer_directly(detached: &Detached, passenger_seed: u128) -> Uuid {
    let ride_id = detached
        .rides
        .create(Ride::new(request(passenger_seed)))
        .await
        .unwrap();
    detached.dispatcher.assign_and_arm(ride_id).await;
    ride_id
}

#[tokio::test]
async fn rejected_ride_moves_to_next_nearest_driver() {
    let state = setup(Duration::from_secs(60));
    let near = driver(1, 0.0045);
    let far = driver(2, 0.009);
    state.drivers.insert(far.clone());
    state.drivers.insert(near.clone());

    let ride = state.dispatcher.start_dispatch(request(100)).await.unwrap();
    assert_eq!(ride.status, RideStatus::Unassigned);

    let offered = wait_for(&state, ride.id, offered_to(near.id)).await;
    assert_eq!(offered.attempts, 1);
    assert_eq!(offered.driver_info.as_ref().unwrap().full_name, "Driver 1");
    assert!(offered.distance_km.unwrap() < 0.6);

    let rejected = state.dispatcher.reject_ride(ride.id, near.id).await.unwrap();
    assert_eq!(rejected.status, RideStatus::Rejected);

    let reoffered = wait_for(&state, ride.id, offered_to(far.id)).await;
    assert_eq!(reoffered.attempts, 2);
    assert_eq!(reoffered.rejected_by, vec![near.id]);

    let accepted = state.dispatcher.accept_ride(ride.id, far.id).await.unwrap();
    assert_eq!(accepted.id, ride.id);
    assert_eq!(accepted.status, RideStatus::Accepted);
    assert_eq!(accepted.driver_id, Some(far.id));
    assert!(accepted.accepted_at.is_some());
    assert_eq!(state.dispatcher.armed_offers(), 0);
}

#[tokio::test]
async fn ride_without_drivers_settles_without_pending() {
    let state = setup(Duration::from_secs(60));
    let passenger = Uuid::from_u128(100);

    let ride = state.dispatcher.start_dispatch(request(100)).await.unwrap();
    let settled = wait_for(&state, ride.id, has_status(RideStatus::NoDriversAvailable)).await;

    assert_eq!(settled.id, ride.id);
    assert_eq!(settled.attempts, 0);
    assert!(settled.assigned_at.is_none());
    assert!(settled.driver_id.is_none());

    let hub = state.notifications.clone();
    eventually(move || {
        hub.queued(Target::Passenger(passenger))
            .iter()
            .any(|n| n.event == RideEvent::NoDriversAvailable)
    })
    .await;
}

#[tokio::test]
async fn drivers_of_other_vehicle_types_are_not_offered() {
    let state = setup(Duration::from_secs(60));
    let mut bike = driver(1, 0.001);
    bike.vehicle_type = "bike".to_string();
    state.drivers.insert(bike);

    let ride = state.dispatcher.start_dispatch(request(100)).await.unwrap();
    let settled = wait_for(&state, ride.id, has_status(RideStatus::NoDriversAvailable)).await;
    assert_eq!(settled.attempts, 0);
}

#[tokio::test]
async fn unanswered_offer_lapses_then_exhausts() {
    let state = setup(Duration::from_millis(100));
    let only = driver(1, 0.0045);
    state.drivers.insert(only.clone());

    let ride = state.dispatcher.start_dispatch(request(100)).await.unwrap();
    wait_for(&state, ride.id, offered_to(only.id)).await;

    let settled = wait_for(&state, ride.id, has_status(RideStatus::NoDriversAvailable)).await;
    assert_eq!(settled.rejected_by, vec![only.id]);
    assert_eq!(settled.attempts, 1);
    assert!(settled.rejected_at.is_some());
    assert!(settled.driver_id.is_none());
    assert_eq!(state.dispatcher.armed_offers(), 0);
}

#[tokio::test]
async fn lapsed_offer_moves_to_next_driver() {
    let state = setup(Duration::from_millis(100));
    let near = driver(1, 0.0045);
    let far = driver(2, 0.009);
    state.drivers.insert(near.clone());
    state.drivers.insert(far.clone());

    let ride = state.dispatcher.start_dispatch(request(100)).await.unwrap();
    wait_for(&state, ride.id, offered_to(near.id)).await;

    let reoffered = wait_for(&state, ride.id, offered_to(far.id)).await;
    assert_eq!(reoffered.rejected_by, vec![near.id]);

    let accepted = state.dispatcher.accept_ride(ride.id, far.id).await.unwrap();
    assert_eq!(accepted.status, RideStatus::Accepted);
}

#[tokio::test]
async fn cancelled_ride_ignores_its_pending_timeout() {
    let state = setup(Duration::from_millis(150));
    let only = driver(1, 0.0045);
    state.drivers.insert(only.clone());

    let ride = state.dispatcher.start_dispatch(request(100)).await.unwrap();
    wait_for(&state, ride.id, offered_to(only.id)).await;

    let cancelled = state
        .dispatcher
        .cancel_ride(ride.id, CancelRequester::Passenger(Uuid::from_u128(100)))
        .await
        .unwrap();
    assert_eq!(cancelled.status, RideStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());
    assert_eq!(state.dispatcher.armed_offers(), 0);

    // Stale expiry delivered anyway must not touch the ride.
    state.dispatcher.expire_offer(ride.id, only.id).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let after = state.dispatcher.get_ride(ride.id).await.unwrap();
    assert_eq!(after.status, RideStatus::Cancelled);
    assert!(after.rejected_by.is_empty());
    assert_eq!(after.attempts, 1);
}

#[tokio::test]
async fn equidistant_drivers_are_offered_in_id_order() {
    let state = setup(Duration::from_secs(60));
    state.drivers.insert(driver(2, 0.003));
    state.drivers.insert(driver(1, 0.003));

    for passenger in [100, 101] {
        let ride = state
            .dispatcher
            .start_dispatch(request(passenger))
            .await
            .unwrap();
        let offered = wait_for(&state, ride.id, has_status(RideStatus::Pending)).await;
        assert_eq!(offered.driver_id, Some(Uuid::from_u128(1)));
    }
}

#[tokio::test]
async fn rejection_chain_never_repeats_a_driver_and_terminates() {
    let state = setup(Duration::from_secs(60));
    let drivers: Vec<Driver> = (1..=4u128)
        .map(|seed| driver(seed, 0.001 * seed as f64))
        .collect();
    for d in &drivers {
        state.drivers.insert(d.clone());
    }

    let ride = state.dispatcher.start_dispatch(request(100)).await.unwrap();

    let mut seen = HashSet::new();
    let mut previous_exclusions: Vec<Uuid> = Vec::new();

    for expected in &drivers {
        let offered = wait_for(&state, ride.id, offered_to(expected.id)).await;
        assert!(seen.insert(offered.driver_id.unwrap()), "driver offered twice");
        assert_eq!(offered.rejected_by, previous_exclusions);

        let rejected = state
            .dispatcher
            .reject_ride(ride.id, expected.id)
            .await
            .unwrap();
        assert!(rejected.rejected_by.len() == previous_exclusions.len() + 1);
        assert!(rejected.rejected_by.starts_with(&previous_exclusions));
        previous_exclusions = rejected.rejected_by;
    }

    let settled = wait_for(&state, ride.id, has_status(RideStatus::NoDriversAvailable)).await;
    assert_eq!(settled.attempts as usize, drivers.len());
    assert_eq!(settled.rejected_by.len(), drivers.len());
    assert_eq!(settled.id, ride.id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn accept_and_expiry_race_has_exactly_one_winner() {
    let state = Arc::new(setup(Duration::from_secs(60)));
    let first = driver(1, 0.0045);
    let second = driver(2, 0.009);
    state.drivers.insert(first.clone());
    state.drivers.insert(second.clone());

    for passenger in 0..10u128 {
        let ride = state
            .dispatcher
            .start_dispatch(request(1_000 + passenger))
            .await
            .unwrap();
        let ride_id = ride.id;
        let first_id = first.id;
        wait_for(&state, ride_id, offered_to(first_id)).await;

        let accept_state = state.clone();
        let expire_state = state.clone();
        let accept = tokio::spawn(async move {
            accept_state
                .dispatcher
                .accept_ride(ride_id, first_id)
                .await
        });
        let expire = tokio::spawn(async move {
            expire_state.dispatcher.expire_offer(ride_id, first_id).await
        });

        let accepted = accept.await.unwrap();
        expire.await.unwrap();

        match accepted {
            Ok(ride) => {
                assert_eq!(ride.status, RideStatus::Accepted);
                tokio::time::sleep(Duration::from_millis(50)).await;
                let after = state.dispatcher.get_ride(ride.id).await.unwrap();
                assert_eq!(after.status, RideStatus::Accepted);
                assert_eq!(after.driver_id, Some(first_id));
                assert!(after.rejected_by.is_empty());
            }
            Err(err) => {
                assert!(matches!(err, AppError::Conflict(_)), "unexpected error: {err}");
                let after = wait_for(&state, ride_id, offered_to(second.id)).await;
                assert_eq!(after.rejected_by, vec![first_id]);
                assert!(after.accepted_at.is_none());
                state
                    .dispatcher
                    .cancel_ride(ride_id, CancelRequester::Passenger(after.passenger_id))
                    .await
                    .unwrap();
            }
        }
    }
}

#[tokio::test]
async fn settled_rides_are_never_reassigned() {
    let state = setup(Duration::from_millis(100));
    let first = driver(1, 0.0045);
    let second = driver(2, 0.009);
    state.drivers.insert(first.clone());
    state.drivers.insert(second.clone());

    let ride = state.dispatcher.start_dispatch(request(100)).await.unwrap();
    wait_for(&state, ride.id, offered_to(first.id)).await;
    state.dispatcher.accept_ride(ride.id, first.id).await.unwrap();

    state.dispatcher.schedule_assign(ride.id).await.unwrap();
    state.dispatcher.expire_offer(ride.id, first.id).await;
    tokio::time::sleep(Duration::from_millis(250)).await;

    let after = state.dispatcher.get_ride(ride.id).await.unwrap();
    assert_eq!(after.status, RideStatus::Accepted);
    assert_eq!(after.driver_id, Some(first.id));
    assert_eq!(after.attempts, 1);
}

#[tokio::test]
async fn accept_preconditions_map_to_error_kinds() {
    let state = setup(Duration::from_secs(60));
    let first = driver(1, 0.0045);
    let second = driver(2, 0.009);
    state.drivers.insert(first.clone());
    state.drivers.insert(second.clone());

    let missing = state
        .dispatcher
        .accept_ride(Uuid::new_v4(), first.id)
        .await
        .unwrap_err();
    assert!(matches!(missing, AppError::NotFound(_)));

    let ride = state.dispatcher.start_dispatch(request(100)).await.unwrap();
    wait_for(&state, ride.id, offered_to(first.id)).await;

    let unknown_driver = state
        .dispatcher
        .accept_ride(ride.id, Uuid::from_u128(99))
        .await
        .unwrap_err();
    assert!(matches!(unknown_driver, AppError::NotFound(_)));

    let not_offered = state
        .dispatcher
        .accept_ride(ride.id, second.id)
        .await
        .unwrap_err();
    assert!(matches!(not_offered, AppError::Conflict(_)));

    state
        .drivers
        .set_status(first.id, DriverStatus::Offline)
        .unwrap();
    let offline = state
        .dispatcher
        .accept_ride(ride.id, first.id)
        .await
        .unwrap_err();
    assert!(matches!(offline, AppError::NotEligible(_)));

    let stale_reject = state
        .dispatcher
        .reject_ride(ride.id, second.id)
        .await
        .unwrap_err();
    assert!(matches!(stale_reject, AppError::Conflict(_)));

    let still = state.dispatcher.get_ride(ride.id).await.unwrap();
    assert!(still.is_offered_to(first.id));
}

#[tokio::test]
async fn cancellation_rules() {
    let state = setup(Duration::from_secs(60));
    let first = driver(1, 0.0045);
    state.drivers.insert(first.clone());

    let ride = state.dispatcher.start_dispatch(request(100)).await.unwrap();
    wait_for(&state, ride.id, offered_to(first.id)).await;

    let stranger = state
        .dispatcher
        .cancel_ride(ride.id, CancelRequester::Passenger(Uuid::from_u128(555)))
        .await
        .unwrap_err();
    assert!(matches!(stranger, AppError::Conflict(_)));

    let cancelled = state
        .dispatcher
        .cancel_ride(ride.id, CancelRequester::Driver(first.id))
        .await
        .unwrap();
    assert_eq!(cancelled.status, RideStatus::Cancelled);

    let again = state
        .dispatcher
        .cancel_ride(ride.id, CancelRequester::Passenger(Uuid::from_u128(100)))
        .await
        .unwrap_err();
    assert!(matches!(again, AppError::Conflict(_)));

    let hub = state.notifications.clone();
    eventually(move || {
        hub.queued(Target::Passenger(Uuid::from_u128(100)))
            .iter()
            .any(|n| n.event == RideEvent::RideCancelled)
    })
    .await;
}

#[tokio::test]
async fn exhausted_ride_can_still_be_cancelled_by_passenger() {
    let state = setup(Duration::from_secs(60));

    let ride = state.dispatcher.start_dispatch(request(100)).await.unwrap();
    wait_for(&state, ride.id, has_status(RideStatus::NoDriversAvailable)).await;

    let cancelled = state
        .dispatcher
        .cancel_ride(ride.id, CancelRequester::Passenger(Uuid::from_u128(100)))
        .await
        .unwrap();
    assert_eq!(cancelled.status, RideStatus::Cancelled);
}

#[tokio::test]
async fn accepted_ride_completes_and_notifies_passenger() {
    let state = setup(Duration::from_secs(60));
    let first = driver(1, 0.0045);
    state.drivers.insert(first.clone());
    let passenger = Uuid::from_u128(100);

    let ride = state.dispatcher.start_dispatch(request(100)).await.unwrap();
    wait_for(&state, ride.id, offered_to(first.id)).await;

    let early = state
        .dispatcher
        .complete_ride(ride.id, first.id)
        .await
        .unwrap_err();
    assert!(matches!(early, AppError::Conflict(_)));

    state.dispatcher.accept_ride(ride.id, first.id).await.unwrap();
    let completed = state
        .dispatcher
        .complete_ride(ride.id, first.id)
        .await
        .unwrap();
    assert_eq!(completed.status, RideStatus::Completed);
    assert!(completed.completed_at.is_some());

    let events: Vec<RideEvent> = state
        .notifications
        .queued(Target::Passenger(passenger))
        .into_iter()
        .map(|n| n.event)
        .collect();
    assert_eq!(
        events,
        vec![RideEvent::RideAccepted, RideEvent::RideCompleted]
    );
}

#[tokio::test]
async fn email_failures_do_not_block_dispatch() {
    let config = Config::default();
    let (state, rx) = AppState::with_mailer(&config, Arc::new(FailingMailer));
    tokio::spawn(run_dispatch_engine(state.dispatcher.clone(), rx));

    let first = driver(1, 0.0045);
    state.drivers.insert(first.clone());

    let ride = state.dispatcher.start_dispatch(request(100)).await.unwrap();
    wait_for(&state, ride.id, offered_to(first.id)).await;

    let accepted = state.dispatcher.accept_ride(ride.id, first.id).await.unwrap();
    assert_eq!(accepted.status, RideStatus::Accepted);
}

#[tokio::test]
async fn drivers_outside_the_search_radius_are_ignored() {
    let state = setup(Duration::from_secs(60));
    // Roughly 11 km north of the pickup.
    state.drivers.insert(driver(1, 0.1));

    let ride = state.dispatcher.start_dispatch(request(100)).await.unwrap();
    let settled = wait_for(&state, ride.id, has_status(RideStatus::NoDriversAvailable)).await;
    assert_eq!(settled.attempts, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reject_and_expiry_race_records_one_rejection() {
    let state = Arc::new(setup(Duration::from_secs(60)));
    let first = driver(1, 0.0045);
    let second = driver(2, 0.009);
    state.drivers.insert(first.clone());
    state.drivers.insert(second.clone());
    let first_id = first.id;
    let second_id = second.id;
    let rounds = 10u128;

    for passenger in 0..rounds {
        let passenger_id = Uuid::from_u128(2_000 + passenger);
        let ride = state
            .dispatcher
            .start_dispatch(request(2_000 + passenger))
            .await
            .unwrap();
        let ride_id = ride.id;
        wait_for(&state, ride_id, offered_to(first_id)).await;

        let reject_state = state.clone();
        let expire_state = state.clone();
        let reject = tokio::spawn(async move {
            reject_state
                .dispatcher
                .reject_ride(ride_id, first_id)
                .await
        });
        let expire = tokio::spawn(async move {
            expire_state.dispatcher.expire_offer(ride_id, first_id).await
        });

        let rejected = reject.await.unwrap();
        expire.await.unwrap();

        match rejected {
            Ok(ride) => assert_eq!(ride.status, RideStatus::Rejected),
            Err(err) => assert!(matches!(err, AppError::Conflict(_)), "unexpected error: {err}"),
        }

        let reoffered = wait_for(&state, ride_id, offered_to(second_id)).await;
        assert_eq!(reoffered.rejected_by, vec![first_id]);
        assert_eq!(reoffered.attempts, 2);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let after = state.dispatcher.get_ride(ride_id).await.unwrap();
        assert!(after.is_offered_to(second_id));
        assert_eq!(after.attempts, 2);

        state
            .dispatcher
            .cancel_ride(ride_id, CancelRequester::Passenger(passenger_id))
            .await
            .unwrap();
    }

    let manual = state
        .metrics
        .ride_transitions_total
        .with_label_values(&["rejected"])
        .get();
    let lapsed = state
        .metrics
        .ride_transitions_total
        .with_label_values(&["auto-rejected"])
        .get();
    assert_eq!(manual + lapsed, rounds as u64);
}

#[tokio::test]
async fn driver_who_declined_cannot_cancel() {
    let detached = detached(Arc::new(NotificationHub::new(16, 8)));
    let first = driver(1, 0.0045);
    detached.drivers.insert(first.clone());

    let ride_id = offer_directly(&detached, 100).await;
    detached
        .dispatcher
        .reject_ride(ride_id, first.id)
        .await
        .unwrap();

    let parked = detached.dispatcher.get_ride(ride_id).await.unwrap();
    assert_eq!(parked.status, RideStatus::Rejected);
    assert_eq!(parked.driver_id, Some(first.id));

    let declined = detached
        .dispatcher
        .cancel_ride(ride_id, CancelRequester::Driver(first.id))
        .await
        .unwrap_err();
    assert!(matches!(declined, AppError::Conflict(_)));

    let lapsed_id = offer_directly(&detached, 101).await;
    detached.dispatcher.expire_offer(lapsed_id, first.id).await;
    let lapsed = detached
        .dispatcher
        .cancel_ride(lapsed_id, CancelRequester::Driver(first.id))
        .await
        .unwrap_err();
    assert!(matches!(lapsed, AppError::Conflict(_)));

    let untouched = detached.dispatcher.get_ride(ride_id).await.unwrap();
    assert_eq!(untouched.status, RideStatus::Rejected);

    let by_passenger = detached
        .dispatcher
        .cancel_ride(ride_id, CancelRequester::Passenger(Uuid::from_u128(100)))
        .await
        .unwrap();
    assert_eq!(by_passenger.status, RideStatus::Cancelled);
}

#[tokio::test]
async fn rejection_is_kept_when_reassignment_cannot_be_queued() {
    let Detached {
        dispatcher,
        drivers,
        rides,
        commands,
    } = detached(Arc::new(NotificationHub::new(16, 8)));
    let first = driver(1, 0.0045);
    drivers.insert(first.clone());

    let ride_id = rides.create(Ride::new(request(100))).await.unwrap();
    dispatcher.assign_and_arm(ride_id).await;
    drop(commands);

    let rejected = dispatcher.reject_ride(ride_id, first.id).await.unwrap();
    assert_eq!(rejected.status, RideStatus::Rejected);
    assert_eq!(rejected.rejected_by, vec![first.id]);
    assert_eq!(dispatcher.armed_offers(), 0);
}

#[tokio::test]
async fn notifier_outage_does_not_undo_transitions() {
    let detached = detached(Arc::new(UnreachableNotifier));
    let first = driver(1, 0.0045);
    detached.drivers.insert(first.clone());

    let ride_id = offer_directly(&detached, 100).await;
    let offered = detached.dispatcher.get_ride(ride_id).await.unwrap();
    assert!(offered.is_offered_to(first.id));

    let accepted = detached
        .dispatcher
        .accept_ride(ride_id, first.id)
        .await
        .unwrap();
    assert_eq!(accepted.status, RideStatus::Accepted);

    let completed = detached
        .dispatcher
        .complete_ride(ride_id, first.id)
        .await
        .unwrap();
    assert_eq!(completed.status, RideStatus::Completed);
    assert!(completed.completed_at.is_some());
}
