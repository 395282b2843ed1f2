use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::Config;
use crate::engine::dispatch::{Collaborators, DispatchSettings, Dispatcher};
use crate::engine::queue::DispatchCommand;
use crate::notify::{EmailSender, LogMailer, NotificationHub};
use crate::observability::metrics::Metrics;
use crate::store::{InMemoryDriverRegistry, InMemoryRideStore};

pub struct AppState {
    pub drivers: Arc<InMemoryDriverRegistry>,
    pub rides: Arc<InMemoryRideStore>,
    pub notifications: Arc<NotificationHub>,
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: &Config) -> (Self, mpsc::Receiver<DispatchCommand>) {
        let mailer = Arc::new(LogMailer::new(config.email_from.clone()));
        Self::with_mailer(config, mailer)
    }

    pub fn with_mailer(
        config: &Config,
        mailer: Arc<dyn EmailSender>,
    ) -> (Self, mpsc::Receiver<DispatchCommand>) {
        let drivers = Arc::new(InMemoryDriverRegistry::new());
        let rides = Arc::new(InMemoryRideStore::new());
        let notifications = Arc::new(NotificationHub::new(
            config.event_buffer_size,
            config.outbox_capacity,
        ));
        let metrics = Metrics::new();

        let collaborators = Collaborators {
            drivers: drivers.clone(),
            rides: rides.clone(),
            notifier: notifications.clone(),
            mailer,
        };
        let (dispatcher, command_rx) = Dispatcher::new(
            collaborators,
            DispatchSettings::from(config),
            metrics.clone(),
            config.dispatch_queue_size,
        );

        (
            Self {
                drivers,
                rides,
                notifications,
                dispatcher,
                metrics,
            },
            command_rx,
        )
    }
}
