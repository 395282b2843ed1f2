use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::notification::{Notification, Target};
use crate::notify::{NotificationChannel, NotifyError};

/// Fans notifications out to connected WebSocket clients.
///
/// Events for targets with no open connection are dropped unless marked durable, in which
/// case they wait in a bounded per-target outbox (oldest evicted first) until the target
/// connects.
#[derive(Debug)]
pub struct NotificationHub {
    events_tx: broadcast::Sender<Notification>,
    connections: DashMap<Target, usize>,
    outbox: DashMap<Target, VecDeque<Notification>>,
    outbox_capacity: usize,
}

impl NotificationHub {
    pub fn new(event_buffer_size: usize, outbox_capacity: usize) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(event_buffer_size.max(1));

        Self {
            events_tx,
            connections: DashMap::new(),
            outbox: DashMap::new(),
            outbox_capacity,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.events_tx.subscribe()
    }

    /// Registers a connection for `target` and hands back anything waiting in its outbox.
    ///
    /// Subscribe before connecting so nothing published in between is missed.
    pub fn connect(&self, target: Target) -> Vec<Notification> {
        *self.connections.entry(target).or_insert(0) += 1;

        self.outbox
            .remove(&target)
            .map(|(_, queued)| queued.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn disconnect(&self, target: Target) {
        if let Some(mut count) = self.connections.get_mut(&target) {
            *count = count.saturating_sub(1);
        }
        self.connections.remove_if(&target, |_, count| *count == 0);
    }

    pub fn is_connected(&self, target: Target) -> bool {
        self.connections
            .get(&target)
            .is_some_and(|count| *count > 0)
    }

    pub fn queued(&self, target: Target) -> Vec<Notification> {
        self.outbox
            .get(&target)
            .map(|queued| queued.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn enqueue(&self, notification: Notification) {
        if self.outbox_capacity == 0 {
            return;
        }

        let mut queued = self.outbox.entry(notification.target).or_default();
        while queued.len() >= self.outbox_capacity {
            queued.pop_front();
        }
        queued.push_back(notification);
    }
}

#[async_trait]
impl NotificationChannel for NotificationHub {
    async fn publish(&self, notification: Notification) -> Result<(), NotifyError> {
        let target = notification.target;

        if self.is_connected(target) {
            match self.events_tx.send(notification) {
                Ok(_) => return Ok(()),
                Err(broadcast::error::SendError(notification)) => {
                    debug!(recipient = %target, "no live subscribers; treating target as offline");
                    if notification.durable {
                        self.enqueue(notification);
                    }
                    return Ok(());
                }
            }
        }

        if notification.durable {
            debug!(recipient = %target, event = ?notification.event, "target offline; queued");
            self.enqueue(notification);
        } else {
            debug!(recipient = %target, event = ?notification.event, "target offline; dropped");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::NotificationHub;
    use crate::models::notification::{Notification, RideEvent, Target};
    use crate::notify::NotificationChannel;

    fn passenger() -> Target {
        Target::Passenger(Uuid::from_u128(42))
    }

    #[tokio::test]
    async fn transient_events_for_offline_targets_are_dropped() {
        let hub = NotificationHub::new(16, 8);
        hub.publish(Notification::transient(
            Target::Driver(Uuid::from_u128(1)),
            RideEvent::RideRequest,
            json!({}),
        ))
        .await
        .unwrap();

        assert!(hub.queued(Target::Driver(Uuid::from_u128(1))).is_empty());
    }

    #[tokio::test]
    async fn durable_events_wait_for_connect() {
        let hub = NotificationHub::new(16, 8);
        hub.publish(Notification::durable(
            passenger(),
            RideEvent::RideAccepted,
            json!({ "ride_id": Uuid::from_u128(5) }),
        ))
        .await
        .unwrap();

        assert_eq!(hub.queued(passenger()).len(), 1);

        let backlog = hub.connect(passenger());
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].event, RideEvent::RideAccepted);
        assert!(hub.queued(passenger()).is_empty());
    }

    #[tokio::test]
    async fn outbox_evicts_oldest_past_capacity() {
        let hub = NotificationHub::new(16, 2);
        for seq in 0..3 {
            hub.publish(Notification::durable(
                passenger(),
                RideEvent::RideCancelled,
                json!({ "seq": seq }),
            ))
            .await
            .unwrap();
        }

        let queued = hub.queued(passenger());
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[0].payload["seq"], 1);
        assert_eq!(queued[1].payload["seq"], 2);
    }

    #[tokio::test]
    async fn connected_targets_receive_live_events() {
        let hub = NotificationHub::new(16, 8);
        let mut rx = hub.subscribe();
        hub.connect(passenger());
        assert!(hub.is_connected(passenger()));

        hub.publish(Notification::durable(
            passenger(),
            RideEvent::RideCompleted,
            json!({}),
        ))
        .await
        .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.target, passenger());
        assert!(hub.queued(passenger()).is_empty());

        hub.disconnect(passenger());
        assert!(!hub.is_connected(passenger()));
    }
}
