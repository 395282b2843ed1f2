use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::AppError;
use crate::observability::metrics::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchCommand {
    /// Find and offer the ride to the next eligible driver.
    Assign { ride_id: Uuid },
    /// The acceptance window for `driver_id` on `ride_id` has elapsed.
    Expire { ride_id: Uuid, driver_id: Uuid },
}

impl DispatchCommand {
    pub fn ride_id(&self) -> Uuid {
        match self {
            DispatchCommand::Assign { ride_id } | DispatchCommand::Expire { ride_id, .. } => {
                *ride_id
            }
        }
    }
}

pub async fn enqueue_command(
    commands: &mpsc::Sender<DispatchCommand>,
    metrics: &Metrics,
    command: DispatchCommand,
) -> Result<(), AppError> {
    metrics.dispatch_commands_in_queue.inc();

    commands.send(command).await.map_err(|err| {
        metrics.dispatch_commands_in_queue.dec();
        AppError::Internal(format!("dispatch queue send failed: {err}"))
    })
}
