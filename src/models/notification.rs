use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Target {
    Driver(Uuid),
    Passenger(Uuid),
    Admins,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Driver(id) => write!(f, "driver:{id}"),
            Target::Passenger(id) => write!(f, "passenger:{id}"),
            Target::Admins => f.write_str("admins"),
        }
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw == "admins" {
            return Ok(Target::Admins);
        }

        let (kind, id) = raw
            .split_once(':')
            .ok_or_else(|| format!("invalid target {raw:?}, expected kind:id or admins"))?;
        let id = Uuid::parse_str(id).map_err(|err| format!("invalid target id: {err}"))?;

        match kind {
            "driver" => Ok(Target::Driver(id)),
            "passenger" => Ok(Target::Passenger(id)),
            other => Err(format!("unknown target kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RideEvent {
    RideRequest,
    RideAccepted,
    RideAutoRejected,
    RideCancelled,
    RideCompleted,
    NoDriversAvailable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub target: Target,
    pub event: RideEvent,
    pub payload: Value,
    /// Kept for later delivery when the target is not connected.
    pub durable: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn transient(target: Target, event: RideEvent, payload: Value) -> Self {
        Self {
            target,
            event,
            payload,
            durable: false,
            created_at: Utc::now(),
        }
    }

    pub fn durable(target: Target, event: RideEvent, payload: Value) -> Self {
        Self {
            durable: true,
            ..Self::transient(target, event, payload)
        }
    }
}
