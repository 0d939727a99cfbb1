use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Position report sent by a driver's device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpsLog {
    pub id: Uuid,
    pub vehicle: Uuid,
    pub route: Option<Uuid>,
    pub driver: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: Option<f64>,
}
