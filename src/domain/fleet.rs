use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleStatus {
    Available,
    InService,
    Maintenance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: Uuid,
    pub plate_number: String,
    pub model: String,
    pub capacity_kg: Option<u32>,
    pub status: VehicleStatus,
    pub current_zone: Option<Uuid>,
    pub last_location: Option<super::Coordinates>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Vehicle {
    /// Vehicles in service or available count as part of the active fleet.
    pub fn is_active(&self) -> bool {
        self.status != VehicleStatus::Maintenance
    }

    pub fn can_carry(&self, weight_kg: Option<f64>) -> bool {
        match (self.capacity_kg, weight_kg) {
            (Some(capacity), Some(weight)) => weight <= f64::from(capacity),
            _ => true,
        }
    }
}

/// Driver profile bound to exactly one `DRIVER` account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub user: Uuid,
    pub phone: String,
    pub license_number: String,
    pub assigned_vehicle: Option<Uuid>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Plate numbers are compared case-insensitively and without spaces.
pub fn normalize_plate(plate: &str) -> String {
    plate
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}
