//! Persistence for every entity of the service.
//!
//! All tables live in one [`Tables`] value behind a single lock, so a
//! closure passed to [`InMemoryStorage::write`] sees and mutates a consistent
//! state and multi-record changes are applied as a unit. When a snapshot file
//! is configured the tables are written to it after each successful write.

mod in_memory;
mod snapshot;

pub use in_memory::InMemoryStorage;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::*;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Tables {
    pub users: HashMap<Uuid, User>,
    /// Revoked refresh-token ids and when the token would have expired.
    pub revoked_tokens: HashMap<Uuid, DateTime<Utc>>,
    pub addresses: HashMap<Uuid, Address>,
    pub zones: HashMap<Uuid, Zone>,
    pub vehicles: HashMap<Uuid, Vehicle>,
    pub drivers: HashMap<Uuid, Driver>,
    pub waste_types: HashMap<Uuid, WasteType>,
    pub pickups: HashMap<Uuid, PickupRequest>,
    pub recurrence_schedules: HashMap<Uuid, RecurrenceSchedule>,
    pub issue_reports: HashMap<Uuid, IssueReport>,
    pub routes: HashMap<Uuid, Route>,
    pub route_stops: HashMap<Uuid, RouteStop>,
    pub gps_logs: HashMap<Uuid, GpsLog>,
    pub notifications: HashMap<Uuid, Notification>,
    pub invoices: HashMap<Uuid, Invoice>,
    pub payments: HashMap<Uuid, Payment>,
}

impl Tables {
    pub fn user_by_username(&self, username: &str) -> Option<&User> {
        self.users
            .values()
            .find(|u| u.username.eq_ignore_ascii_case(username))
    }

    pub fn user_by_email(&self, email: &str) -> Option<&User> {
        self.users.values().find(|u| u.email.eq_ignore_ascii_case(email))
    }

    pub fn driver_for_user(&self, user_id: Uuid) -> Option<&Driver> {
        self.drivers.values().find(|d| d.user == user_id)
    }

    /// Address owned by `user` with the same first line and city.
    pub fn find_address(&self, user: Uuid, line1: &str, city: &str) -> Option<&Address> {
        self.addresses.values().find(|a| a.matches(user, line1, city))
    }

    /// Stops of a route ordered by sequence.
    pub fn stops_for_route(&self, route_id: Uuid) -> Vec<&RouteStop> {
        let mut stops: Vec<&RouteStop> = self
            .route_stops
            .values()
            .filter(|s| s.route == route_id)
            .collect();
        stops.sort_by_key(|s| s.sequence);
        stops
    }

    pub fn is_token_revoked(&self, jti: Uuid) -> bool {
        self.revoked_tokens.contains_key(&jti)
    }

    /// Record a revoked token and drop entries whose tokens have expired anyway.
    pub fn revoke_token(&mut self, jti: Uuid, expires_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.revoked_tokens.retain(|_, exp| *exp > now);
        self.revoked_tokens.insert(jti, expires_at);
    }
}
