use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;
use validator::Validate;

use super::invalid;
use super::pickups::{caller_driver_id, can_view_pickup};
use super::routing::RouteDetail;
use crate::auth::Caller;
use crate::domain::{
    Coordinates, Driver, GpsLog, PickupRequest, Role, Route, RouteStatus, StopStatus, Vehicle, VehicleStatus,
};
use crate::error::{ApiError, Result};
use crate::storage::{InMemoryStorage, Tables};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LocationUpdate {
    #[validate(range(min = -90.0, max = 90.0))]
    pub lat: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub lng: f64,
    #[validate(range(min = 0.0, message = "speed must be a non-negative number"))]
    pub speed: Option<f64>,
    pub route_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VehiclePosition {
    pub vehicle_id: Uuid,
    pub plate_number: String,
    pub status: VehicleStatus,
    pub last_location: Option<Coordinates>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub current_route: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PickupStatusSummary {
    pub date: NaiveDate,
    pub total: usize,
    pub by_status: BTreeMap<&'static str, usize>,
    pub pickups: Vec<PickupRequest>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StopCounts {
    pub pending: usize,
    pub served: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriverDashboard {
    pub driver: Driver,
    pub vehicle: Option<Vehicle>,
    pub routes_today: Vec<RouteDetail>,
    pub assigned_pickups: Vec<PickupRequest>,
    pub stops: StopCounts,
}

fn is_today(route: &Route, today: NaiveDate) -> bool {
    route.service_date == Some(today)
}

/// The route a driver is most likely driving: today's open routes assigned
/// to them, preferring one already under way.
fn current_route_for(t: &Tables, driver: Uuid, today: NaiveDate) -> Option<Uuid> {
    let mut candidates: Vec<&Route> = t
        .routes
        .values()
        .filter(|r| r.driver == Some(driver) && is_today(r, today) && !r.status.is_terminal())
        .collect();
    candidates.sort_by_key(|r| match r.status {
        RouteStatus::InProgress => 0,
        RouteStatus::Dispatched => 1,
        _ => 2,
    });
    candidates.first().map(|r| r.id)
}

fn driver_profile<'t>(t: &'t Tables, caller: &Caller) -> Result<&'t Driver> {
    t.driver_for_user(caller.id())
        .ok_or_else(|| ApiError::NotFound("Driver profile not found".to_string()))
}

pub struct TrackingService<'a> {
    storage: &'a InMemoryStorage,
}

impl<'a> TrackingService<'a> {
    pub fn new(storage: &'a InMemoryStorage) -> Self {
        Self { storage }
    }

    /// Open routes serviced today. Drivers only see their own.
    pub fn active_routes(&self, caller: &Caller) -> Result<Vec<RouteDetail>> {
        if !caller.is_elevated() && caller.role() != Role::Driver {
            return Err(ApiError::forbidden());
        }
        let today = Utc::now().date_naive();
        self.storage.read(|t| {
            let own = caller_driver_id(t, caller);
            let mut routes: Vec<RouteDetail> = t
                .routes
                .values()
                .filter(|r| is_today(r, today) && !r.status.is_terminal())
                .filter(|r| caller.is_elevated() || (own.is_some() && r.driver == own))
                .map(|r| RouteDetail {
                    route: r.clone(),
                    stops: t.stops_for_route(r.id).into_iter().cloned().collect(),
                })
                .collect();
            routes.sort_by(|a, b| a.route.name.cmp(&b.route.name));
            Ok(routes)
        })
    }

    pub fn vehicle_status(&self, caller: &Caller) -> Result<Vec<VehiclePosition>> {
        caller.require_elevated()?;
        let today = Utc::now().date_naive();
        let mut positions: Vec<VehiclePosition> = self.storage.read(|t| {
            t.vehicles
                .values()
                .map(|v| VehiclePosition {
                    vehicle_id: v.id,
                    plate_number: v.plate_number.clone(),
                    status: v.status,
                    last_location: v.last_location,
                    last_seen_at: v.last_seen_at,
                    current_route: t
                        .routes
                        .values()
                        .find(|r| r.vehicle == Some(v.id) && is_today(r, today) && !r.status.is_terminal())
                        .map(|r| r.id),
                })
                .collect()
        });
        positions.sort_by(|a, b| a.plate_number.cmp(&b.plate_number));
        Ok(positions)
    }

    /// Today's pickups visible to the caller, with a count per status.
    pub fn pickup_status(&self, caller: &Caller) -> PickupStatusSummary {
        let today = Utc::now().date_naive();
        let mut pickups: Vec<PickupRequest> = self.storage.read(|t| {
            t.pickups
                .values()
                .filter(|p| p.scheduled_time.date_naive() == today && can_view_pickup(t, caller, p))
                .cloned()
                .collect()
        });
        pickups.sort_by(|a, b| a.scheduled_time.cmp(&b.scheduled_time));

        let mut by_status = BTreeMap::new();
        for pickup in &pickups {
            *by_status.entry(pickup.status.as_str()).or_insert(0) += 1;
        }
        PickupStatusSummary {
            date: today,
            total: pickups.len(),
            by_status,
            pickups,
        }
    }

    /// Record a position report from a driver. The log is attached to the
    /// given route when it is the driver's, otherwise to their current route.
    pub fn update_location(&self, caller: &Caller, vehicle_id: Uuid, update: LocationUpdate) -> Result<GpsLog> {
        caller.require_role(Role::Driver)?;
        update.validate()?;
        let coords = Coordinates::new(update.lat, update.lng).map_err(invalid)?;
        let now = Utc::now();

        let log = self.storage.write(|t| {
            let profile = driver_profile(t, caller)?;
            let driver = profile.id;
            if !t.vehicles.contains_key(&vehicle_id) {
                return Err(ApiError::not_found("Vehicle"));
            }
            // Drivers report for their own vehicle or the one on an open route of theirs
            let drives_it = profile.assigned_vehicle == Some(vehicle_id)
                || t.routes.values().any(|r| {
                    r.driver == Some(driver) && r.vehicle == Some(vehicle_id) && !r.status.is_terminal()
                });
            if !drives_it {
                return Err(ApiError::forbidden());
            }
            let route = match update.route_id {
                Some(id) => {
                    let route = t.routes.get(&id).ok_or_else(|| ApiError::not_found("Route"))?;
                    if route.driver != Some(driver) {
                        return Err(ApiError::forbidden());
                    }
                    Some(id)
                }
                None => current_route_for(t, driver, now.date_naive()),
            };

            let log = GpsLog {
                id: Uuid::new_v4(),
                vehicle: vehicle_id,
                route,
                driver: Some(driver),
                timestamp: now,
                latitude: coords.lat,
                longitude: coords.lng,
                speed: update.speed,
            };
            t.gps_logs.insert(log.id, log.clone());
            if let Some(vehicle) = t.vehicles.get_mut(&vehicle_id) {
                vehicle.last_location = Some(coords);
                vehicle.last_seen_at = Some(now);
            }
            Ok::<_, ApiError>(log)
        })?;
        debug!(vehicle_id = %vehicle_id, route_id = ?log.route, "Location recorded");
        Ok(log)
    }

    pub fn route_gps_logs(&self, caller: &Caller, route_id: Uuid) -> Result<Vec<GpsLog>> {
        if !caller.is_elevated() && caller.role() != Role::Driver {
            return Err(ApiError::forbidden());
        }
        self.storage.read(|t| {
            let route = t.routes.get(&route_id).ok_or_else(|| ApiError::not_found("Route"))?;
            if !caller.is_elevated() && caller_driver_id(t, caller).map_or(true, |d| route.driver != Some(d)) {
                return Err(ApiError::not_found("Route"));
            }
            let mut logs: Vec<GpsLog> = t
                .gps_logs
                .values()
                .filter(|l| l.route == Some(route_id))
                .cloned()
                .collect();
            logs.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
            Ok(logs)
        })
    }

    pub fn driver_dashboard(&self, caller: &Caller) -> Result<DriverDashboard> {
        caller.require_role(Role::Driver)?;
        let today = Utc::now().date_naive();
        self.storage.read(|t| {
            let driver = driver_profile(t, caller)?.clone();
            let vehicle = driver.assigned_vehicle.and_then(|id| t.vehicles.get(&id)).cloned();

            let mut routes_today: Vec<RouteDetail> = t
                .routes
                .values()
                .filter(|r| r.driver == Some(driver.id) && is_today(r, today))
                .map(|r| RouteDetail {
                    route: r.clone(),
                    stops: t.stops_for_route(r.id).into_iter().cloned().collect(),
                })
                .collect();
            routes_today.sort_by(|a, b| a.route.created_at.cmp(&b.route.created_at));

            let mut stops = StopCounts::default();
            for stop in routes_today.iter().flat_map(|r| r.stops.iter()) {
                match stop.status {
                    StopStatus::Pending => stops.pending += 1,
                    StopStatus::Served => stops.served += 1,
                    StopStatus::Skipped => stops.skipped += 1,
                }
            }

            let mut assigned_pickups: Vec<PickupRequest> = t
                .pickups
                .values()
                .filter(|p| p.assigned_driver == Some(driver.id) && p.is_active())
                .cloned()
                .collect();
            assigned_pickups.sort_by(|a, b| a.scheduled_time.cmp(&b.scheduled_time));

            Ok(DriverDashboard {
                driver,
                vehicle,
                routes_today,
                assigned_pickups,
                stops,
            })
        })
    }
}
