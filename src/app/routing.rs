use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::invalid;
use super::notifications::NotificationService;
use super::pickups::{caller_driver_id, check_assignment, notify_status_change};
use crate::auth::Caller;
use crate::domain::routing::plan_stop_order;
use crate::domain::{
    parse_choice, PickupRequest, RequestStatus, Role, Route, RouteStatus, RouteStop, StopStatus,
};
use crate::error::{ApiError, Result};
use crate::metrics;
use crate::storage::{InMemoryStorage, Tables};

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct RouteInput {
    #[validate(length(max = 200))]
    pub name: Option<String>,
    pub service_date: Option<NaiveDate>,
    pub zone_id: Option<Uuid>,
    pub driver_id: Option<Uuid>,
    pub vehicle_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct RoutePatch {
    #[validate(length(max = 200))]
    pub name: Option<String>,
    pub service_date: Option<NaiveDate>,
    pub zone_id: Option<Uuid>,
    pub driver_id: Option<Uuid>,
    pub vehicle_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct FromRequestsInput {
    #[validate(length(min = 1, message = "request_ids must contain at least one id."))]
    pub request_ids: Vec<Uuid>,
    #[serde(flatten)]
    #[validate(nested)]
    pub route: RouteInput,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteDetail {
    #[serde(flatten)]
    pub route: Route,
    pub stops: Vec<RouteStop>,
}

fn detail(t: &Tables, route: &Route) -> RouteDetail {
    RouteDetail {
        route: route.clone(),
        stops: t.stops_for_route(route.id).into_iter().cloned().collect(),
    }
}

/// Elevated roles see every route, drivers their own; citizens none.
fn can_view_route(t: &Tables, caller: &Caller, route: &Route) -> bool {
    caller.is_elevated() || caller_driver_id(t, caller).map_or(false, |d| route.driver == Some(d))
}

fn require_route_reader(caller: &Caller) -> Result<()> {
    if caller.is_elevated() || caller.role() == Role::Driver {
        Ok(())
    } else {
        Err(ApiError::forbidden())
    }
}

fn visible_route<'t>(t: &'t Tables, caller: &Caller, id: Uuid) -> Result<&'t Route> {
    t.routes
        .get(&id)
        .filter(|r| can_view_route(t, caller, r))
        .ok_or_else(|| ApiError::not_found("Route"))
}

fn check_references(t: &Tables, zone: Option<Uuid>, driver: Option<Uuid>, vehicle: Option<Uuid>) -> Result<()> {
    if let Some(id) = zone {
        t.zones.get(&id).ok_or_else(|| ApiError::not_found("Zone"))?;
    }
    if let Some(id) = driver {
        t.drivers.get(&id).ok_or_else(|| ApiError::not_found("Driver"))?;
    }
    if let Some(id) = vehicle {
        t.vehicles.get(&id).ok_or_else(|| ApiError::not_found("Vehicle"))?;
    }
    Ok(())
}

fn new_route(t: &Tables, input: RouteInput) -> Route {
    let name = input
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| format!("Route {}", t.routes.len() + 1));
    Route {
        id: Uuid::new_v4(),
        name,
        service_date: Some(input.service_date.unwrap_or_else(|| Utc::now().date_naive())),
        zone: input.zone_id,
        driver: input.driver_id,
        vehicle: input.vehicle_id,
        status: RouteStatus::Planned,
        total_distance_km: None,
        created_at: Utc::now(),
    }
}

/// Hand the route's driver and vehicle to a request that has none, under
/// the same rules as a direct assignment.
fn fill_from_route(t: &mut Tables, pickup_id: Uuid, route: &Route) -> Result<()> {
    let Some(pickup) = t.pickups.get(&pickup_id) else {
        return Ok(());
    };
    let driver = route.driver.filter(|_| pickup.assigned_driver.is_none());
    let vehicle = route.vehicle.filter(|_| pickup.assigned_vehicle.is_none());
    if driver.is_none() && vehicle.is_none() {
        return Ok(());
    }
    check_assignment(t, pickup, driver, vehicle)?;
    if let Some(pickup) = t.pickups.get_mut(&pickup_id) {
        if driver.is_some() {
            pickup.assigned_driver = driver;
        }
        if vehicle.is_some() {
            pickup.assigned_vehicle = vehicle;
        }
    }
    Ok(())
}

/// Walk a request forward to `completed` from wherever it currently is,
/// validating every step on a copy. The caller stores the result.
fn complete_request(pickup: &PickupRequest) -> std::result::Result<PickupRequest, String> {
    let mut updated = pickup.clone();
    if updated.status == RequestStatus::Completed {
        return Ok(updated);
    }
    let now = Utc::now();
    while updated.status != RequestStatus::Completed {
        let next = match updated.status {
            RequestStatus::Requested => RequestStatus::Scheduled,
            RequestStatus::Scheduled => RequestStatus::InProgress,
            RequestStatus::InProgress => RequestStatus::Completed,
            closed => return Err(format!("cannot complete a {closed} request")),
        };
        updated.check_transition(next)?;
        updated.set_status(next, now);
    }
    Ok(updated)
}

/// Stops can only be worked while both they and their route are open.
fn open_stop(route: &Route, stop: &RouteStop) -> Result<()> {
    if route.status.is_terminal() {
        return Err(ApiError::bad_request(format!(
            "Stops on a {:?} route can no longer be changed.",
            route.status
        )));
    }
    if stop.status != StopStatus::Pending {
        return Err(ApiError::bad_request(format!("Stop is already {:?}.", stop.status)));
    }
    Ok(())
}

pub struct RoutingService<'a> {
    storage: &'a InMemoryStorage,
    notifications: NotificationService<'a>,
}

impl<'a> RoutingService<'a> {
    pub fn new(storage: &'a InMemoryStorage, notifications: NotificationService<'a>) -> Self {
        Self { storage, notifications }
    }

    pub fn list_routes(&self, caller: &Caller) -> Result<Vec<Route>> {
        require_route_reader(caller)?;
        let mut routes: Vec<Route> = self.storage.read(|t| {
            t.routes
                .values()
                .filter(|r| can_view_route(t, caller, r))
                .cloned()
                .collect()
        });
        routes.sort_by(|a, b| (b.service_date, b.created_at).cmp(&(a.service_date, a.created_at)));
        Ok(routes)
    }

    pub fn get_route(&self, caller: &Caller, id: Uuid) -> Result<RouteDetail> {
        require_route_reader(caller)?;
        self.storage.read(|t| visible_route(t, caller, id).map(|r| detail(t, r)))
    }

    pub fn create_route(&self, caller: &Caller, input: RouteInput) -> Result<Route> {
        caller.require_elevated()?;
        input.validate()?;
        let route = self.storage.write(|t| {
            check_references(t, input.zone_id, input.driver_id, input.vehicle_id)?;
            let route = new_route(t, input);
            t.routes.insert(route.id, route.clone());
            Ok::<_, ApiError>(route)
        })?;
        info!(route_id = %route.id, "Created route {}", route.name);
        Ok(route)
    }

    pub fn update_route(&self, caller: &Caller, id: Uuid, patch: RoutePatch) -> Result<Route> {
        caller.require_elevated()?;
        patch.validate()?;
        self.storage.write(|t| {
            check_references(t, patch.zone_id, patch.driver_id, patch.vehicle_id)?;
            let route = t.routes.get_mut(&id).ok_or_else(|| ApiError::not_found("Route"))?;
            if let Some(name) = patch.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) {
                route.name = name;
            }
            if patch.service_date.is_some() {
                route.service_date = patch.service_date;
            }
            if patch.zone_id.is_some() {
                route.zone = patch.zone_id;
            }
            if patch.driver_id.is_some() {
                route.driver = patch.driver_id;
            }
            if patch.vehicle_id.is_some() {
                route.vehicle = patch.vehicle_id;
            }
            Ok(route.clone())
        })
    }

    /// Deleting a route removes its stops; requests stay as they are.
    pub fn delete_route(&self, caller: &Caller, id: Uuid) -> Result<()> {
        caller.require_elevated()?;
        self.storage.write(|t| {
            if t.routes.remove(&id).is_none() {
                return Err(ApiError::not_found("Route"));
            }
            t.route_stops.retain(|_, s| s.route != id);
            for log in t.gps_logs.values_mut().filter(|l| l.route == Some(id)) {
                log.route = None;
            }
            Ok(())
        })
    }

    pub fn route_stops(&self, caller: &Caller, id: Uuid) -> Result<Vec<RouteStop>> {
        require_route_reader(caller)?;
        self.storage.read(|t| {
            visible_route(t, caller, id)?;
            Ok(t.stops_for_route(id).into_iter().cloned().collect())
        })
    }

    /// Build a route with one stop per usable request, in input order.
    /// Unknown and closed requests are skipped; stops are numbered 1..N
    /// without gaps. Requests still `requested` become `scheduled`, and the
    /// route's driver and vehicle fill in missing assignments. A fill that
    /// breaks an assignment rule (for example two requests at the same time
    /// for one driver) rejects the whole route.
    pub fn create_from_requests(&self, caller: &Caller, input: FromRequestsInput) -> Result<RouteDetail> {
        caller.require_elevated()?;
        input.validate()?;

        let (detail, skipped) = self.storage.write(|t| {
            check_references(t, input.route.zone_id, input.route.driver_id, input.route.vehicle_id)?;

            let mut seen = Vec::with_capacity(input.request_ids.len());
            for id in &input.request_ids {
                let usable = t.pickups.get(id).map_or(false, |p| p.is_active());
                if usable && !seen.contains(id) {
                    seen.push(*id);
                }
            }
            let skipped = input.request_ids.len() - seen.len();

            let route = new_route(t, input.route);
            let now = Utc::now();
            let mut stops = Vec::with_capacity(seen.len());
            for (index, pickup_id) in seen.iter().enumerate() {
                fill_from_route(t, *pickup_id, &route)?;
                let Some(pickup) = t.pickups.get_mut(pickup_id) else {
                    continue;
                };
                if pickup.status == RequestStatus::Requested {
                    pickup.set_status(RequestStatus::Scheduled, now);
                }
                stops.push(RouteStop {
                    id: Uuid::new_v4(),
                    route: route.id,
                    pickup: Some(*pickup_id),
                    sequence: (index + 1) as u32,
                    eta: Some(pickup.scheduled_time),
                    arrival_time: None,
                    departure_time: None,
                    status: StopStatus::Pending,
                });
            }

            t.routes.insert(route.id, route.clone());
            for stop in &stops {
                t.route_stops.insert(stop.id, stop.clone());
            }
            Ok::<_, ApiError>((RouteDetail { route, stops }, skipped))
        })?;

        metrics::route_built(detail.stops.len());
        info!(
            route_id = %detail.route.id,
            stops = detail.stops.len(),
            skipped,
            "Built route from requests"
        );
        Ok(detail)
    }

    /// Reorder stops by nearest neighbour over address coordinates and
    /// renumber them 1..N.
    pub fn optimize(&self, caller: &Caller, id: Uuid) -> Result<RouteDetail> {
        caller.require_elevated()?;
        let detail = self.storage.write(|t| {
            let route = t.routes.get(&id).ok_or_else(|| ApiError::not_found("Route"))?;
            if route.status.is_terminal() {
                return Err(ApiError::bad_request("A finished route cannot be optimized."));
            }

            let located: Vec<_> = t
                .stops_for_route(id)
                .into_iter()
                .map(|stop| {
                    let coords = stop
                        .pickup
                        .and_then(|p| t.pickups.get(&p))
                        .and_then(|p| t.addresses.get(&p.address))
                        .and_then(|a| a.coordinates());
                    (stop.id, coords)
                })
                .collect();
            let plan = plan_stop_order(&located);

            for (index, stop_id) in plan.order.iter().enumerate() {
                if let Some(stop) = t.route_stops.get_mut(stop_id) {
                    stop.sequence = (index + 1) as u32;
                }
            }
            let route = t.routes.get_mut(&id).ok_or_else(|| ApiError::not_found("Route"))?;
            route.total_distance_km = Some(plan.total_distance_km);
            let route = route.clone();
            Ok(detail(t, &route))
        })?;

        info!(
            route_id = %id,
            distance_km = detail.route.total_distance_km.unwrap_or_default(),
            "Route optimized"
        );
        Ok(detail)
    }

    /// Elevated roles may make any valid change; the route's own driver may
    /// move it forward but not cancel it.
    pub fn change_route_status(&self, caller: &Caller, id: Uuid, status: &str) -> Result<Route> {
        require_route_reader(caller)?;
        let next: RouteStatus = parse_choice(status)
            .ok_or_else(|| ApiError::bad_request(format!("\"{status}\" is not a valid route status.")))?;
        let route = self.storage.write(|t| {
            let current = visible_route(t, caller, id)?;
            if !caller.is_elevated() && next == RouteStatus::Cancelled {
                return Err(ApiError::forbidden());
            }
            if !current.status.can_transition_to(next) {
                return Err(ApiError::bad_request(format!(
                    "Cannot change route status from {:?} to {:?}.",
                    current.status, next
                )));
            }
            let route = t.routes.get_mut(&id).ok_or_else(|| ApiError::not_found("Route"))?;
            route.status = next;
            Ok(route.clone())
        })?;
        info!(route_id = %id, status = ?next, "Route status changed");
        Ok(route)
    }

    pub fn list_stops(&self, caller: &Caller) -> Result<Vec<RouteStop>> {
        require_route_reader(caller)?;
        let mut stops: Vec<RouteStop> = self.storage.read(|t| {
            t.route_stops
                .values()
                .filter(|s| t.routes.get(&s.route).map_or(false, |r| can_view_route(t, caller, r)))
                .cloned()
                .collect()
        });
        stops.sort_by(|a, b| (a.route, a.sequence).cmp(&(b.route, b.sequence)));
        Ok(stops)
    }

    pub fn get_stop(&self, caller: &Caller, id: Uuid) -> Result<RouteStop> {
        require_route_reader(caller)?;
        self.storage.read(|t| {
            t.route_stops
                .get(&id)
                .filter(|s| t.routes.get(&s.route).map_or(false, |r| can_view_route(t, caller, r)))
                .cloned()
                .ok_or_else(|| ApiError::not_found("Route stop"))
        })
    }

    /// Serve a stop: the stop becomes `SERVED` and its request is walked
    /// forward to `completed`, all under one write.
    pub async fn mark_stop_completed(&self, caller: &Caller, id: Uuid) -> Result<RouteStop> {
        require_route_reader(caller)?;
        let (stop, completed) = self.storage.write(|t| {
            let stop = t.route_stops.get(&id).ok_or_else(|| ApiError::not_found("Route stop"))?;
            let route = visible_route(t, caller, stop.route).map_err(|_| ApiError::not_found("Route stop"))?;
            open_stop(route, stop)?;
            let (route, pickup_id) = (route.clone(), stop.pickup);

            let previous = pickup_id.and_then(|p| t.pickups.get(&p)).map(|p| p.status);
            if let Some(pickup_id) = pickup_id {
                // Starting work needs a driver; the route's driver fills the gap
                fill_from_route(t, pickup_id, &Route { vehicle: None, ..route })?;
            }
            let completed = match pickup_id.and_then(|p| t.pickups.get(&p)) {
                Some(pickup) => Some(complete_request(pickup).map_err(invalid)?),
                None => None,
            };

            let now = Utc::now();
            let changed = completed.as_ref().map_or(false, |p| previous != Some(p.status));
            if let Some(pickup) = &completed {
                t.pickups.insert(pickup.id, pickup.clone());
            }
            let stop = t.route_stops.get_mut(&id).ok_or_else(|| ApiError::not_found("Route stop"))?;
            stop.status = StopStatus::Served;
            stop.arrival_time.get_or_insert(now);
            stop.departure_time = Some(now);
            Ok::<_, ApiError>((stop.clone(), completed.filter(|_| changed)))
        })?;

        info!(stop_id = %id, route_id = %stop.route, "Stop served");
        if let Some(pickup) = completed {
            metrics::pickup_status_changed(RequestStatus::Completed.as_str());
            if pickup.requester != caller.id() {
                notify_status_change(&self.notifications, &pickup).await;
            }
        }
        Ok(stop)
    }

    /// Skip a stop. The request itself is left unchanged so it can be
    /// routed again.
    pub fn mark_stop_skipped(&self, caller: &Caller, id: Uuid) -> Result<RouteStop> {
        require_route_reader(caller)?;
        let stop = self.storage.write(|t| {
            let stop = t.route_stops.get(&id).ok_or_else(|| ApiError::not_found("Route stop"))?;
            let route = visible_route(t, caller, stop.route).map_err(|_| ApiError::not_found("Route stop"))?;
            open_stop(route, stop)?;
            let stop = t.route_stops.get_mut(&id).ok_or_else(|| ApiError::not_found("Route stop"))?;
            stop.status = StopStatus::Skipped;
            stop.departure_time = Some(Utc::now());
            Ok::<_, ApiError>(stop.clone())
        })?;
        info!(stop_id = %id, route_id = %stop.route, "Stop skipped");
        Ok(stop)
    }
}
