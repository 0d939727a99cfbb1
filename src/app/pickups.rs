use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use validator::{Validate, ValidationError};

use super::locations::AddressInput;
use super::notifications::NotificationService;
use super::{invalid, rule};
use crate::auth::Caller;
use crate::constants::MAX_ESTIMATED_WEIGHT_KG;
use crate::domain::request::validate_time_window;
use crate::domain::{parse_choice, NotificationType, PickupRequest, RequestStatus, Role, VehicleStatus};
use crate::error::{ApiError, Result};
use crate::metrics;
use crate::storage::{InMemoryStorage, Tables};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PickupFilter {
    pub status: Option<String>,
    pub date: Option<NaiveDate>,
}

/// Submission payload. Any requester the client sends is ignored; the
/// request always belongs to the caller.
#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "pickup_window"))]
pub struct PickupInput {
    pub address_id: Option<Uuid>,
    #[validate(nested)]
    pub address: Option<AddressInput>,
    pub waste_type_id: Option<Uuid>,
    pub scheduled_time: DateTime<Utc>,
    pub time_window_start: Option<NaiveTime>,
    pub time_window_end: Option<NaiveTime>,
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub description: String,
    #[validate(range(min = 0.0, max = MAX_ESTIMATED_WEIGHT_KG))]
    pub estimated_weight_kg: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct PickupPatch {
    pub address_id: Option<Uuid>,
    pub waste_type_id: Option<Uuid>,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub time_window_start: Option<NaiveTime>,
    pub time_window_end: Option<NaiveTime>,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    #[validate(range(min = 0.0, max = MAX_ESTIMATED_WEIGHT_KG))]
    pub estimated_weight_kg: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[validate(schema(function = "assignment_target"))]
pub struct AssignInput {
    pub driver_id: Option<Uuid>,
    pub vehicle_id: Option<Uuid>,
}

fn pickup_window(input: &PickupInput) -> std::result::Result<(), ValidationError> {
    validate_time_window(input.time_window_start, input.time_window_end)
}

fn assignment_target(input: &AssignInput) -> std::result::Result<(), ValidationError> {
    if input.driver_id.is_none() && input.vehicle_id.is_none() {
        return Err(rule("assignment", "Provide driver_id and/or vehicle_id."));
    }
    Ok(())
}

/// Driver profile id of the caller, when the caller is a driver.
pub(crate) fn caller_driver_id(t: &Tables, caller: &Caller) -> Option<Uuid> {
    if caller.role() != Role::Driver {
        return None;
    }
    t.driver_for_user(caller.id()).map(|d| d.id)
}

/// Requesters see their own requests, drivers also see the ones assigned to
/// them, elevated roles see everything.
pub(crate) fn can_view_pickup(t: &Tables, caller: &Caller, pickup: &PickupRequest) -> bool {
    if caller.is_elevated() || pickup.requester == caller.id() {
        return true;
    }
    match caller_driver_id(t, caller) {
        Some(driver) => pickup.assigned_driver == Some(driver),
        None => false,
    }
}

fn visible_pickup<'t>(t: &'t Tables, caller: &Caller, id: Uuid) -> Result<&'t PickupRequest> {
    t.pickups
        .get(&id)
        .filter(|p| can_view_pickup(t, caller, p))
        .ok_or_else(|| ApiError::not_found("Pickup request"))
}

fn known_waste_type(t: &Tables, waste_type: Option<Uuid>) -> Result<()> {
    match waste_type {
        Some(id) if !t.waste_types.contains_key(&id) => Err(ApiError::not_found("Waste type")),
        _ => Ok(()),
    }
}

/// Another open request already holding `driver` or `vehicle` at `when`.
fn assignment_conflict(
    t: &Tables,
    pickup: Uuid,
    when: DateTime<Utc>,
    driver: Option<Uuid>,
    vehicle: Option<Uuid>,
) -> Option<&'static str> {
    let others = t
        .pickups
        .values()
        .filter(|p| p.id != pickup && p.is_active() && p.scheduled_time == when);
    for other in others {
        if driver.is_some() && other.assigned_driver == driver {
            return Some("Driver is already assigned to another request at that time.");
        }
        if vehicle.is_some() && other.assigned_vehicle == vehicle {
            return Some("Vehicle is already assigned to another request at that time.");
        }
    }
    None
}

/// Rules every assignment path shares: the request is still open, the
/// driver is active, the vehicle is available and can carry the load, and
/// neither is booked on another open request at the same time.
pub(crate) fn check_assignment(
    t: &Tables,
    pickup: &PickupRequest,
    driver: Option<Uuid>,
    vehicle: Option<Uuid>,
) -> Result<()> {
    if pickup.status.is_terminal() {
        return Err(ApiError::bad_request(format!(
            "A {} request cannot be reassigned.",
            pickup.status
        )));
    }
    if let Some(driver_id) = driver {
        let driver = t.drivers.get(&driver_id).ok_or_else(|| ApiError::not_found("Driver"))?;
        if !driver.active {
            return Err(ApiError::bad_request("Driver is not active."));
        }
    }
    if let Some(vehicle_id) = vehicle {
        let vehicle = t.vehicles.get(&vehicle_id).ok_or_else(|| ApiError::not_found("Vehicle"))?;
        if vehicle.status != VehicleStatus::Available {
            return Err(ApiError::bad_request(format!(
                "Vehicle {} is not available.",
                vehicle.plate_number
            )));
        }
        if !vehicle.can_carry(pickup.estimated_weight_kg) {
            return Err(ApiError::bad_request(format!(
                "Estimated weight exceeds the capacity of vehicle {}.",
                vehicle.plate_number
            )));
        }
    }
    match assignment_conflict(t, pickup.id, pickup.scheduled_time, driver, vehicle) {
        Some(message) => Err(ApiError::Conflict(message.to_string())),
        None => Ok(()),
    }
}

pub struct PickupService<'a> {
    storage: &'a InMemoryStorage,
    notifications: NotificationService<'a>,
}

impl<'a> PickupService<'a> {
    pub fn new(storage: &'a InMemoryStorage, notifications: NotificationService<'a>) -> Self {
        Self { storage, notifications }
    }

    pub fn list(&self, caller: &Caller, filter: &PickupFilter) -> Result<Vec<PickupRequest>> {
        let status = match filter.status.as_deref() {
            Some(s) => Some(
                parse_choice::<RequestStatus>(s)
                    .ok_or_else(|| ApiError::bad_request(format!("\"{s}\" is not a valid status.")))?,
            ),
            None => None,
        };
        let mut pickups: Vec<PickupRequest> = self.storage.read(|t| {
            t.pickups
                .values()
                .filter(|p| can_view_pickup(t, caller, p))
                .filter(|p| status.map_or(true, |s| p.status == s))
                .filter(|p| filter.date.map_or(true, |d| p.scheduled_time.date_naive() == d))
                .cloned()
                .collect()
        });
        pickups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(pickups)
    }

    pub fn get(&self, caller: &Caller, id: Uuid) -> Result<PickupRequest> {
        self.storage.read(|t| visible_pickup(t, caller, id).cloned())
    }

    /// Create a request owned by the caller. An inline address is matched
    /// against the caller's existing addresses on `(line1, city)` and created
    /// when none matches; both writes happen under one lock.
    pub fn submit(&self, caller: &Caller, input: PickupInput) -> Result<PickupRequest> {
        input.validate()?;
        let owner = caller.id();
        let now = Utc::now();

        let pickup = self.storage.write(|t| {
            known_waste_type(t, input.waste_type_id)?;
            let address_id = match (input.address_id, &input.address) {
                (Some(id), _) => {
                    t.addresses
                        .get(&id)
                        .filter(|a| a.user == owner)
                        .ok_or_else(|| ApiError::not_found("Address"))?;
                    id
                }
                (None, Some(inline)) => match t.find_address(owner, &inline.line1, &inline.city) {
                    Some(existing) => existing.id,
                    None => {
                        let address = inline.clone().into_address(owner);
                        let id = address.id;
                        t.addresses.insert(id, address);
                        id
                    }
                },
                (None, None) => return Err(ApiError::bad_request("Either address_id or address is required.")),
            };

            let pickup = PickupRequest {
                id: Uuid::new_v4(),
                requester: owner,
                address: address_id,
                waste_type: input.waste_type_id,
                scheduled_time: input.scheduled_time,
                time_window_start: input.time_window_start,
                time_window_end: input.time_window_end,
                description: input.description.trim().to_string(),
                estimated_weight_kg: input.estimated_weight_kg,
                status: RequestStatus::Requested,
                assigned_driver: None,
                assigned_vehicle: None,
                cancelled_reason: String::new(),
                recurrence: None,
                created_at: now,
                updated_at: now,
            };
            t.pickups.insert(pickup.id, pickup.clone());
            Ok::<_, ApiError>(pickup)
        })?;

        metrics::pickup_submitted();
        info!(pickup_id = %pickup.id, requester = %owner, "Pickup request submitted");
        Ok(pickup)
    }

    /// Owners may edit while the request is still `requested`; elevated roles
    /// while it is open.
    pub fn update(&self, caller: &Caller, id: Uuid, patch: PickupPatch) -> Result<PickupRequest> {
        patch.validate()?;
        self.storage.write(|t| {
            let current = visible_pickup(t, caller, id)?;
            let editable = if caller.is_elevated() {
                current.is_active()
            } else {
                current.requester == caller.id() && current.is_editable_by_owner()
            };
            if !editable {
                return Err(ApiError::bad_request(format!(
                    "A {} request can no longer be edited.",
                    current.status
                )));
            }
            known_waste_type(t, patch.waste_type_id)?;
            if let Some(address) = patch.address_id {
                t.addresses
                    .get(&address)
                    .filter(|a| a.user == current.requester)
                    .ok_or_else(|| ApiError::not_found("Address"))?;
            }

            let mut updated = current.clone();
            if let Some(address) = patch.address_id {
                updated.address = address;
            }
            if patch.waste_type_id.is_some() {
                updated.waste_type = patch.waste_type_id;
            }
            if let Some(when) = patch.scheduled_time {
                updated.scheduled_time = when;
            }
            if patch.time_window_start.is_some() {
                updated.time_window_start = patch.time_window_start;
            }
            if patch.time_window_end.is_some() {
                updated.time_window_end = patch.time_window_end;
            }
            if let Some(description) = patch.description {
                updated.description = description.trim().to_string();
            }
            if patch.estimated_weight_kg.is_some() {
                updated.estimated_weight_kg = patch.estimated_weight_kg;
            }
            validate_time_window(updated.time_window_start, updated.time_window_end)?;
            if updated.scheduled_time != current.scheduled_time {
                if let Some(message) = assignment_conflict(
                    t,
                    id,
                    updated.scheduled_time,
                    updated.assigned_driver,
                    updated.assigned_vehicle,
                ) {
                    return Err(ApiError::Conflict(message.to_string()));
                }
            }
            updated.updated_at = Utc::now();

            t.pickups.insert(id, updated.clone());
            Ok(updated)
        })
    }

    /// Owners may withdraw a request until it is scheduled. Stops pointing at
    /// the request are detached; invoices keep their history.
    pub fn delete(&self, caller: &Caller, id: Uuid) -> Result<()> {
        self.storage.write(|t| {
            let current = visible_pickup(t, caller, id)?;
            if !caller.is_elevated() {
                if current.requester != caller.id() {
                    return Err(ApiError::forbidden());
                }
                if !current.is_editable_by_owner() {
                    return Err(ApiError::bad_request(format!(
                        "A {} request can no longer be deleted; cancel it instead.",
                        current.status
                    )));
                }
            }
            t.pickups.remove(&id);
            for stop in t.route_stops.values_mut().filter(|s| s.pickup == Some(id)) {
                stop.pickup = None;
            }
            Ok::<_, ApiError>(())
        })?;
        info!(pickup_id = %id, "Pickup request deleted");
        Ok(())
    }

    /// Move a request along its lifecycle. Dispatchers and admins may make
    /// any valid transition; drivers only on their own assignments and only
    /// towards `in_progress`, `completed` or `failed`.
    pub async fn change_status(
        &self,
        caller: &Caller,
        id: Uuid,
        status: &str,
        reason: Option<String>,
    ) -> Result<PickupRequest> {
        let next: RequestStatus = parse_choice(status).ok_or_else(|| {
            ApiError::bad_request(format!(
                "\"{status}\" is not a valid status. Expected one of: {}.",
                RequestStatus::ALL.map(RequestStatus::as_str).join(", ")
            ))
        })?;

        let (previous, pickup) = self.storage.write(|t| {
            let current = visible_pickup(t, caller, id)?;
            if !caller.is_elevated() {
                let own_assignment = caller_driver_id(t, caller)
                    .map_or(false, |driver| current.assigned_driver == Some(driver));
                if !own_assignment || !next.driver_may_set() {
                    return Err(ApiError::forbidden());
                }
            }
            current.check_transition(next).map_err(invalid)?;

            let previous = current.status;
            let pickup = t.pickups.get_mut(&id).ok_or_else(|| ApiError::not_found("Pickup request"))?;
            pickup.set_status(next, Utc::now());
            if next == RequestStatus::Cancelled {
                pickup.cancelled_reason = reason.unwrap_or_default().trim().to_string();
            }
            Ok::<_, ApiError>((previous, pickup.clone()))
        })?;

        metrics::pickup_status_changed(next.as_str());
        info!(pickup_id = %id, from = %previous, to = %next, "Pickup status changed");
        self.notify_requester(caller, &pickup).await;
        Ok(pickup)
    }

    /// Assign a driver and/or vehicle. Checks and the update run under one
    /// write lock, so two dispatchers cannot double-book the same resource.
    pub fn assign(&self, caller: &Caller, id: Uuid, input: AssignInput) -> Result<PickupRequest> {
        caller.require_elevated()?;
        input.validate()?;

        let pickup = self.storage.write(|t| {
            let current = t.pickups.get(&id).ok_or_else(|| ApiError::not_found("Pickup request"))?;
            check_assignment(t, current, input.driver_id, input.vehicle_id)?;

            let pickup = t.pickups.get_mut(&id).ok_or_else(|| ApiError::not_found("Pickup request"))?;
            if input.driver_id.is_some() {
                pickup.assigned_driver = input.driver_id;
            }
            if input.vehicle_id.is_some() {
                pickup.assigned_vehicle = input.vehicle_id;
            }
            pickup.updated_at = Utc::now();
            Ok::<_, ApiError>(pickup.clone())
        })?;

        info!(
            pickup_id = %id,
            driver_id = ?pickup.assigned_driver,
            vehicle_id = ?pickup.assigned_vehicle,
            "Pickup assigned"
        );
        Ok(pickup)
    }

    /// Owners may cancel while the request is `requested` or `scheduled`;
    /// elevated roles while it is open.
    pub async fn cancel(&self, caller: &Caller, id: Uuid, reason: Option<String>) -> Result<PickupRequest> {
        let pickup = self.storage.write(|t| {
            let current = visible_pickup(t, caller, id)?;
            if !caller.is_elevated() {
                if current.requester != caller.id() {
                    return Err(ApiError::forbidden());
                }
                if !matches!(current.status, RequestStatus::Requested | RequestStatus::Scheduled) {
                    return Err(ApiError::bad_request(format!(
                        "A {} request can no longer be cancelled.",
                        current.status
                    )));
                }
            }
            current.check_transition(RequestStatus::Cancelled).map_err(invalid)?;

            let pickup = t.pickups.get_mut(&id).ok_or_else(|| ApiError::not_found("Pickup request"))?;
            pickup.set_status(RequestStatus::Cancelled, Utc::now());
            pickup.cancelled_reason = reason.unwrap_or_default().trim().to_string();
            Ok::<_, ApiError>(pickup.clone())
        })?;

        metrics::pickup_status_changed(RequestStatus::Cancelled.as_str());
        info!(pickup_id = %id, "Pickup cancelled");
        self.notify_requester(caller, &pickup).await;
        Ok(pickup)
    }

    /// Tell the requester about a status change made by someone else.
    async fn notify_requester(&self, caller: &Caller, pickup: &PickupRequest) {
        if pickup.requester == caller.id() {
            return;
        }
        notify_status_change(&self.notifications, pickup).await;
    }
}

/// Store and deliver a status-change notification for the requester.
/// Delivery problems never fail the triggering operation.
pub(crate) async fn notify_status_change(notifications: &NotificationService<'_>, pickup: &PickupRequest) {
    let notification_type = match pickup.status {
        RequestStatus::Completed => NotificationType::Success,
        RequestStatus::Failed => NotificationType::Error,
        RequestStatus::Cancelled => NotificationType::Warning,
        _ => NotificationType::Info,
    };
    let title = format!("Pickup {}", pickup.status.as_str().replace('_', " "));
    let message = format!(
        "Your pickup request scheduled for {} is now {}.",
        pickup.scheduled_time.format("%Y-%m-%d %H:%M"),
        pickup.status
    );
    if let Err(e) = notifications
        .notify(pickup.requester, notification_type, title, message)
        .await
    {
        warn!(pickup_id = %pickup.id, "Could not record status notification: {}", e);
    }
}
