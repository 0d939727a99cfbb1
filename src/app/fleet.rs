use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::not_blank;
use crate::auth::Caller;
use crate::domain::fleet::normalize_plate;
use crate::domain::{parse_choice, Driver, Role, Vehicle, VehicleStatus};
use crate::error::{ApiError, Result};
use crate::storage::{InMemoryStorage, Tables};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct VehicleInput {
    #[validate(custom(function = "not_blank"), length(max = 20))]
    pub plate_number: String,
    #[serde(default)]
    #[validate(length(max = 100))]
    pub model: String,
    pub capacity_kg: Option<u32>,
    pub status: Option<VehicleStatus>,
    pub current_zone: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct VehiclePatch {
    #[validate(custom(function = "not_blank"), length(max = 20))]
    pub plate_number: Option<String>,
    #[validate(length(max = 100))]
    pub model: Option<String>,
    pub capacity_kg: Option<u32>,
    pub current_zone: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DriverInput {
    pub user_id: Uuid,
    #[serde(default)]
    #[validate(length(max = 30))]
    pub phone: String,
    #[serde(default)]
    #[validate(length(max = 50))]
    pub license_number: String,
    pub assigned_vehicle: Option<Uuid>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct DriverPatch {
    #[validate(length(max = 30))]
    pub phone: Option<String>,
    #[validate(length(max = 50))]
    pub license_number: Option<String>,
    pub active: Option<bool>,
}

fn ensure_unique_plate(t: &Tables, plate: &str, except: Option<Uuid>) -> Result<()> {
    let taken = t
        .vehicles
        .values()
        .any(|v| Some(v.id) != except && normalize_plate(&v.plate_number) == plate);
    if taken {
        return Err(ApiError::Conflict("A vehicle with that plate number already exists.".to_string()));
    }
    Ok(())
}

fn ensure_zone(t: &Tables, zone: Option<Uuid>) -> Result<()> {
    match zone {
        Some(id) if !t.zones.contains_key(&id) => Err(ApiError::not_found("Zone")),
        _ => Ok(()),
    }
}

/// A vehicle handed to a driver must exist and be available.
fn ensure_assignable_vehicle(t: &Tables, vehicle: Option<Uuid>) -> Result<()> {
    let Some(id) = vehicle else {
        return Ok(());
    };
    let vehicle = t.vehicles.get(&id).ok_or_else(|| ApiError::not_found("Vehicle"))?;
    if vehicle.status != VehicleStatus::Available {
        return Err(ApiError::bad_request(format!(
            "Vehicle {} is not available.",
            vehicle.plate_number
        )));
    }
    Ok(())
}

pub struct FleetService<'a> {
    storage: &'a InMemoryStorage,
}

impl<'a> FleetService<'a> {
    pub fn new(storage: &'a InMemoryStorage) -> Self {
        Self { storage }
    }

    pub fn list_vehicles(&self) -> Vec<Vehicle> {
        let mut vehicles: Vec<Vehicle> = self.storage.read(|t| t.vehicles.values().cloned().collect());
        vehicles.sort_by(|a, b| a.plate_number.cmp(&b.plate_number));
        vehicles
    }

    pub fn available_vehicles(&self) -> Vec<Vehicle> {
        self.list_vehicles()
            .into_iter()
            .filter(|v| v.status == VehicleStatus::Available)
            .collect()
    }

    pub fn get_vehicle(&self, id: Uuid) -> Result<Vehicle> {
        self.storage
            .read(|t| t.vehicles.get(&id).cloned())
            .ok_or_else(|| ApiError::not_found("Vehicle"))
    }

    pub fn create_vehicle(&self, caller: &Caller, input: VehicleInput) -> Result<Vehicle> {
        caller.require_elevated()?;
        input.validate()?;
        let plate = normalize_plate(&input.plate_number);
        let vehicle = Vehicle {
            id: Uuid::new_v4(),
            plate_number: plate.clone(),
            model: input.model.trim().to_string(),
            capacity_kg: input.capacity_kg,
            status: input.status.unwrap_or(VehicleStatus::Available),
            current_zone: input.current_zone,
            last_location: None,
            last_seen_at: None,
            created_at: Utc::now(),
        };
        self.storage.write(|t| {
            ensure_unique_plate(t, &plate, None)?;
            ensure_zone(t, vehicle.current_zone)?;
            t.vehicles.insert(vehicle.id, vehicle.clone());
            Ok::<_, ApiError>(())
        })?;
        info!(vehicle_id = %vehicle.id, "Registered vehicle {}", vehicle.plate_number);
        Ok(vehicle)
    }

    pub fn update_vehicle(&self, caller: &Caller, id: Uuid, patch: VehiclePatch) -> Result<Vehicle> {
        caller.require_elevated()?;
        patch.validate()?;
        self.storage.write(|t| {
            if !t.vehicles.contains_key(&id) {
                return Err(ApiError::not_found("Vehicle"));
            }
            let plate = patch.plate_number.as_deref().map(normalize_plate);
            if let Some(plate) = &plate {
                ensure_unique_plate(t, plate, Some(id))?;
            }
            ensure_zone(t, patch.current_zone)?;

            let vehicle = t.vehicles.get_mut(&id).ok_or_else(|| ApiError::not_found("Vehicle"))?;
            if let Some(plate) = plate {
                vehicle.plate_number = plate;
            }
            if let Some(model) = patch.model {
                vehicle.model = model.trim().to_string();
            }
            if patch.capacity_kg.is_some() {
                vehicle.capacity_kg = patch.capacity_kg;
            }
            if patch.current_zone.is_some() {
                vehicle.current_zone = patch.current_zone;
            }
            Ok(vehicle.clone())
        })
    }

    /// Delete a vehicle and clear every reference to it.
    pub fn delete_vehicle(&self, caller: &Caller, id: Uuid) -> Result<()> {
        caller.require_elevated()?;
        self.storage.write(|t| {
            if t.vehicles.remove(&id).is_none() {
                return Err(ApiError::not_found("Vehicle"));
            }
            for driver in t.drivers.values_mut().filter(|d| d.assigned_vehicle == Some(id)) {
                driver.assigned_vehicle = None;
            }
            for pickup in t.pickups.values_mut().filter(|p| p.assigned_vehicle == Some(id)) {
                pickup.assigned_vehicle = None;
            }
            for route in t.routes.values_mut().filter(|r| r.vehicle == Some(id)) {
                route.vehicle = None;
            }
            Ok(())
        })
    }

    pub fn change_vehicle_status(&self, caller: &Caller, id: Uuid, status: &str) -> Result<Vehicle> {
        caller.require_elevated()?;
        let status: VehicleStatus = parse_choice(status)
            .ok_or_else(|| ApiError::bad_request(format!("\"{status}\" is not a valid vehicle status.")))?;
        let vehicle = self.storage.write(|t| {
            let vehicle = t.vehicles.get_mut(&id).ok_or_else(|| ApiError::not_found("Vehicle"))?;
            vehicle.status = status;
            Ok::<_, ApiError>(vehicle.clone())
        })?;
        info!(vehicle_id = %id, status = ?status, "Vehicle status changed");
        Ok(vehicle)
    }

    pub fn list_drivers(&self) -> Vec<Driver> {
        let mut drivers: Vec<Driver> = self.storage.read(|t| t.drivers.values().cloned().collect());
        drivers.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        drivers
    }

    pub fn active_drivers(&self) -> Vec<Driver> {
        self.list_drivers().into_iter().filter(|d| d.active).collect()
    }

    pub fn get_driver(&self, id: Uuid) -> Result<Driver> {
        self.storage
            .read(|t| t.drivers.get(&id).cloned())
            .ok_or_else(|| ApiError::not_found("Driver"))
    }

    /// Profiles bind exactly one account, and that account must hold the
    /// `DRIVER` role.
    pub fn create_driver(&self, caller: &Caller, input: DriverInput) -> Result<Driver> {
        caller.require_elevated()?;
        input.validate()?;
        let driver = Driver {
            id: Uuid::new_v4(),
            user: input.user_id,
            phone: input.phone.trim().to_string(),
            license_number: input.license_number.trim().to_string(),
            assigned_vehicle: input.assigned_vehicle,
            active: input.active.unwrap_or(true),
            created_at: Utc::now(),
        };
        self.storage.write(|t| {
            let user = t.users.get(&driver.user).ok_or_else(|| ApiError::not_found("User"))?;
            if user.role != Role::Driver {
                return Err(ApiError::bad_request("A driver profile requires an account with the DRIVER role."));
            }
            if t.driver_for_user(driver.user).is_some() {
                return Err(ApiError::Conflict("That account already has a driver profile.".to_string()));
            }
            ensure_assignable_vehicle(t, driver.assigned_vehicle)?;
            t.drivers.insert(driver.id, driver.clone());
            Ok::<_, ApiError>(())
        })?;
        info!(driver_id = %driver.id, user_id = %driver.user, "Created driver profile");
        Ok(driver)
    }

    pub fn update_driver(&self, caller: &Caller, id: Uuid, patch: DriverPatch) -> Result<Driver> {
        caller.require_elevated()?;
        patch.validate()?;
        self.storage.write(|t| {
            let driver = t.drivers.get_mut(&id).ok_or_else(|| ApiError::not_found("Driver"))?;
            if let Some(phone) = patch.phone {
                driver.phone = phone.trim().to_string();
            }
            if let Some(license) = patch.license_number {
                driver.license_number = license.trim().to_string();
            }
            if let Some(active) = patch.active {
                driver.active = active;
            }
            Ok(driver.clone())
        })
    }

    pub fn delete_driver(&self, caller: &Caller, id: Uuid) -> Result<()> {
        caller.require_elevated()?;
        self.storage.write(|t| {
            if t.drivers.remove(&id).is_none() {
                return Err(ApiError::not_found("Driver"));
            }
            for pickup in t.pickups.values_mut().filter(|p| p.assigned_driver == Some(id)) {
                pickup.assigned_driver = None;
            }
            for route in t.routes.values_mut().filter(|r| r.driver == Some(id)) {
                route.driver = None;
            }
            for log in t.gps_logs.values_mut().filter(|l| l.driver == Some(id)) {
                log.driver = None;
            }
            Ok(())
        })
    }

    /// Hand a vehicle to a driver; `None` clears the assignment.
    pub fn assign_vehicle(&self, caller: &Caller, id: Uuid, vehicle: Option<Uuid>) -> Result<Driver> {
        caller.require_elevated()?;
        let driver = self.storage.write(|t| {
            if !t.drivers.contains_key(&id) {
                return Err(ApiError::not_found("Driver"));
            }
            ensure_assignable_vehicle(t, vehicle)?;
            let driver = t.drivers.get_mut(&id).ok_or_else(|| ApiError::not_found("Driver"))?;
            driver.assigned_vehicle = vehicle;
            Ok::<_, ApiError>(driver.clone())
        })?;
        info!(driver_id = %id, vehicle_id = ?vehicle, "Driver vehicle assignment changed");
        Ok(driver)
    }
}
