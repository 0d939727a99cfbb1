use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::{invalid, not_blank, rule};
use crate::auth::Caller;
use crate::domain::location::{coordinates_from_parts, parse_polygon};
use crate::domain::{Address, Zone};
use crate::error::{ApiError, Result};
use crate::storage::{InMemoryStorage, Tables};

#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "address_coordinates"))]
pub struct AddressInput {
    #[serde(default)]
    #[validate(length(max = 100))]
    pub label: String,
    #[validate(custom(function = "not_blank"), length(max = 255))]
    pub line1: String,
    #[serde(default)]
    #[validate(length(max = 255))]
    pub line2: String,
    #[validate(custom(function = "not_blank"), length(max = 100))]
    pub city: String,
    #[serde(default)]
    #[validate(length(max = 20))]
    pub postal_code: String,
    #[validate(range(min = -90.0, max = 90.0))]
    pub lat: Option<f64>,
    #[validate(range(min = -180.0, max = 180.0))]
    pub lng: Option<f64>,
}

fn address_coordinates(input: &AddressInput) -> std::result::Result<(), ValidationError> {
    coordinates_from_parts(input.lat, input.lng)
        .map(|_| ())
        .map_err(|message| rule("coordinates", message))
}

impl AddressInput {
    pub fn into_address(self, owner: Uuid) -> Address {
        Address {
            id: Uuid::new_v4(),
            user: owner,
            label: self.label.trim().to_string(),
            line1: self.line1.trim().to_string(),
            line2: self.line2.trim().to_string(),
            city: self.city.trim().to_string(),
            postal_code: self.postal_code.trim().to_string(),
            lat: self.lat,
            lng: self.lng,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct AddressPatch {
    #[validate(length(max = 100))]
    pub label: Option<String>,
    #[validate(custom(function = "not_blank"), length(max = 255))]
    pub line1: Option<String>,
    #[validate(length(max = 255))]
    pub line2: Option<String>,
    #[validate(custom(function = "not_blank"), length(max = 100))]
    pub city: Option<String>,
    #[validate(length(max = 20))]
    pub postal_code: Option<String>,
    #[validate(range(min = -90.0, max = 90.0))]
    pub lat: Option<f64>,
    #[validate(range(min = -180.0, max = 180.0))]
    pub lng: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ZoneInput {
    #[validate(custom(function = "not_blank"), length(max = 100))]
    pub name: String,
    #[serde(default)]
    #[validate(custom(function = "zone_boundary"))]
    pub polygon_geojson: String,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ZonePatch {
    #[validate(custom(function = "not_blank"), length(max = 100))]
    pub name: Option<String>,
    #[validate(custom(function = "zone_boundary"))]
    pub polygon_geojson: Option<String>,
}

/// An empty boundary is allowed; anything else must be a GeoJSON polygon.
fn zone_boundary(geojson: &str) -> std::result::Result<(), ValidationError> {
    if geojson.trim().is_empty() {
        return Ok(());
    }
    parse_polygon(geojson).map(|_| ()).map_err(|message| rule("geojson", message))
}

/// Whether `caller` may see `address`: owners and elevated roles.
pub(crate) fn can_view_address(caller: &Caller, address: &Address) -> bool {
    caller.is_elevated() || address.user == caller.id()
}

fn visible_addresses(t: &Tables, caller: &Caller) -> Vec<Address> {
    let mut addresses: Vec<Address> = t
        .addresses
        .values()
        .filter(|a| can_view_address(caller, a))
        .cloned()
        .collect();
    addresses.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    addresses
}

pub struct LocationService<'a> {
    storage: &'a InMemoryStorage,
}

impl<'a> LocationService<'a> {
    pub fn new(storage: &'a InMemoryStorage) -> Self {
        Self { storage }
    }

    pub fn list_addresses(&self, caller: &Caller) -> Vec<Address> {
        self.storage.read(|t| visible_addresses(t, caller))
    }

    /// Addresses are always owned by the caller who creates them.
    pub fn create_address(&self, caller: &Caller, input: AddressInput) -> Result<Address> {
        input.validate()?;
        let address = input.into_address(caller.id());
        self.storage.write(|t| {
            t.addresses.insert(address.id, address.clone());
            Ok::<_, ApiError>(())
        })?;
        info!(address_id = %address.id, "Created address");
        Ok(address)
    }

    pub fn get_address(&self, caller: &Caller, id: Uuid) -> Result<Address> {
        self.storage
            .read(|t| t.addresses.get(&id).cloned())
            .filter(|a| can_view_address(caller, a))
            .ok_or_else(|| ApiError::not_found("Address"))
    }

    pub fn update_address(&self, caller: &Caller, id: Uuid, patch: AddressPatch) -> Result<Address> {
        patch.validate()?;
        self.storage.write(|t| {
            let current = t
                .addresses
                .get(&id)
                .filter(|a| can_view_address(caller, a))
                .ok_or_else(|| ApiError::not_found("Address"))?;

            let mut updated = current.clone();
            if let Some(label) = patch.label {
                updated.label = label.trim().to_string();
            }
            if let Some(line1) = patch.line1 {
                updated.line1 = line1.trim().to_string();
            }
            if let Some(line2) = patch.line2 {
                updated.line2 = line2.trim().to_string();
            }
            if let Some(city) = patch.city {
                updated.city = city.trim().to_string();
            }
            if let Some(postal_code) = patch.postal_code {
                updated.postal_code = postal_code.trim().to_string();
            }
            if patch.lat.is_some() || patch.lng.is_some() {
                coordinates_from_parts(patch.lat, patch.lng).map_err(invalid)?;
                updated.lat = patch.lat;
                updated.lng = patch.lng;
            }

            t.addresses.insert(id, updated.clone());
            Ok(updated)
        })
    }

    /// Addresses referenced by requests, schedules or reports cannot be
    /// deleted.
    pub fn delete_address(&self, caller: &Caller, id: Uuid) -> Result<()> {
        self.storage.write(|t| {
            t.addresses
                .get(&id)
                .filter(|a| can_view_address(caller, a))
                .ok_or_else(|| ApiError::not_found("Address"))?;
            let in_use = t.pickups.values().any(|p| p.address == id)
                || t.recurrence_schedules.values().any(|s| s.address == id)
                || t.issue_reports.values().any(|r| r.address == id);
            if in_use {
                return Err(ApiError::Conflict(
                    "Address is referenced by pickup requests, schedules or issue reports.".to_string(),
                ));
            }
            t.addresses.remove(&id);
            Ok(())
        })
    }

    /// Visible addresses whose coordinates fall inside the zone boundary.
    pub fn addresses_by_zone(&self, caller: &Caller, zone_id: Option<Uuid>) -> Result<Vec<Address>> {
        let zone_id = zone_id.ok_or_else(|| ApiError::bad_request("zone_id parameter required"))?;
        self.zone_addresses(caller, zone_id)
    }

    pub fn zone_addresses(&self, caller: &Caller, zone_id: Uuid) -> Result<Vec<Address>> {
        self.storage.read(|t| {
            let zone = t.zones.get(&zone_id).ok_or_else(|| ApiError::not_found("Zone"))?;
            Ok(visible_addresses(t, caller)
                .into_iter()
                .filter(|a| a.coordinates().map_or(false, |c| zone.contains(&c)))
                .collect())
        })
    }

    pub fn list_zones(&self) -> Vec<Zone> {
        let mut zones: Vec<Zone> = self.storage.read(|t| t.zones.values().cloned().collect());
        zones.sort_by(|a, b| a.name.cmp(&b.name));
        zones
    }

    pub fn get_zone(&self, id: Uuid) -> Result<Zone> {
        self.storage
            .read(|t| t.zones.get(&id).cloned())
            .ok_or_else(|| ApiError::not_found("Zone"))
    }

    pub fn create_zone(&self, caller: &Caller, input: ZoneInput) -> Result<Zone> {
        caller.require_elevated()?;
        input.validate()?;
        let zone = Zone {
            id: Uuid::new_v4(),
            name: input.name.trim().to_string(),
            polygon_geojson: input.polygon_geojson,
            created_at: Utc::now(),
        };
        self.storage.write(|t| {
            t.zones.insert(zone.id, zone.clone());
            Ok::<_, ApiError>(())
        })?;
        info!(zone_id = %zone.id, "Created zone {}", zone.name);
        Ok(zone)
    }

    pub fn update_zone(&self, caller: &Caller, id: Uuid, patch: ZonePatch) -> Result<Zone> {
        caller.require_elevated()?;
        patch.validate()?;
        self.storage.write(|t| {
            let zone = t.zones.get_mut(&id).ok_or_else(|| ApiError::not_found("Zone"))?;
            if let Some(name) = patch.name {
                zone.name = name.trim().to_string();
            }
            if let Some(geojson) = patch.polygon_geojson {
                zone.polygon_geojson = geojson;
            }
            Ok(zone.clone())
        })
    }

    /// Zones still used by routes are protected; vehicle zone references
    /// are cleared.
    pub fn delete_zone(&self, caller: &Caller, id: Uuid) -> Result<()> {
        caller.require_elevated()?;
        self.storage.write(|t| {
            if !t.zones.contains_key(&id) {
                return Err(ApiError::not_found("Zone"));
            }
            if t.routes.values().any(|r| r.zone == Some(id)) {
                return Err(ApiError::Conflict("Zone is referenced by routes.".to_string()));
            }
            for vehicle in t.vehicles.values_mut().filter(|v| v.current_zone == Some(id)) {
                vehicle.current_zone = None;
            }
            t.zones.remove(&id);
            Ok(())
        })
    }
}
