use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Result<Self, String> {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(format!("latitude out of range: {lat}"));
        }
        if !(-180.0..=180.0).contains(&lng) {
            return Err(format!("longitude out of range: {lng}"));
        }
        Ok(Self { lat, lng })
    }

    /// Great-circle distance in kilometres.
    pub fn haversine_km(&self, other: &Coordinates) -> f64 {
        const EARTH_RADIUS_KM: f64 = 6371.0;
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos() * other.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

/// Pair of optional coordinates as they arrive from clients: both or neither.
pub fn coordinates_from_parts(lat: Option<f64>, lng: Option<f64>) -> Result<Option<Coordinates>, String> {
    match (lat, lng) {
        (Some(lat), Some(lng)) => Coordinates::new(lat, lng).map(Some),
        (None, None) => Ok(None),
        _ => Err("lat and lng must be provided together".to_string()),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub id: Uuid,
    pub user: Uuid,
    pub label: String,
    pub line1: String,
    pub line2: String,
    pub city: String,
    pub postal_code: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Address {
    pub fn coordinates(&self) -> Option<Coordinates> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(Coordinates { lat, lng }),
            _ => None,
        }
    }

    /// Identity used when a request carries an inline address: the same
    /// owner, first line and city resolve to the same record.
    pub fn matches(&self, user: Uuid, line1: &str, city: &str) -> bool {
        self.user == user
            && self.line1.trim().eq_ignore_ascii_case(line1.trim())
            && self.city.trim().eq_ignore_ascii_case(city.trim())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub id: Uuid,
    pub name: String,
    /// GeoJSON `Polygon` geometry (or a `Feature` wrapping one).
    pub polygon_geojson: String,
    pub created_at: DateTime<Utc>,
}

impl Zone {
    /// Outer ring of the zone boundary as `(lng, lat)` pairs. `None` when the
    /// zone has no boundary.
    pub fn boundary(&self) -> Result<Option<Vec<(f64, f64)>>, String> {
        if self.polygon_geojson.trim().is_empty() {
            return Ok(None);
        }
        parse_polygon(&self.polygon_geojson).map(Some)
    }

    pub fn contains(&self, point: &Coordinates) -> bool {
        match self.boundary() {
            Ok(Some(ring)) => point_in_ring(&ring, point),
            _ => false,
        }
    }
}

/// Parse the outer ring of a GeoJSON polygon.
pub fn parse_polygon(geojson: &str) -> Result<Vec<(f64, f64)>, String> {
    let value: Value = serde_json::from_str(geojson).map_err(|e| format!("invalid GeoJSON: {e}"))?;
    let geometry = match value.get("type").and_then(Value::as_str) {
        Some("Feature") => value
            .get("geometry")
            .ok_or_else(|| "GeoJSON feature has no geometry".to_string())?,
        Some("Polygon") => &value,
        Some(other) => return Err(format!("unsupported GeoJSON type: {other}")),
        None => return Err("GeoJSON object has no type".to_string()),
    };
    if geometry.get("type").and_then(Value::as_str) != Some("Polygon") {
        return Err("GeoJSON geometry must be a Polygon".to_string());
    }
    let outer = geometry
        .get("coordinates")
        .and_then(Value::as_array)
        .and_then(|rings| rings.first())
        .and_then(Value::as_array)
        .ok_or_else(|| "GeoJSON polygon has no outer ring".to_string())?;

    let mut ring = Vec::with_capacity(outer.len());
    for position in outer {
        let pair = position
            .as_array()
            .filter(|p| p.len() >= 2)
            .ok_or_else(|| "GeoJSON position must be [lng, lat]".to_string())?;
        let lng = pair[0].as_f64().ok_or_else(|| "longitude must be a number".to_string())?;
        let lat = pair[1].as_f64().ok_or_else(|| "latitude must be a number".to_string())?;
        ring.push((lng, lat));
    }
    if ring.len() < 4 {
        return Err("GeoJSON polygon ring needs at least four positions".to_string());
    }
    Ok(ring)
}

/// Even-odd ray casting. Points exactly on an edge may fall either way.
pub fn point_in_ring(ring: &[(f64, f64)], point: &Coordinates) -> bool {
    if ring.is_empty() {
        return false;
    }
    let (x, y) = (point.lng, point.lat);
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let (xi, yi) = ring[i];
        let (xj, yj) = ring[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}
