use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Coordinates;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RouteStatus {
    Planned,
    Dispatched,
    InProgress,
    Completed,
    Cancelled,
}

impl RouteStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RouteStatus::Completed | RouteStatus::Cancelled)
    }

    pub fn can_transition_to(self, next: RouteStatus) -> bool {
        use RouteStatus::*;
        match (self, next) {
            (Planned, Dispatched) | (Dispatched, InProgress) | (InProgress, Completed) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: Uuid,
    pub name: String,
    pub service_date: Option<NaiveDate>,
    pub zone: Option<Uuid>,
    pub driver: Option<Uuid>,
    pub vehicle: Option<Uuid>,
    pub status: RouteStatus,
    pub total_distance_km: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopStatus {
    Pending,
    Skipped,
    Served,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteStop {
    pub id: Uuid,
    pub route: Uuid,
    pub pickup: Option<Uuid>,
    pub sequence: u32,
    pub eta: Option<DateTime<Utc>>,
    pub arrival_time: Option<DateTime<Utc>>,
    pub departure_time: Option<DateTime<Utc>>,
    pub status: StopStatus,
}

/// Result of ordering a route's stops.
#[derive(Debug, Clone, PartialEq)]
pub struct StopPlan {
    pub order: Vec<Uuid>,
    pub total_distance_km: f64,
}

/// Greedy nearest-neighbour ordering over stop coordinates.
///
/// `stops` arrive in their current sequence. The tour starts at the first
/// stop that has coordinates; stops without coordinates keep their relative
/// order and go last. Distance counts only legs between located stops.
pub fn plan_stop_order(stops: &[(Uuid, Option<Coordinates>)]) -> StopPlan {
    let mut remaining: Vec<(Uuid, Coordinates)> = stops
        .iter()
        .filter_map(|(id, coords)| coords.map(|c| (*id, c)))
        .collect();
    let unlocated = stops.iter().filter(|(_, coords)| coords.is_none()).map(|(id, _)| *id);

    let mut order = Vec::with_capacity(stops.len());
    let mut total = 0.0;

    if !remaining.is_empty() {
        let (first_id, mut current) = remaining.remove(0);
        order.push(first_id);
        while !remaining.is_empty() {
            let (idx, distance) = remaining
                .iter()
                .enumerate()
                .map(|(i, (_, c))| (i, current.haversine_km(c)))
                .fold((0, f64::INFINITY), |best, candidate| {
                    if candidate.1 < best.1 {
                        candidate
                    } else {
                        best
                    }
                });
            let (next_id, next) = remaining.remove(idx);
            total += distance;
            order.push(next_id);
            current = next;
        }
    }

    order.extend(unlocated);
    StopPlan {
        order,
        total_distance_km: (total * 1000.0).round() / 1000.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_status_lifecycle() {
        use RouteStatus::*;
        assert!(Planned.can_transition_to(Dispatched));
        assert!(Dispatched.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(Planned.can_transition_to(Cancelled));
        assert!(!Planned.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Planned));
    }

    #[test]
    fn nearest_neighbour_visits_closest_first() {
        let a = Uuid::new_v4();
        let far = Uuid::new_v4();
        let near = Uuid::new_v4();
        let stops = vec![
            (a, Some(Coordinates { lat: 0.0, lng: 0.0 })),
            (far, Some(Coordinates { lat: 0.0, lng: 2.0 })),
            (near, Some(Coordinates { lat: 0.0, lng: 1.0 })),
        ];
        let plan = plan_stop_order(&stops);
        assert_eq!(plan.order, vec![a, near, far]);
        // Two one-degree legs along the equator
        assert!((plan.total_distance_km - 222.39).abs() < 0.1);
    }

    #[test]
    fn stops_without_coordinates_go_last_in_original_order() {
        let x = Uuid::new_v4();
        let y = Uuid::new_v4();
        let z = Uuid::new_v4();
        let stops = vec![(x, None), (y, Some(Coordinates { lat: 1.0, lng: 1.0 })), (z, None)];
        let plan = plan_stop_order(&stops);
        assert_eq!(plan.order, vec![y, x, z]);
        assert_eq!(plan.total_distance_km, 0.0);
    }

    #[test]
    fn empty_route_has_empty_plan() {
        let plan = plan_stop_order(&[]);
        assert!(plan.order.is_empty());
    }
}
