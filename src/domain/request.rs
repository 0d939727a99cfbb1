use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use uuid::Uuid;
use validator::ValidationError;

/// Lifecycle of a pickup request:
/// `requested -> scheduled -> in_progress -> {completed | cancelled | failed}`,
/// with cancellation allowed from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Requested,
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
    Failed,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 6] = [
        RequestStatus::Requested,
        RequestStatus::Scheduled,
        RequestStatus::InProgress,
        RequestStatus::Completed,
        RequestStatus::Cancelled,
        RequestStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Requested => "requested",
            RequestStatus::Scheduled => "scheduled",
            RequestStatus::InProgress => "in_progress",
            RequestStatus::Completed => "completed",
            RequestStatus::Cancelled => "cancelled",
            RequestStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestStatus::Completed | RequestStatus::Cancelled | RequestStatus::Failed
        )
    }

    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (self, next),
            (Requested, Scheduled)
                | (Requested, Cancelled)
                | (Scheduled, InProgress)
                | (Scheduled, Cancelled)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Cancelled)
        )
    }

    /// Statuses a driver may move their own assigned requests into.
    pub fn driver_may_set(self) -> bool {
        matches!(
            self,
            RequestStatus::InProgress | RequestStatus::Completed | RequestStatus::Failed
        )
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PickupRequest {
    pub id: Uuid,
    pub requester: Uuid,
    pub address: Uuid,
    pub waste_type: Option<Uuid>,
    pub scheduled_time: DateTime<Utc>,
    pub time_window_start: Option<NaiveTime>,
    pub time_window_end: Option<NaiveTime>,
    pub description: String,
    pub estimated_weight_kg: Option<f64>,
    pub status: RequestStatus,
    pub assigned_driver: Option<Uuid>,
    pub assigned_vehicle: Option<Uuid>,
    pub cancelled_reason: String,
    /// Recurrence schedule this request was generated from, if any.
    pub recurrence: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PickupRequest {
    /// Validate moving this request to `next`. The error is the message
    /// returned to the caller.
    pub fn check_transition(&self, next: RequestStatus) -> Result<(), String> {
        if self.status == next {
            return Err(format!("request is already {}", next));
        }
        if !self.status.can_transition_to(next) {
            return Err(format!("cannot change status from {} to {}", self.status, next));
        }
        if matches!(next, RequestStatus::InProgress | RequestStatus::Completed)
            && self.assigned_driver.is_none()
        {
            return Err(format!("a driver must be assigned before the request is {}", next));
        }
        Ok(())
    }

    /// Apply a transition already validated by [`Self::check_transition`].
    pub fn set_status(&mut self, next: RequestStatus, now: DateTime<Utc>) {
        self.status = next;
        self.updated_at = now;
    }

    /// Requesters may edit or withdraw a request until it is scheduled.
    pub fn is_editable_by_owner(&self) -> bool {
        self.status == RequestStatus::Requested
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// A window needs its start strictly before its end when both are given.
pub fn validate_time_window(start: Option<NaiveTime>, end: Option<NaiveTime>) -> Result<(), ValidationError> {
    match (start, end) {
        (Some(start), Some(end)) if start >= end => {
            let mut error = ValidationError::new("time_window");
            error.message = Some(Cow::Borrowed("time_window_start must be before time_window_end"));
            Err(error)
        }
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WasteType {
    pub id: Uuid,
    pub name: String,
    pub description: String,
}

/// Weekly repeating pickup. `day_of_week` is 0 for Monday through 6 for Sunday.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurrenceSchedule {
    pub id: Uuid,
    pub user: Uuid,
    pub address: Uuid,
    pub waste_type: Option<Uuid>,
    pub day_of_week: u8,
    pub time_window_start: Option<NaiveTime>,
    pub time_window_end: Option<NaiveTime>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueType {
    MissedPickup,
    Overflow,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueStatus {
    Open,
    Acknowledged,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueReport {
    pub id: Uuid,
    pub user: Uuid,
    pub address: Uuid,
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub description: String,
    pub status: IssueStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
