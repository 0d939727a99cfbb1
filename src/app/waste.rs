use chrono::{Datelike, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::not_blank;
use crate::auth::Caller;
use crate::domain::request::validate_time_window;
use crate::domain::{
    parse_choice, IssueReport, IssueStatus, IssueType, PickupRequest, RecurrenceSchedule,
    RequestStatus, WasteType,
};
use crate::error::{ApiError, Result};
use crate::metrics;
use crate::storage::{InMemoryStorage, Tables};

/// Collection time used for generated requests whose schedule has no window.
const DEFAULT_COLLECTION_TIME: (u32, u32) = (8, 0);

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct WasteTypeInput {
    #[validate(custom(function = "not_blank"), length(max = 100))]
    pub name: String,
    #[serde(default)]
    #[validate(length(max = 1000))]
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct WasteTypePatch {
    #[validate(custom(function = "not_blank"), length(max = 100))]
    pub name: Option<String>,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
}

/// `day_of_week` is 0 for Monday through 6 for Sunday.
#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "schedule_window"))]
pub struct ScheduleInput {
    pub address_id: Uuid,
    pub waste_type_id: Option<Uuid>,
    #[validate(range(max = 6, message = "day_of_week must be between 0 (Monday) and 6 (Sunday)"))]
    pub day_of_week: u8,
    pub time_window_start: Option<NaiveTime>,
    pub time_window_end: Option<NaiveTime>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct SchedulePatch {
    pub waste_type_id: Option<Uuid>,
    #[validate(range(max = 6, message = "day_of_week must be between 0 (Monday) and 6 (Sunday)"))]
    pub day_of_week: Option<u8>,
    pub time_window_start: Option<NaiveTime>,
    pub time_window_end: Option<NaiveTime>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct IssueInput {
    pub address_id: Uuid,
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct IssuePatch {
    #[validate(length(max = 2000))]
    pub description: Option<String>,
}

fn schedule_window(input: &ScheduleInput) -> std::result::Result<(), ValidationError> {
    validate_time_window(input.time_window_start, input.time_window_end)
}

/// Owner of `address` when the caller may use it: their own, or any for
/// elevated roles.
fn address_owner(t: &Tables, caller: &Caller, address: Uuid) -> Result<Uuid> {
    match t.addresses.get(&address) {
        Some(a) if a.user == caller.id() || caller.is_elevated() => Ok(a.user),
        _ => Err(ApiError::not_found("Address")),
    }
}

fn known_waste_type(t: &Tables, waste_type: Option<Uuid>) -> Result<()> {
    match waste_type {
        Some(id) if !t.waste_types.contains_key(&id) => Err(ApiError::not_found("Waste type")),
        _ => Ok(()),
    }
}

pub struct WasteService<'a> {
    storage: &'a InMemoryStorage,
}

impl<'a> WasteService<'a> {
    pub fn new(storage: &'a InMemoryStorage) -> Self {
        Self { storage }
    }

    // Waste types

    pub fn list_waste_types(&self) -> Vec<WasteType> {
        let mut types: Vec<WasteType> = self.storage.read(|t| t.waste_types.values().cloned().collect());
        types.sort_by(|a, b| a.name.cmp(&b.name));
        types
    }

    pub fn get_waste_type(&self, id: Uuid) -> Result<WasteType> {
        self.storage
            .read(|t| t.waste_types.get(&id).cloned())
            .ok_or_else(|| ApiError::not_found("Waste type"))
    }

    pub fn create_waste_type(&self, caller: &Caller, input: WasteTypeInput) -> Result<WasteType> {
        caller.require_elevated()?;
        input.validate()?;
        let waste_type = WasteType {
            id: Uuid::new_v4(),
            name: input.name.trim().to_string(),
            description: input.description.trim().to_string(),
        };
        self.storage.write(|t| {
            if t.waste_types.values().any(|w| w.name.eq_ignore_ascii_case(&waste_type.name)) {
                return Err(ApiError::Conflict("A waste type with that name already exists.".to_string()));
            }
            t.waste_types.insert(waste_type.id, waste_type.clone());
            Ok::<_, ApiError>(())
        })?;
        Ok(waste_type)
    }

    pub fn update_waste_type(&self, caller: &Caller, id: Uuid, patch: WasteTypePatch) -> Result<WasteType> {
        caller.require_elevated()?;
        patch.validate()?;
        self.storage.write(|t| {
            let waste_type = t.waste_types.get_mut(&id).ok_or_else(|| ApiError::not_found("Waste type"))?;
            if let Some(name) = patch.name {
                waste_type.name = name.trim().to_string();
            }
            if let Some(description) = patch.description {
                waste_type.description = description.trim().to_string();
            }
            Ok(waste_type.clone())
        })
    }

    /// Requests and schedules keep existing but lose their classification.
    pub fn delete_waste_type(&self, caller: &Caller, id: Uuid) -> Result<()> {
        caller.require_elevated()?;
        self.storage.write(|t| {
            if t.waste_types.remove(&id).is_none() {
                return Err(ApiError::not_found("Waste type"));
            }
            for pickup in t.pickups.values_mut().filter(|p| p.waste_type == Some(id)) {
                pickup.waste_type = None;
            }
            for schedule in t.recurrence_schedules.values_mut().filter(|s| s.waste_type == Some(id)) {
                schedule.waste_type = None;
            }
            Ok(())
        })
    }

    // Recurrence schedules

    pub fn list_schedules(&self, caller: &Caller) -> Vec<RecurrenceSchedule> {
        let mut schedules: Vec<RecurrenceSchedule> = self.storage.read(|t| {
            t.recurrence_schedules
                .values()
                .filter(|s| caller.is_elevated() || s.user == caller.id())
                .cloned()
                .collect()
        });
        schedules.sort_by(|a, b| (a.day_of_week, a.created_at).cmp(&(b.day_of_week, b.created_at)));
        schedules
    }

    pub fn get_schedule(&self, caller: &Caller, id: Uuid) -> Result<RecurrenceSchedule> {
        self.storage
            .read(|t| t.recurrence_schedules.get(&id).cloned())
            .filter(|s| caller.is_elevated() || s.user == caller.id())
            .ok_or_else(|| ApiError::not_found("Recurrence schedule"))
    }

    pub fn create_schedule(&self, caller: &Caller, input: ScheduleInput) -> Result<RecurrenceSchedule> {
        input.validate()?;
        let mut schedule = RecurrenceSchedule {
            id: Uuid::new_v4(),
            user: caller.id(),
            address: input.address_id,
            waste_type: input.waste_type_id,
            day_of_week: input.day_of_week,
            time_window_start: input.time_window_start,
            time_window_end: input.time_window_end,
            active: input.active.unwrap_or(true),
            created_at: Utc::now(),
        };
        self.storage.write(|t| {
            // Generated requests belong to whoever lives at the address
            schedule.user = address_owner(t, caller, schedule.address)?;
            known_waste_type(t, schedule.waste_type)?;
            t.recurrence_schedules.insert(schedule.id, schedule.clone());
            Ok::<_, ApiError>(())
        })?;
        info!(schedule_id = %schedule.id, day = schedule.day_of_week, "Created recurrence schedule");
        Ok(schedule)
    }

    pub fn update_schedule(&self, caller: &Caller, id: Uuid, patch: SchedulePatch) -> Result<RecurrenceSchedule> {
        patch.validate()?;
        self.storage.write(|t| {
            known_waste_type(t, patch.waste_type_id)?;
            let current = t
                .recurrence_schedules
                .get(&id)
                .filter(|s| caller.is_elevated() || s.user == caller.id())
                .ok_or_else(|| ApiError::not_found("Recurrence schedule"))?;

            let mut updated = current.clone();
            if patch.waste_type_id.is_some() {
                updated.waste_type = patch.waste_type_id;
            }
            if let Some(day) = patch.day_of_week {
                updated.day_of_week = day;
            }
            if patch.time_window_start.is_some() {
                updated.time_window_start = patch.time_window_start;
            }
            if patch.time_window_end.is_some() {
                updated.time_window_end = patch.time_window_end;
            }
            if let Some(active) = patch.active {
                updated.active = active;
            }
            validate_time_window(updated.time_window_start, updated.time_window_end)?;

            t.recurrence_schedules.insert(id, updated.clone());
            Ok(updated)
        })
    }

    /// Generated requests keep their link to the deleted schedule.
    pub fn delete_schedule(&self, caller: &Caller, id: Uuid) -> Result<()> {
        self.storage.write(|t| {
            t.recurrence_schedules
                .get(&id)
                .filter(|s| caller.is_elevated() || s.user == caller.id())
                .ok_or_else(|| ApiError::not_found("Recurrence schedule"))?;
            t.recurrence_schedules.remove(&id);
            Ok(())
        })
    }

    /// Create one request for every active schedule falling on `date`.
    /// Schedules that already produced a request for that date are skipped,
    /// so running this twice for the same day creates nothing new.
    pub fn generate_for_date(&self, caller: &Caller, date: NaiveDate) -> Result<Vec<PickupRequest>> {
        caller.require_elevated()?;
        let weekday = date.weekday().num_days_from_monday() as u8;
        let now = Utc::now();
        let default_time = NaiveTime::from_hms_opt(DEFAULT_COLLECTION_TIME.0, DEFAULT_COLLECTION_TIME.1, 0)
            .ok_or_else(|| ApiError::Internal("invalid default collection time".to_string()))?;

        let created = self.storage.write(|t| {
            let mut due: Vec<RecurrenceSchedule> = t
                .recurrence_schedules
                .values()
                .filter(|s| s.active && s.day_of_week == weekday)
                .filter(|s| t.addresses.contains_key(&s.address))
                .filter(|s| {
                    !t.pickups
                        .values()
                        .any(|p| p.recurrence == Some(s.id) && p.scheduled_time.date_naive() == date)
                })
                .cloned()
                .collect();
            due.sort_by(|a, b| a.created_at.cmp(&b.created_at));

            let created: Vec<PickupRequest> = due
                .into_iter()
                .map(|s| {
                    let time = s.time_window_start.unwrap_or(default_time);
                    PickupRequest {
                        id: Uuid::new_v4(),
                        requester: s.user,
                        address: s.address,
                        waste_type: s.waste_type,
                        scheduled_time: date.and_time(time).and_utc(),
                        time_window_start: s.time_window_start,
                        time_window_end: s.time_window_end,
                        description: "Recurring pickup".to_string(),
                        estimated_weight_kg: None,
                        status: RequestStatus::Requested,
                        assigned_driver: None,
                        assigned_vehicle: None,
                        cancelled_reason: String::new(),
                        recurrence: Some(s.id),
                        created_at: now,
                        updated_at: now,
                    }
                })
                .collect();
            for pickup in &created {
                t.pickups.insert(pickup.id, pickup.clone());
            }
            Ok::<_, ApiError>(created)
        })?;

        for _ in &created {
            metrics::pickup_submitted();
        }
        info!(%date, count = created.len(), "Generated recurring pickups");
        Ok(created)
    }

    // Issue reports

    pub fn list_issues(&self, caller: &Caller) -> Vec<IssueReport> {
        let mut issues: Vec<IssueReport> = self.storage.read(|t| {
            t.issue_reports
                .values()
                .filter(|r| caller.is_elevated() || r.user == caller.id())
                .cloned()
                .collect()
        });
        issues.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        issues
    }

    pub fn get_issue(&self, caller: &Caller, id: Uuid) -> Result<IssueReport> {
        self.storage
            .read(|t| t.issue_reports.get(&id).cloned())
            .filter(|r| caller.is_elevated() || r.user == caller.id())
            .ok_or_else(|| ApiError::not_found("Issue report"))
    }

    pub fn create_issue(&self, caller: &Caller, input: IssueInput) -> Result<IssueReport> {
        input.validate()?;
        let now = Utc::now();
        let report = IssueReport {
            id: Uuid::new_v4(),
            user: caller.id(),
            address: input.address_id,
            issue_type: input.issue_type,
            description: input.description.trim().to_string(),
            status: IssueStatus::Open,
            created_at: now,
            updated_at: now,
        };
        self.storage.write(|t| {
            address_owner(t, caller, report.address)?;
            t.issue_reports.insert(report.id, report.clone());
            Ok::<_, ApiError>(())
        })?;
        info!(issue_id = %report.id, issue_type = ?report.issue_type, "Issue reported");
        Ok(report)
    }

    pub fn update_issue(&self, caller: &Caller, id: Uuid, patch: IssuePatch) -> Result<IssueReport> {
        patch.validate()?;
        self.storage.write(|t| {
            let report = t
                .issue_reports
                .get_mut(&id)
                .filter(|r| caller.is_elevated() || r.user == caller.id())
                .ok_or_else(|| ApiError::not_found("Issue report"))?;
            if let Some(description) = patch.description {
                report.description = description.trim().to_string();
                report.updated_at = Utc::now();
            }
            Ok(report.clone())
        })
    }

    pub fn delete_issue(&self, caller: &Caller, id: Uuid) -> Result<()> {
        self.storage.write(|t| {
            t.issue_reports
                .get(&id)
                .filter(|r| caller.is_elevated() || r.user == caller.id())
                .ok_or_else(|| ApiError::not_found("Issue report"))?;
            t.issue_reports.remove(&id);
            Ok(())
        })
    }

    pub fn change_issue_status(&self, caller: &Caller, id: Uuid, status: &str) -> Result<IssueReport> {
        caller.require_elevated()?;
        let status: IssueStatus = parse_choice(status)
            .ok_or_else(|| ApiError::bad_request(format!("\"{status}\" is not a valid issue status.")))?;
        self.storage.write(|t| {
            let report = t.issue_reports.get_mut(&id).ok_or_else(|| ApiError::not_found("Issue report"))?;
            report.status = status;
            report.updated_at = Utc::now();
            Ok(report.clone())
        })
    }
}
