use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::db::row_parsers::{parse_opt_uuid, parse_string_list, parse_uuid};
use crate::errors::{AppError, FieldError};
use crate::events::Loggable;
use crate::validation::{Checks, Validate};

/// Kinds of showroom visit an advisor can be specialised in.
pub const VISIT_TYPES: &[&str] = &["COCHE_VN", "COCHE_VO", "MOTO_VN", "MOTO_VO"];

pub const ADVISOR_COLUMNS: &str = "id, profile_id, full_name, email, phone, office_location, desk_number, specialization, is_active, is_on_vacation, current_turn_priority, total_visits, visits_today, last_visit_date, created_at, updated_at";

pub const ASSIGNMENT_COLUMNS: &str = "id, advisor_id, advisor_name, visit_type, client_name, client_phone, had_appointment, appointment_with, reason, assigned_by, assigned_by_name, status, created_at";

/// A sales advisor in the showroom rotation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Advisor {
    pub id: Uuid,
    pub profile_id: Option<Uuid>,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub office_location: Option<String>,
    pub desk_number: Option<String>,
    pub specialization: Vec<String>,
    pub is_active: bool,
    pub is_on_vacation: bool,
    pub current_turn_priority: i64,
    pub total_visits: i64,
    /// Visits on `last_visit_date`; stale once that date has passed.
    pub visits_today: i64,
    pub last_visit_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Advisor {
    /// Visits counted against `today`, zero when the counter is from an
    /// earlier day.
    pub fn visits_on(&self, today: NaiveDate) -> i64 {
        match self.last_visit_date {
            Some(date) if date == today => self.visits_today,
            _ => 0,
        }
    }

    pub fn can_take(&self, visit_type: &str) -> bool {
        self.is_active && !self.is_on_vacation && self.specialization.iter().any(|s| s == visit_type)
    }
}

impl Loggable for Advisor {
    fn entity_type() -> &'static str { "advisor" }
    fn subject_id(&self) -> Uuid { self.id }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbAdvisor {
    pub id: String,
    pub profile_id: Option<String>,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub office_location: Option<String>,
    pub desk_number: Option<String>,
    pub specialization: String,
    pub is_active: bool,
    pub is_on_vacation: bool,
    pub current_turn_priority: i64,
    pub total_visits: i64,
    pub visits_today: i64,
    pub last_visit_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbAdvisor> for Advisor {
    type Error = AppError;

    fn try_from(value: DbAdvisor) -> Result<Self, Self::Error> {
        Ok(Advisor {
            id: parse_uuid(&value.id, "advisors.id")?,
            profile_id: parse_opt_uuid(value.profile_id.as_deref(), "advisors.profile_id")?,
            specialization: parse_string_list(&value.specialization),
            full_name: value.full_name,
            email: value.email,
            phone: value.phone,
            office_location: value.office_location,
            desk_number: value.desk_number,
            is_active: value.is_active,
            is_on_vacation: value.is_on_vacation,
            current_turn_priority: value.current_turn_priority,
            total_visits: value.total_visits,
            visits_today: value.visits_today,
            last_visit_date: value.last_visit_date,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

fn check_visit_types(checks: &mut Checks, types: &[String]) {
    for visit_type in types {
        checks.one_of("specialization", Some(visit_type.as_str()), VISIT_TYPES);
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AdvisorCreateRequest {
    pub full_name: String,
    pub profile_id: Option<Uuid>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub office_location: Option<String>,
    pub desk_number: Option<String>,
    #[serde(default)]
    pub specialization: Vec<String>,
}

impl Validate for AdvisorCreateRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut checks = Checks::new();
        checks.required("full_name", &self.full_name);
        check_visit_types(&mut checks, &self.specialization);
        checks.finish()
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct AdvisorUpdateRequest {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub office_location: Option<String>,
    pub desk_number: Option<String>,
    pub specialization: Option<Vec<String>>,
    pub is_active: Option<bool>,
    pub is_on_vacation: Option<bool>,
}

impl Validate for AdvisorUpdateRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut checks = Checks::new();
        if let Some(types) = &self.specialization {
            check_visit_types(&mut checks, types);
        }
        checks.finish()
    }
}

/// Daily cap on visits per advisor, applied only when enabled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, FromRow)]
pub struct VisitQueueConfig {
    pub enable_daily_limit: bool,
    pub max_visits_per_advisor_per_day: Option<i64>,
}

impl VisitQueueConfig {
    pub fn daily_limit(&self) -> Option<i64> {
        self.max_visits_per_advisor_per_day
            .filter(|max| self.enable_daily_limit && *max > 0)
    }
}

impl Validate for VisitQueueConfig {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut checks = Checks::new();
        if let Some(max) = self.max_visits_per_advisor_per_day {
            checks.range_i64("max_visits_per_advisor_per_day", max, 1, 1000);
        }
        checks.finish()
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct NextAdvisorRequest {
    pub visit_type: String,
    pub client_name: Option<String>,
    pub client_phone: Option<String>,
    #[serde(default)]
    pub had_appointment: bool,
    pub appointment_with: Option<String>,
}

impl Validate for NextAdvisorRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        Checks::new()
            .one_of("visit_type", Some(self.visit_type.as_str()), VISIT_TYPES)
            .finish()
    }
}

/// Why a visit went to its advisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentReason {
    HadAppointment,
    NextInQueue,
}

impl AssignmentReason {
    pub fn as_str(self) -> &'static str {
        match self {
            AssignmentReason::HadAppointment => "had_appointment",
            AssignmentReason::NextInQueue => "next_in_queue",
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QueueInfo {
    pub total_available: i64,
    pub position_in_queue: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct NextAdvisor {
    pub advisor: Advisor,
    pub visit_type: String,
    pub reason: AssignmentReason,
    pub assignment_id: Uuid,
    pub queue_info: QueueInfo,
}

/// One recorded hand-off of a visit to an advisor.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VisitAssignment {
    pub id: Uuid,
    pub advisor_id: Uuid,
    pub advisor_name: String,
    pub visit_type: String,
    pub client_name: Option<String>,
    pub client_phone: Option<String>,
    pub had_appointment: bool,
    pub appointment_with: Option<String>,
    pub reason: String,
    pub assigned_by: Option<Uuid>,
    pub assigned_by_name: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl Loggable for VisitAssignment {
    fn entity_type() -> &'static str { "visit_assignment" }
    fn subject_id(&self) -> Uuid { self.id }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbVisitAssignment {
    pub id: String,
    pub advisor_id: String,
    pub advisor_name: String,
    pub visit_type: String,
    pub client_name: Option<String>,
    pub client_phone: Option<String>,
    pub had_appointment: bool,
    pub appointment_with: Option<String>,
    pub reason: String,
    pub assigned_by: Option<String>,
    pub assigned_by_name: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbVisitAssignment> for VisitAssignment {
    type Error = AppError;

    fn try_from(value: DbVisitAssignment) -> Result<Self, Self::Error> {
        Ok(VisitAssignment {
            id: parse_uuid(&value.id, "visit_assignments.id")?,
            advisor_id: parse_uuid(&value.advisor_id, "visit_assignments.advisor_id")?,
            assigned_by: parse_opt_uuid(value.assigned_by.as_deref(), "visit_assignments.assigned_by")?,
            advisor_name: value.advisor_name,
            visit_type: value.visit_type,
            client_name: value.client_name,
            client_phone: value.client_phone,
            had_appointment: value.had_appointment,
            appointment_with: value.appointment_with,
            reason: value.reason,
            assigned_by_name: value.assigned_by_name,
            status: value.status,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct AssignmentQuery {
    /// Only assignments created on this day.
    pub date: Option<NaiveDate>,
    pub advisor_id: Option<Uuid>,
}
