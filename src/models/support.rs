use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::row_parsers::{parse_opt_uuid, parse_uuid};
use crate::errors::{AppError, FieldError};
use crate::events::Loggable;
use crate::validation::{Checks, Validate};

pub const TICKET_OPEN: &str = "abierto";
pub const TICKET_IN_PROGRESS: &str = "en_tramite";
pub const TICKET_CLOSED: &str = "cerrado";

pub const INCIDENT_PENDING: &str = "pendiente";
pub const INCIDENT_IN_PROGRESS: &str = "en_tramite";
pub const INCIDENT_RESOLVED: &str = "resuelto";

/// Statuses an admin response may leave an incident in.
pub const RESPONSE_STATUSES: &[&str] = &[INCIDENT_IN_PROGRESS, INCIDENT_RESOLVED];

pub const TICKET_COLUMNS: &str = "id, ticket_number, sale_id, license_plate, client_dni, client_email, client_phone, sale_date, time_since_sale, status, created_at, updated_at";

pub const INCIDENT_COLUMNS: &str = "id, ticket_id, kind, description, status, admin_response, responded_at, responded_by, created_at";

/// An after-sale support ticket opened by a client for a car they bought.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SupportTicket {
    pub id: Uuid,
    pub ticket_number: String,
    pub sale_id: Option<Uuid>,
    pub license_plate: String,
    pub client_dni: String,
    pub client_email: Option<String>,
    pub client_phone: Option<String>,
    pub sale_date: Option<NaiveDate>,
    /// Human readable age of the sale when the ticket was opened.
    pub time_since_sale: Option<String>,
    pub status: String,
    pub incidents: Vec<SupportIncident>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for SupportTicket {
    fn entity_type() -> &'static str { "support_ticket" }
    fn subject_id(&self) -> Uuid { self.id }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbSupportTicket {
    pub id: String,
    pub ticket_number: String,
    pub sale_id: Option<String>,
    pub license_plate: String,
    pub client_dni: String,
    pub client_email: Option<String>,
    pub client_phone: Option<String>,
    pub sale_date: Option<NaiveDate>,
    pub time_since_sale: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DbSupportTicket {
    pub fn into_ticket(self, incidents: Vec<SupportIncident>) -> Result<SupportTicket, AppError> {
        Ok(SupportTicket {
            id: parse_uuid(&self.id, "support_tickets.id")?,
            sale_id: parse_opt_uuid(self.sale_id.as_deref(), "support_tickets.sale_id")?,
            ticket_number: self.ticket_number,
            license_plate: self.license_plate,
            client_dni: self.client_dni,
            client_email: self.client_email,
            client_phone: self.client_phone,
            sale_date: self.sale_date,
            time_since_sale: self.time_since_sale,
            status: self.status,
            incidents,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SupportIncident {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub kind: String,
    pub description: String,
    pub status: String,
    pub admin_response: Option<String>,
    pub responded_at: Option<DateTime<Utc>>,
    pub responded_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbSupportIncident {
    pub id: String,
    pub ticket_id: String,
    pub kind: String,
    pub description: String,
    pub status: String,
    pub admin_response: Option<String>,
    pub responded_at: Option<DateTime<Utc>>,
    pub responded_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbSupportIncident> for SupportIncident {
    type Error = AppError;

    fn try_from(value: DbSupportIncident) -> Result<Self, Self::Error> {
        Ok(SupportIncident {
            id: parse_uuid(&value.id, "support_incidents.id")?,
            ticket_id: parse_uuid(&value.ticket_id, "support_incidents.ticket_id")?,
            responded_by: parse_opt_uuid(value.responded_by.as_deref(), "support_incidents.responded_by")?,
            kind: value.kind,
            description: value.description,
            status: value.status,
            admin_response: value.admin_response,
            responded_at: value.responded_at,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct IncidentInput {
    pub kind: String,
    #[serde(default)]
    pub description: String,
}

/// Opened from the client portal; the plate and DNI must match a sale.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTicketRequest {
    pub license_plate: String,
    pub client_dni: String,
    pub client_email: Option<String>,
    pub client_phone: Option<String>,
    pub incidents: Vec<IncidentInput>,
}

impl Validate for CreateTicketRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut checks = Checks::new();
        checks
            .required("license_plate", &self.license_plate)
            .required("client_dni", &self.client_dni);
        if self.incidents.is_empty() {
            checks.required("incidents", "");
        }
        for (i, incident) in self.incidents.iter().enumerate() {
            checks.required(&format!("incidents[{i}].kind"), &incident.kind);
        }
        checks.finish()
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RespondRequest {
    pub incident_id: Uuid,
    pub response: String,
    /// `en_tramite` (default) or `resuelto`.
    pub status: Option<String>,
}

impl Validate for RespondRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        Checks::new()
            .required("response", &self.response)
            .one_of("status", self.status.as_deref(), RESPONSE_STATUSES)
            .finish()
    }
}

/// Body of the ticket endpoints.
#[derive(Debug, Serialize)]
pub struct TicketBody {
    pub ticket: SupportTicket,
}

/// A ticket as the admin inbox shows it: support tickets plus delivery
/// handovers that recorded incidents.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TicketView {
    pub id: String,
    pub source: String,
    pub ticket_number: String,
    pub license_plate: String,
    pub status: String,
    pub client_email: Option<String>,
    pub client_phone: Option<String>,
    pub time_since_sale: Option<String>,
    pub incidents: Vec<IncidentView>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IncidentView {
    pub id: String,
    pub kind: String,
    pub description: String,
    pub status: String,
    pub admin_response: Option<String>,
    pub responded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct TicketStats {
    pub soporte: i64,
    pub entregas: i64,
    pub total: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TicketInbox {
    pub tickets: Vec<TicketView>,
    pub stats: TicketStats,
}

impl From<SupportTicket> for TicketView {
    fn from(ticket: SupportTicket) -> Self {
        TicketView {
            id: ticket.id.to_string(),
            source: "soporte".to_string(),
            incidents: ticket
                .incidents
                .into_iter()
                .map(|incident| IncidentView {
                    id: incident.id.to_string(),
                    kind: incident.kind,
                    description: incident.description,
                    status: incident.status,
                    admin_response: incident.admin_response,
                    responded_at: incident.responded_at,
                })
                .collect(),
            ticket_number: ticket.ticket_number,
            license_plate: ticket.license_plate,
            status: ticket.status,
            client_email: ticket.client_email,
            client_phone: ticket.client_phone,
            time_since_sale: ticket.time_since_sale,
            created_at: ticket.created_at,
        }
    }
}
