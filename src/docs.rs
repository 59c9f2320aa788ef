use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Map, Value};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::errors::AppError;
use crate::models;
use crate::routes;
use crate::session::SESSION_COOKIE;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::health::health,
        routes::auth::login,
        routes::auth::me,
        routes::auth::refresh,
        routes::auth::logout,
        routes::auth::clear_cookies,
        routes::vehicles::list_vehicles,
        routes::vehicles::get_vehicle,
        routes::vehicles::create_vehicle,
        routes::vehicles::update_vehicle,
        routes::vehicles::delete_vehicle,
        routes::vehicles::update_photos,
        routes::sales::list_sales,
        routes::sales::sales_stats,
        routes::sales::get_sale,
        routes::sales::create_sale,
        routes::sales::update_sale,
        routes::deliveries::list_deliveries,
        routes::deliveries::get_delivery,
        routes::deliveries::create_delivery,
        routes::deliveries::update_delivery,
        routes::photos::list_assignments,
        routes::photos::update_assignment,
        routes::conversations::get_conversations,
        routes::conversations::save_conversation,
        routes::conversations::delete_conversations,
        routes::notifications::list_notifications,
        routes::notifications::mark_read,
        routes::notifications::subscribe,
        routes::notifications::unsubscribe,
        routes::notifications::broadcast,
        routes::visits::list_advisors,
        routes::visits::create_advisor,
        routes::visits::update_advisor,
        routes::visits::get_config,
        routes::visits::update_config,
        routes::visits::next_advisor,
        routes::visits::list_assignments,
        routes::support::create_ticket,
        routes::support::list_tickets,
        routes::support::respond,
        routes::admin_users::list_users,
        routes::admin_users::create_user,
        routes::admin_users::update_user,
        routes::admin_users::set_user_role,
        routes::admin_users::delete_user,
        routes::admin_roles::list_roles,
        routes::admin_roles::create_role,
        routes::admin_roles::add_viewer_role,
        routes::admin_roles::delete_role,
        routes::admin_roles::list_permissions,
        routes::admin_roles::assign_permission_to_role,
        routes::admin_roles::list_activity
    ),
    components(
        schemas(
            routes::health::HealthResponse,
            routes::health::Integrations,
            routes::auth::UserBody,
            routes::auth::RefreshBody,
            models::user::Profile,
            models::user::LoginRequest,
            models::user::CreateUserRequest,
            models::user::UpdateUserRequest,
            models::user::SetRoleRequest,
            models::user::SessionUser,
            models::rbac::Role,
            models::rbac::RoleCreateRequest,
            models::rbac::Permission,
            models::rbac::RolePermission,
            models::rbac::AssignPermissionToRoleRequest,
            models::vehicle::Vehicle,
            models::vehicle::VehicleCreateRequest,
            models::vehicle::VehicleUpdateRequest,
            models::vehicle::PhotosUpdateRequest,
            models::sale::Sale,
            models::sale::SaleCreateRequest,
            models::sale::SaleUpdateRequest,
            models::sale::SaleStats,
            models::delivery::Delivery,
            models::delivery::DeliveryCreateRequest,
            models::delivery::DeliveryUpdateRequest,
            models::photo::PhotoAssignment,
            models::photo::PhotoAssignmentList,
            models::photo::PhotoAssignmentUpdateRequest,
            models::photo::PhotoAssignmentUpdated,
            models::conversation::AssistantSession,
            models::conversation::Conversation,
            models::conversation::SaveConversationRequest,
            models::conversation::SavedConversation,
            models::notification::Notification,
            models::notification::SubscriptionKeys,
            models::notification::SubscribeRequest,
            models::notification::UnsubscribeRequest,
            models::notification::PushSubscription,
            models::notification::BroadcastRequest,
            models::notification::BroadcastResult,
            models::visit::Advisor,
            models::visit::AdvisorCreateRequest,
            models::visit::AdvisorUpdateRequest,
            models::visit::VisitQueueConfig,
            models::visit::NextAdvisorRequest,
            models::visit::AssignmentReason,
            models::visit::QueueInfo,
            models::visit::NextAdvisor,
            models::visit::VisitAssignment,
            models::support::SupportTicket,
            models::support::SupportIncident,
            models::support::IncidentInput,
            models::support::CreateTicketRequest,
            models::support::RespondRequest,
            models::support::TicketView,
            models::support::IncidentView,
            models::support::TicketStats,
            models::support::TicketInbox,
            models::activity::ActivityEntry,
            models::activity::ActivityView
        )
    ),
    tags(
        (name = "Health", description = "Liveness and configured integrations"),
        (name = "Auth", description = "Session cookie lifecycle"),
        (name = "Stock", description = "Vehicles in stock"),
        (name = "Sales", description = "Sales and the sales dashboard"),
        (name = "Deliveries", description = "Vehicle handovers"),
        (name = "Photography", description = "Photographer rota"),
        (name = "Assistant", description = "Assistant conversation history"),
        (name = "Notifications", description = "In-app notifications and push subscriptions"),
        (name = "Visits", description = "Showroom visit queue"),
        (name = "Support", description = "After-sale support tickets"),
        (name = "Admin", description = "Users, roles, permissions and activity")
    )
)]
pub struct ApiDoc;

/// Document served at `/api-docs/openapi.json`: the derived paths plus the
/// session cookie scheme and the site as server.
pub fn build_openapi(site_url: &str) -> Result<utoipa::openapi::OpenApi, AppError> {
    let mut doc = serde_json::to_value(ApiDoc::openapi()).map_err(|e| AppError::internal(e.to_string()))?;

    ensure_security_components(&mut doc)?;
    ensure_global_security(&mut doc)?;
    ensure_servers(&mut doc, site_url);

    serde_json::from_value(doc).map_err(|e| AppError::internal(e.to_string()))
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> Result<Router, AppError> {
    let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
        .try_it_out_enabled(true)
        .with_credentials(true);

    let doc_json = Arc::new(serde_json::to_value(&doc).map_err(|e| AppError::internal(e.to_string()))?);

    let json_route = {
        let doc_json = Arc::clone(&doc_json);
        get(move || {
            let doc_json = Arc::clone(&doc_json);
            async move { Json((*doc_json).clone()) }
        })
    };

    Ok(Router::new()
        .route("/api-docs/openapi.json", json_route)
        .merge(SwaggerUi::new("/docs").config(swagger_config)))
}

fn root_object(doc: &mut Value) -> Result<&mut Map<String, Value>, AppError> {
    doc.as_object_mut()
        .ok_or_else(|| AppError::internal("OpenAPI root must be an object"))
}

fn ensure_security_components(doc: &mut Value) -> Result<(), AppError> {
    let components = root_object(doc)?
        .entry("components")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| AppError::internal("components must be an object"))?;

    let schemes = components
        .entry("securitySchemes")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| AppError::internal("securitySchemes must be an object"))?;

    schemes.insert(
        "cookieAuth".to_string(),
        json!({ "type": "apiKey", "in": "cookie", "name": SESSION_COOKIE }),
    );
    schemes.insert(
        "bearerAuth".to_string(),
        json!({ "type": "http", "scheme": "bearer", "bearerFormat": "JWT" }),
    );

    Ok(())
}

fn ensure_global_security(doc: &mut Value) -> Result<(), AppError> {
    root_object(doc)?
        .entry("security")
        .or_insert_with(|| json!([{ "cookieAuth": [] }, { "bearerAuth": [] }]));
    Ok(())
}

fn ensure_servers(doc: &mut Value, site_url: &str) {
    let server_url = site_url.trim_end_matches('/');

    match doc.get_mut("servers") {
        Some(Value::Array(arr)) => {
            let has = arr
                .iter()
                .any(|v| v.get("url").and_then(Value::as_str) == Some(server_url));
            if !has {
                arr.push(json!({ "url": server_url }));
            }
        }
        _ => {
            doc["servers"] = json!([{ "url": server_url }]);
        }
    }
}
