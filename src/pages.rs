//! Server-rendered page shells.
//!
//! Each page runs the access guard through [`PageGuard`] before touching the
//! store: no session sends the browser to `/`, a missing role to
//! `/dashboard`.

use std::fmt;

use askama::Template;
use axum::extract::State;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use axum_extra::extract::cookie::CookieJar;

use crate::app::AppState;
use crate::authz::policies::{AdminOnly, Authenticated, PhotoTeam, SalesTeam};
use crate::authz::PageGuard;
use crate::errors::AppResult;
use crate::models::sale::{Sale, SaleStats};
use crate::models::user::Profile;
use crate::roles::roles_for_display;
use crate::routes::admin_users::{fetch_all_profiles, fetch_profile};
use crate::routes::sales::fetch_all_sales;
use crate::session::MaybeSession;
use crate::utils::utc_now;

pub const THEME_COOKIE: &str = "theme";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(login_page))
        .route("/dashboard", get(dashboard))
        .route("/dashboard/ventas", get(sales_page))
        .route("/dashboard/photos", get(photos_page))
        .route("/dashboard/admin/users", get(users_page))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn from_cookies(jar: &CookieJar) -> Self {
        match jar.get(THEME_COOKIE).map(|c| c.value()) {
            Some("dark") => Theme::Dark,
            _ => Theme::Light,
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        })
    }
}

/// Which sections the navigation offers; computed from the held roles.
#[derive(Debug, Clone, Copy, Default)]
pub struct Nav {
    pub sales: bool,
    pub photos: bool,
    pub admin: bool,
}

impl Nav {
    fn for_grant(grant: &crate::authz::Grant) -> Self {
        use crate::authz::holds_any_role;
        use crate::authz::role_names::{ADMIN, ASESOR, FOTOGRAFO, SUPERVISOR};

        Self {
            sales: holds_any_role(&grant.roles, &[ADMIN, SUPERVISOR, ASESOR]),
            photos: holds_any_role(&grant.roles, &[ADMIN, FOTOGRAFO]),
            admin: grant.is_admin(),
        }
    }
}

#[derive(Template)]
#[template(path = "login.html")]
struct LoginTemplate {
    theme: Theme,
}

#[derive(Template)]
#[template(path = "dashboard.html")]
struct DashboardTemplate {
    theme: Theme,
    nav: Nav,
    user_name: String,
    roles: Vec<String>,
    stock_count: i64,
    sales_count: i64,
    pending_deliveries: i64,
}

#[derive(Template)]
#[template(path = "ventas.html")]
struct SalesTemplate {
    theme: Theme,
    nav: Nav,
    stats: SaleStats,
    rows: Vec<SaleRow>,
}

struct SaleRow {
    sale_date: String,
    license_plate: String,
    model: String,
    client_name: String,
    advisor: String,
    price: String,
}

impl From<&Sale> for SaleRow {
    fn from(sale: &Sale) -> Self {
        Self {
            sale_date: sale.sale_date.format("%d/%m/%Y").to_string(),
            license_plate: sale.license_plate.clone(),
            model: sale.model.clone(),
            client_name: sale.client_name.clone(),
            advisor: sale.advisor_name.clone().unwrap_or_else(|| "-".to_string()),
            price: sale.price.map(|p| format!("{p:.0} €")).unwrap_or_else(|| "-".to_string()),
        }
    }
}

#[derive(Template)]
#[template(path = "photos.html")]
struct PhotosTemplate {
    theme: Theme,
    nav: Nav,
    pending: Vec<PendingPhotoRow>,
}

#[derive(sqlx::FromRow)]
struct PendingPhotoRow {
    license_plate: String,
    model: String,
    status: String,
}

#[derive(Template)]
#[template(path = "admin_users.html")]
struct UsersTemplate {
    theme: Theme,
    nav: Nav,
    users: Vec<UserRow>,
}

struct UserRow {
    full_name: String,
    email: String,
    role: String,
}

impl From<Profile> for UserRow {
    fn from(profile: Profile) -> Self {
        Self {
            full_name: profile.full_name,
            email: profile.email,
            role: profile.role.unwrap_or_else(|| "-".to_string()),
        }
    }
}

/// Public login page; a signed-in visitor goes straight to the dashboard.
pub async fn login_page(MaybeSession(session): MaybeSession, jar: CookieJar) -> AppResult<Response> {
    if session.is_some() {
        return Ok(Redirect::to("/dashboard").into_response());
    }

    let page = LoginTemplate {
        theme: Theme::from_cookies(&jar),
    };
    Ok(Html(page.render()?).into_response())
}

pub async fn dashboard(
    State(state): State<AppState>,
    guard: PageGuard<Authenticated>,
    jar: CookieJar,
) -> AppResult<Html<String>> {
    let profile = fetch_profile(&state.pool, guard.user_id()).await?;
    let roles = roles_for_display(state.roles.as_ref(), guard.user_id()).await;

    let stock_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vehicles WHERE status != 'vendido'")
        .fetch_one(&state.pool)
        .await?;
    let sales_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sales")
        .fetch_one(&state.pool)
        .await?;
    let pending_deliveries: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM deliveries WHERE status = 'pendiente'")
        .fetch_one(&state.pool)
        .await?;

    let page = DashboardTemplate {
        theme: Theme::from_cookies(&jar),
        nav: Nav::for_grant(&guard),
        user_name: profile.alias.unwrap_or(profile.full_name),
        roles,
        stock_count,
        sales_count,
        pending_deliveries,
    };
    Ok(Html(page.render()?))
}

pub async fn sales_page(
    State(state): State<AppState>,
    guard: PageGuard<SalesTeam>,
    jar: CookieJar,
) -> AppResult<Html<String>> {
    let sales = fetch_all_sales(&state.pool).await?;

    let page = SalesTemplate {
        theme: Theme::from_cookies(&jar),
        nav: Nav::for_grant(&guard),
        stats: SaleStats::compute(&sales, utc_now().date_naive()),
        rows: sales.iter().map(SaleRow::from).collect(),
    };
    Ok(Html(page.render()?))
}

pub async fn photos_page(
    State(state): State<AppState>,
    guard: PageGuard<PhotoTeam>,
    jar: CookieJar,
) -> AppResult<Html<String>> {
    let pending = sqlx::query_as::<_, PendingPhotoRow>(
        "SELECT license_plate, model, status FROM vehicles WHERE photos_completed = 0 ORDER BY entry_date IS NULL, entry_date",
    )
    .fetch_all(&state.pool)
    .await?;

    let page = PhotosTemplate {
        theme: Theme::from_cookies(&jar),
        nav: Nav::for_grant(&guard),
        pending,
    };
    Ok(Html(page.render()?))
}

pub async fn users_page(
    State(state): State<AppState>,
    guard: PageGuard<AdminOnly>,
    jar: CookieJar,
) -> AppResult<Html<String>> {
    let users = fetch_all_profiles(&state.pool).await?;

    let page = UsersTemplate {
        theme: Theme::from_cookies(&jar),
        nav: Nav::for_grant(&guard),
        users: users.into_iter().map(UserRow::from).collect(),
    };
    Ok(Html(page.render()?))
}
