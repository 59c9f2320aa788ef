//! Access guard: session + requirement -> decision.
//!
//! Decisions are computed per request with fresh role lookups. API routes
//! turn a denial into 401/403 ([`Guarded`]); pages turn it into a redirect
//! ([`PageGuard`]). There is no mode that skips the check.

mod evaluator;
mod guard;

pub use evaluator::{holds_admin, holds_any_role, role_matches};
pub use guard::{Guarded, PageGuard};

use std::collections::BTreeSet;

use crate::errors::AppError;
use crate::roles::{permissions_for_authorization, roles_for_authorization, RoleResolver};
use crate::session::Session;

/// Role names with special meaning to the guard and the seed data.
pub mod role_names {
    pub const ADMIN: &str = "admin";
    pub const SUPERVISOR: &str = "supervisor";
    pub const ASESOR: &str = "asesor";
    pub const FOTOGRAFO: &str = "fotografo";
    pub const VIEWER: &str = "viewer";
}

pub mod permissions {
    pub const VEHICLES_WRITE: &str = "vehicles.write";
    pub const SALES_WRITE: &str = "sales.write";
    pub const DELIVERIES_WRITE: &str = "deliveries.write";
    pub const PHOTOS_UPDATE: &str = "photos.update";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Any authenticated principal.
    Session,
    /// At least one of the listed roles.
    AnyRole(&'static [&'static str]),
    /// The named permission, through a role grant. Admins hold every permission.
    Permission(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    NoSession,
    MissingRole,
    MissingPermission,
}

impl DenyReason {
    pub fn into_error(self) -> AppError {
        match self {
            DenyReason::NoSession => AppError::unauthorized("no valid session"),
            DenyReason::MissingRole => AppError::forbidden("insufficient role"),
            DenyReason::MissingPermission => AppError::forbidden("missing permission"),
        }
    }
}

/// What an allowed request carries into the handler.
#[derive(Debug, Clone)]
pub struct Grant {
    pub session: Session,
    pub roles: BTreeSet<String>,
}

impl Grant {
    pub fn user_id(&self) -> uuid::Uuid {
        self.session.principal.id
    }

    pub fn is_admin(&self) -> bool {
        holds_admin(&self.roles)
    }
}

#[derive(Debug, Clone)]
pub enum Decision {
    Allow(Grant),
    Deny(DenyReason),
}

pub async fn authorize(session: Option<Session>, requirement: Requirement, resolver: &dyn RoleResolver) -> Decision {
    let Some(session) = session else {
        tracing::debug!(?requirement, "denied: no session");
        return Decision::Deny(DenyReason::NoSession);
    };

    let user_id = session.principal.id;
    let roles = roles_for_authorization(resolver, user_id).await;

    let verdict = match requirement {
        Requirement::Session => Ok(()),
        Requirement::AnyRole(required) => {
            if holds_any_role(&roles, required) {
                Ok(())
            } else {
                Err(DenyReason::MissingRole)
            }
        }
        Requirement::Permission(name) => {
            if holds_admin(&roles) || permissions_for_authorization(resolver, user_id).await.contains(name) {
                Ok(())
            } else {
                Err(DenyReason::MissingPermission)
            }
        }
    };

    match verdict {
        Ok(()) => Decision::Allow(Grant { session, roles }),
        Err(reason) => {
            tracing::debug!(user_id = %user_id, ?requirement, ?reason, "denied");
            Decision::Deny(reason)
        }
    }
}

/// Route requirements as types, so a handler states its policy in its
/// signature.
pub mod policies {
    use super::permissions::*;
    use super::role_names::*;
    use super::Requirement;

    pub trait Policy: Send + Sync + 'static {
        const REQUIREMENT: Requirement;
    }

    macro_rules! policy {
        ($name:ident, $req:expr) => {
            #[derive(Debug, Clone, Copy)]
            pub struct $name;

            impl Policy for $name {
                const REQUIREMENT: Requirement = $req;
            }
        };
    }

    policy!(Authenticated, Requirement::Session);
    policy!(AdminOnly, Requirement::AnyRole(&[ADMIN]));
    policy!(SalesTeam, Requirement::AnyRole(&[ADMIN, SUPERVISOR, ASESOR]));
    policy!(PhotoTeam, Requirement::AnyRole(&[ADMIN, FOTOGRAFO]));
    policy!(CanEditStock, Requirement::Permission(VEHICLES_WRITE));
    policy!(CanEditSales, Requirement::Permission(SALES_WRITE));
    policy!(CanEditDeliveries, Requirement::Permission(DELIVERIES_WRITE));
    policy!(CanUpdatePhotos, Requirement::Permission(PHOTOS_UPDATE));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppResult;
    use crate::session::Principal;
    use async_trait::async_trait;
    use chrono::Utc;
    use uuid::Uuid;

    struct Fixed {
        roles: &'static [&'static str],
        permissions: &'static [&'static str],
    }

    #[async_trait]
    impl RoleResolver for Fixed {
        async fn fetch_roles(&self, _: Uuid) -> AppResult<BTreeSet<String>> {
            Ok(self.roles.iter().map(|r| r.to_string()).collect())
        }

        async fn fetch_permissions(&self, _: Uuid) -> AppResult<BTreeSet<String>> {
            Ok(self.permissions.iter().map(|p| p.to_string()).collect())
        }
    }

    struct Broken;

    #[async_trait]
    impl RoleResolver for Broken {
        async fn fetch_roles(&self, _: Uuid) -> AppResult<BTreeSet<String>> {
            Err(AppError::internal("store down"))
        }

        async fn fetch_permissions(&self, _: Uuid) -> AppResult<BTreeSet<String>> {
            Err(AppError::internal("store down"))
        }
    }

    fn session() -> Session {
        Session {
            principal: Principal {
                id: Uuid::new_v4(),
                email: "asesor@cvo.example".into(),
            },
            session_id: Uuid::new_v4(),
            issued_at: Utc::now(),
            expires_at: Utc::now(),
        }
    }

    fn is_allowed(decision: &Decision) -> bool {
        matches!(decision, Decision::Allow(_))
    }

    #[tokio::test]
    async fn missing_session_is_always_denied() {
        let resolver = Fixed { roles: &["admin"], permissions: &[] };
        for requirement in [
            Requirement::Session,
            Requirement::AnyRole(&["admin"]),
            Requirement::Permission("sales.write"),
        ] {
            let decision = authorize(None, requirement, &resolver).await;
            assert!(matches!(decision, Decision::Deny(DenyReason::NoSession)));
        }
    }

    #[tokio::test]
    async fn disjoint_roles_are_denied() {
        let resolver = Fixed { roles: &["fotografo"], permissions: &[] };
        let decision = authorize(Some(session()), Requirement::AnyRole(&["admin", "asesor"]), &resolver).await;
        assert!(matches!(decision, Decision::Deny(DenyReason::MissingRole)));
    }

    #[tokio::test]
    async fn localized_admin_name_satisfies_admin() {
        let resolver = Fixed { roles: &["administrador"], permissions: &[] };
        let decision = authorize(Some(session()), Requirement::AnyRole(&["admin"]), &resolver).await;
        assert!(is_allowed(&decision));
    }

    #[tokio::test]
    async fn permission_comes_from_role_grant_or_admin() {
        let asesor = Fixed { roles: &["asesor"], permissions: &["sales.write"] };
        assert!(is_allowed(&authorize(Some(session()), Requirement::Permission("sales.write"), &asesor).await));
        assert!(matches!(
            authorize(Some(session()), Requirement::Permission("vehicles.write"), &asesor).await,
            Decision::Deny(DenyReason::MissingPermission)
        ));

        let admin = Fixed { roles: &["admin"], permissions: &[] };
        assert!(is_allowed(&authorize(Some(session()), Requirement::Permission("vehicles.write"), &admin).await));
    }

    #[tokio::test]
    async fn failed_role_lookup_fails_closed() {
        let decision = authorize(Some(session()), Requirement::AnyRole(&["asesor"]), &Broken).await;
        assert!(matches!(decision, Decision::Deny(DenyReason::MissingRole)));

        let decision = authorize(Some(session()), Requirement::Session, &Broken).await;
        assert!(is_allowed(&decision));
    }

    #[test]
    fn deny_reasons_map_to_401_and_403() {
        use axum::http::StatusCode;
        assert_eq!(DenyReason::NoSession.into_error().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(DenyReason::MissingRole.into_error().status(), StatusCode::FORBIDDEN);
        assert_eq!(DenyReason::MissingPermission.into_error().status(), StatusCode::FORBIDDEN);
    }
}
