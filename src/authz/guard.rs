use std::marker::PhantomData;
use std::ops::Deref;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::response::Redirect;

use super::policies::Policy;
use super::{authorize, Decision, DenyReason, Grant};
use crate::app::AppState;
use crate::session::MaybeSession;

/// API guard: runs policy `P` before the handler body; denial is 401 or 403.
#[derive(Debug, Clone)]
pub struct Guarded<P: Policy> {
    grant: Grant,
    _policy: PhantomData<P>,
}

impl<P: Policy> Guarded<P> {
    pub fn into_grant(self) -> Grant {
        self.grant
    }
}

impl<P: Policy> Deref for Guarded<P> {
    type Target = Grant;

    fn deref(&self) -> &Self::Target {
        &self.grant
    }
}

async fn decide<P: Policy>(parts: &mut Parts, state: &AppState) -> Decision {
    let MaybeSession(session) = match MaybeSession::from_request_parts(parts, state).await {
        Ok(session) => session,
        Err(never) => match never {},
    };
    authorize(session, P::REQUIREMENT, state.roles.as_ref()).await
}

#[async_trait]
impl<P: Policy> FromRequestParts<AppState> for Guarded<P> {
    type Rejection = crate::errors::AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match decide::<P>(parts, state).await {
            Decision::Allow(grant) => Ok(Self {
                grant,
                _policy: PhantomData,
            }),
            Decision::Deny(reason) => Err(reason.into_error()),
        }
    }
}

/// Page guard: same decision, but denial redirects. No session goes to the
/// login page, anything else to the dashboard.
#[derive(Debug, Clone)]
pub struct PageGuard<P: Policy> {
    grant: Grant,
    _policy: PhantomData<P>,
}

impl<P: Policy> Deref for PageGuard<P> {
    type Target = Grant;

    fn deref(&self) -> &Self::Target {
        &self.grant
    }
}

pub fn redirect_for(reason: DenyReason) -> Redirect {
    match reason {
        DenyReason::NoSession => Redirect::to("/"),
        DenyReason::MissingRole | DenyReason::MissingPermission => Redirect::to("/dashboard"),
    }
}

#[async_trait]
impl<P: Policy> FromRequestParts<AppState> for PageGuard<P> {
    type Rejection = Redirect;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match decide::<P>(parts, state).await {
            Decision::Allow(grant) => Ok(Self {
                grant,
                _policy: PhantomData,
            }),
            Decision::Deny(reason) => Err(redirect_for(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    fn location(reason: DenyReason) -> String {
        let response = redirect_for(reason).into_response();
        response.headers()["location"].to_str().unwrap().to_string()
    }

    #[test]
    fn page_denials_redirect_by_reason() {
        assert_eq!(location(DenyReason::NoSession), "/");
        assert_eq!(location(DenyReason::MissingRole), "/dashboard");
        assert_eq!(location(DenyReason::MissingPermission), "/dashboard");
    }
}
