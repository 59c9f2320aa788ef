//! Session resolution: cookie (or bearer) token -> authenticated principal.
//!
//! Tokens are HS256 JWTs. Each issued token also has an `auth_sessions` row
//! holding its SHA-256 digest, so logout and refresh can revoke it before the
//! JWT itself expires.

use std::collections::BTreeSet;
use std::convert::Infallible;
use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::app::AppState;
use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::utils::{token_digest, utc_now};

pub const SESSION_COOKIE: &str = "cvo-auth-token";

/// Cookie names that have carried auth state, including the chunked and
/// legacy names older clients may still send.
pub const KNOWN_AUTH_COOKIES: &[&str] = &[
    SESSION_COOKIE,
    "cvo-auth-token.0",
    "cvo-auth-token.1",
    "sb-access-token",
    "sb-refresh-token",
];

const AUTH_COOKIE_PREFIXES: &[&str] = &["cvo-auth", "sb-"];

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub secret: Arc<Vec<u8>>,
    pub exp_hours: i64,
    pub secure_cookies: bool,
}

impl SessionConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            secret: Arc::new(config.jwt_secret.clone()),
            exp_hours: config.jwt_exp_hours,
            secure_cookies: config.secure_cookies,
        }
    }

    pub fn encode(&self, claims: &Claims) -> Result<String, AppError> {
        jsonwebtoken::encode(&Header::default(), claims, &EncodingKey::from_secret(&self.secret))
            .map_err(|err| AppError::token(err.to_string()))
    }

    pub fn decode(&self, token: &str) -> Result<Claims, AppError> {
        let mut validation = Validation::default();
        validation.validate_exp = true;

        jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map(|data| data.claims)
            .map_err(|err| AppError::token(err.to_string()))
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    /// Id of the `auth_sessions` row backing this token.
    pub jti: Uuid,
    pub exp: usize,
    pub iat: usize,
}

/// An authenticated identity. Immutable for the lifetime of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: Uuid,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub principal: Principal,
    pub session_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A freshly signed token and the session it stands for.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub session: Session,
}

#[derive(Clone)]
pub struct SessionResolver {
    pool: SqlitePool,
    config: Arc<SessionConfig>,
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    token_hash: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
    email: String,
}

impl SessionResolver {
    pub fn new(pool: SqlitePool, config: SessionConfig) -> Self {
        Self {
            pool,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Resolves a raw token to a live session. Every failure, including
    /// store errors, resolves to `None`.
    pub async fn resolve(&self, token: Option<&str>) -> Option<Session> {
        let token = token?;

        let claims = match self.config.decode(token) {
            Ok(claims) => claims,
            Err(err) => {
                tracing::debug!(error = %err, "rejecting session token");
                return None;
            }
        };

        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT s.token_hash, s.issued_at, s.expires_at, s.revoked_at, p.email FROM auth_sessions s JOIN profiles p ON p.id = s.user_id WHERE s.id = ? AND s.user_id = ?",
        )
        .bind(claims.jti.to_string())
        .bind(claims.sub.to_string())
        .fetch_optional(&self.pool)
        .await;

        let row = match row {
            Ok(Some(row)) => row,
            Ok(None) => {
                tracing::debug!(session_id = %claims.jti, "session row not found");
                return None;
            }
            Err(err) => {
                tracing::warn!(error = %err, "session lookup failed");
                return None;
            }
        };

        if row.revoked_at.is_some() || row.expires_at <= utc_now() || row.token_hash != token_digest(token) {
            tracing::debug!(session_id = %claims.jti, "session revoked, expired or mismatched");
            return None;
        }

        Some(Session {
            principal: Principal {
                id: claims.sub,
                email: row.email,
            },
            session_id: claims.jti,
            issued_at: row.issued_at,
            expires_at: row.expires_at,
        })
    }

    pub async fn issue(&self, principal: &Principal) -> AppResult<IssuedSession> {
        let mut conn = self.pool.acquire().await?;
        self.issue_on(&mut conn, principal).await
    }

    /// Revokes the current session and issues its replacement atomically.
    pub async fn refresh(&self, session: &Session) -> AppResult<IssuedSession> {
        let mut tx = self.pool.begin().await?;

        let revoked = sqlx::query("UPDATE auth_sessions SET revoked_at = ? WHERE id = ? AND revoked_at IS NULL")
            .bind(utc_now())
            .bind(session.session_id.to_string())
            .execute(&mut *tx)
            .await?;

        if revoked.rows_affected() == 0 {
            return Err(AppError::unauthorized("session already revoked"));
        }

        let issued = self.issue_on(&mut tx, &session.principal).await?;
        tx.commit().await?;

        Ok(issued)
    }

    pub async fn revoke(&self, session: &Session) -> AppResult<()> {
        sqlx::query("UPDATE auth_sessions SET revoked_at = ? WHERE id = ? AND revoked_at IS NULL")
            .bind(utc_now())
            .bind(session.session_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn issue_on(&self, conn: &mut SqliteConnection, principal: &Principal) -> AppResult<IssuedSession> {
        let now = utc_now();
        // JWT timestamps have second precision; keep the row consistent with them.
        let now = Utc.timestamp_opt(now.timestamp(), 0).single().unwrap_or(now);
        let expires_at = now + Duration::hours(self.config.exp_hours);
        let session_id = Uuid::new_v4();

        let claims = Claims {
            sub: principal.id,
            email: principal.email.clone(),
            jti: session_id,
            exp: expires_at.timestamp() as usize,
            iat: now.timestamp() as usize,
        };
        let token = self.config.encode(&claims)?;

        sqlx::query(
            "INSERT INTO auth_sessions (id, user_id, token_hash, issued_at, expires_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session_id.to_string())
        .bind(principal.id.to_string())
        .bind(token_digest(&token))
        .bind(now)
        .bind(expires_at)
        .execute(&mut *conn)
        .await?;

        Ok(IssuedSession {
            token,
            session: Session {
                principal: principal.clone(),
                session_id,
                issued_at: now,
                expires_at,
            },
        })
    }

    pub fn session_cookie(&self, token: String) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, token))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.config.secure_cookies)
            .build()
    }
}

/// Token carried by the request: the session cookie first, then a bearer header.
pub fn request_token(jar: &CookieJar, headers: &HeaderMap) -> Option<String> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        let value = cookie.value().trim();
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }

    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Re-sets every known auth cookie, plus any auth-prefixed cookie the
/// request carried, as an expired removal cookie.
pub fn clear_auth_cookies(jar: CookieJar) -> CookieJar {
    let mut names: BTreeSet<String> = KNOWN_AUTH_COOKIES.iter().map(|name| name.to_string()).collect();
    for cookie in jar.iter() {
        if AUTH_COOKIE_PREFIXES.iter().any(|prefix| cookie.name().starts_with(prefix)) {
            names.insert(cookie.name().to_string());
        }
    }

    names.into_iter().fold(jar, |jar, name| {
        let mut removal = Cookie::build((name, "")).path("/").build();
        removal.make_removal();
        jar.add(removal)
    })
}

/// The resolved session, if any. Never rejects.
#[derive(Debug, Clone)]
pub struct MaybeSession(pub Option<Session>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeSession {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let token = request_token(&jar, &parts.headers);
        Ok(MaybeSession(state.sessions.resolve(token.as_deref()).await))
    }
}

/// A required session; rejects with 401 when none resolves.
#[derive(Debug, Clone)]
pub struct AuthSession(pub Session);

#[async_trait]
impl FromRequestParts<AppState> for AuthSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let MaybeSession(session) = MaybeSession::from_request_parts(parts, state)
            .await
            .unwrap_or(MaybeSession(None));
        session
            .map(AuthSession)
            .ok_or_else(|| AppError::unauthorized("no valid session"))
    }
}
