use std::path::PathBuf;

use crate::errors::AppError;

/// Runtime configuration, read once from the environment at startup.
///
/// Collaborators that are optional (mail, push, TLS) are grouped so that a
/// half-configured group fails here instead of on the first request that
/// needs it.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub jwt_secret: Vec<u8>,
    pub jwt_exp_hours: i64,
    pub secure_cookies: bool,
    pub port: u16,
    pub site_url: String,
    pub smtp: Option<SmtpConfig>,
    pub push: Option<PushKeys>,
    pub tls: Option<TlsPaths>,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct PushKeys {
    pub public_key: String,
    pub private_key: String,
}

#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_JWT_EXP_HOURS: i64 = 24;
/// One year.
const MAX_JWT_EXP_HOURS: i64 = 8760;

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let jwt_secret = get("JWT_SECRET").ok_or_else(|| AppError::configuration("JWT_SECRET not set"))?;

        let jwt_exp_hours = match get("JWT_EXP_HOURS") {
            Some(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|h| (1..=MAX_JWT_EXP_HOURS).contains(h))
                .ok_or_else(|| AppError::configuration("JWT_EXP_HOURS must be between 1 and 8760"))?,
            None => DEFAULT_JWT_EXP_HOURS,
        };

        let secure_cookies = match get("SESSION_COOKIE_SECURE") {
            Some(raw) => parse_bool(&raw)
                .ok_or_else(|| AppError::configuration("SESSION_COOKIE_SECURE must be true or false"))?,
            None => false,
        };

        let port = match get("APP_PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| AppError::configuration("APP_PORT must be a valid port"))?,
            None => DEFAULT_PORT,
        };

        let site_url = get("SITE_URL").unwrap_or_else(|| format!("http://localhost:{port}"));

        let smtp = match (
            get("SMTP_HOST"),
            get("SMTP_PORT"),
            get("SMTP_USER"),
            get("SMTP_PASSWORD"),
            get("SMTP_FROM"),
        ) {
            (None, None, None, None, None) => None,
            (Some(host), Some(port), Some(user), Some(password), Some(from)) => Some(SmtpConfig {
                host,
                port: port
                    .parse::<u16>()
                    .map_err(|_| AppError::configuration("SMTP_PORT must be a valid port"))?,
                user,
                password,
                from,
            }),
            _ => {
                return Err(AppError::configuration(
                    "SMTP_HOST, SMTP_PORT, SMTP_USER, SMTP_PASSWORD and SMTP_FROM must be set together",
                ))
            }
        };

        let push = match (get("VAPID_PUBLIC_KEY"), get("VAPID_PRIVATE_KEY")) {
            (None, None) => None,
            (Some(public_key), Some(private_key)) => Some(PushKeys {
                public_key,
                private_key,
            }),
            _ => {
                return Err(AppError::configuration(
                    "VAPID_PUBLIC_KEY and VAPID_PRIVATE_KEY must be set together",
                ))
            }
        };

        let tls = match (get("TLS_CERT_PATH"), get("TLS_KEY_PATH")) {
            (None, None) => None,
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: PathBuf::from(cert),
                key: PathBuf::from(key),
            }),
            _ => {
                return Err(AppError::configuration(
                    "TLS_CERT_PATH and TLS_KEY_PATH must be set together",
                ))
            }
        };

        Ok(Self {
            jwt_secret: jwt_secret.into_bytes(),
            jwt_exp_hours,
            secure_cookies,
            port,
            site_url,
            smtp,
            push,
            tls,
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<AppConfig, AppError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_with_only_secret() {
        let cfg = config(&[("JWT_SECRET", "s")]).unwrap();
        assert_eq!(cfg.jwt_exp_hours, 24);
        assert_eq!(cfg.port, 8000);
        assert!(!cfg.secure_cookies);
        assert_eq!(cfg.site_url, "http://localhost:8000");
        assert!(cfg.smtp.is_none() && cfg.push.is_none() && cfg.tls.is_none());
    }

    #[test]
    fn missing_secret_is_rejected() {
        assert!(matches!(config(&[]), Err(AppError::Configuration(_))));
    }

    #[test]
    fn session_lifetime_is_bounded() {
        assert_eq!(config(&[("JWT_SECRET", "s"), ("JWT_EXP_HOURS", "8760")]).unwrap().jwt_exp_hours, 8760);
        for raw in ["0", "-3", "8761", "9223372036854775807", "soon"] {
            let err = config(&[("JWT_SECRET", "s"), ("JWT_EXP_HOURS", raw)]).unwrap_err();
            assert!(matches!(err, AppError::Configuration(_)), "{raw} accepted");
        }
    }

    #[test]
    fn partial_smtp_group_is_rejected() {
        let err = config(&[("JWT_SECRET", "s"), ("SMTP_HOST", "mail.local")]).unwrap_err();
        assert!(err.to_string().contains("SMTP_HOST"));
    }

    #[test]
    fn complete_push_group_is_accepted() {
        let cfg = config(&[
            ("JWT_SECRET", "s"),
            ("VAPID_PUBLIC_KEY", "pub"),
            ("VAPID_PRIVATE_KEY", "priv"),
        ])
        .unwrap();
        assert_eq!(cfg.push.unwrap().public_key, "pub");
    }
}
