// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is loaded from the environment once at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Directory holding the redb database file | `/data` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `JWT_SECRET` | HS256 signing secret for access/refresh tokens | Required |
//! | `ENCRYPTION_KEY` | Passphrase for credential encryption | Required |
//! | `ACCESS_TOKEN_TTL_HOURS` | Access token lifetime | `24` |
//! | `REFRESH_TOKEN_TTL_HOURS` | Refresh token lifetime | `168` |
//! | `RATE_LIMIT_PER_MINUTE` | Requests per minute per caller | `120` |
//! | `REQUEST_TIMEOUT_SECS` | Per-request deadline | `30` |
//! | `JWT_LEEWAY_SECS` | Clock skew tolerated when checking token expiry | `0` |
//! | `TRUSTED_PROXIES` | Comma-separated proxy IPs whose `X-Forwarded-For` is believed | Unset |
//! | `AUDIT_REDACTED_FIELDS` | Extra comma-separated field names masked in audit values | Unset |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | PEM files; HTTPS when both are set | Unset |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::logging::LogFormat;

pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const JWT_SECRET_ENV: &str = "JWT_SECRET";
pub const ENCRYPTION_KEY_ENV: &str = "ENCRYPTION_KEY";
pub const ACCESS_TOKEN_TTL_ENV: &str = "ACCESS_TOKEN_TTL_HOURS";
pub const REFRESH_TOKEN_TTL_ENV: &str = "REFRESH_TOKEN_TTL_HOURS";
pub const RATE_LIMIT_ENV: &str = "RATE_LIMIT_PER_MINUTE";
pub const REQUEST_TIMEOUT_ENV: &str = "REQUEST_TIMEOUT_SECS";
pub const JWT_LEEWAY_ENV: &str = "JWT_LEEWAY_SECS";
pub const TRUSTED_PROXIES_ENV: &str = "TRUSTED_PROXIES";
pub const AUDIT_REDACTED_FIELDS_ENV: &str = "AUDIT_REDACTED_FIELDS";
pub const TLS_CERT_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_ENV: &str = "TLS_KEY_PATH";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_DATA_DIR: &str = "/data";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_ACCESS_TOKEN_TTL_HOURS: i64 = 24;
pub const DEFAULT_REFRESH_TOKEN_TTL_HOURS: i64 = 168;
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 120;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Database file name inside `DATA_DIR`.
pub const DATABASE_FILE: &str = "inventory.redb";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Paths to a PEM certificate chain and private key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub encryption_key: String,
    pub access_token_ttl_hours: i64,
    pub refresh_token_ttl_hours: i64,
    pub rate_limit_per_minute: u32,
    pub request_timeout: Duration,
    pub jwt_leeway_secs: u32,
    pub trusted_proxies: Vec<IpAddr>,
    pub audit_redacted_fields: Vec<String>,
    pub tls: Option<TlsPaths>,
    pub log_format: LogFormat,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("data_dir", &self.data_dir)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("jwt_secret", &"[REDACTED]")
            .field("encryption_key", &"[REDACTED]")
            .field("access_token_ttl_hours", &self.access_token_ttl_hours)
            .field("refresh_token_ttl_hours", &self.refresh_token_ttl_hours)
            .field("rate_limit_per_minute", &self.rate_limit_per_minute)
            .field("request_timeout", &self.request_timeout)
            .field("jwt_leeway_secs", &self.jwt_leeway_secs)
            .field("trusted_proxies", &self.trusted_proxies)
            .field("audit_redacted_fields", &self.audit_redacted_fields)
            .field("tls", &self.tls)
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let jwt_secret = get(JWT_SECRET_ENV).ok_or(ConfigError::Missing(JWT_SECRET_ENV))?;
        let encryption_key =
            get(ENCRYPTION_KEY_ENV).ok_or(ConfigError::Missing(ENCRYPTION_KEY_ENV))?;

        let access_token_ttl_hours =
            parse_or(get(ACCESS_TOKEN_TTL_ENV), ACCESS_TOKEN_TTL_ENV, DEFAULT_ACCESS_TOKEN_TTL_HOURS)?;
        let refresh_token_ttl_hours = parse_or(
            get(REFRESH_TOKEN_TTL_ENV),
            REFRESH_TOKEN_TTL_ENV,
            DEFAULT_REFRESH_TOKEN_TTL_HOURS,
        )?;
        if access_token_ttl_hours <= 0 {
            return Err(invalid(ACCESS_TOKEN_TTL_ENV, "must be positive"));
        }
        if refresh_token_ttl_hours < access_token_ttl_hours {
            return Err(invalid(
                REFRESH_TOKEN_TTL_ENV,
                "must not be shorter than the access token TTL",
            ));
        }

        let rate_limit_per_minute =
            parse_or(get(RATE_LIMIT_ENV), RATE_LIMIT_ENV, DEFAULT_RATE_LIMIT_PER_MINUTE)?;
        if rate_limit_per_minute == 0 {
            return Err(invalid(RATE_LIMIT_ENV, "must be positive"));
        }

        let timeout_secs =
            parse_or(get(REQUEST_TIMEOUT_ENV), REQUEST_TIMEOUT_ENV, DEFAULT_REQUEST_TIMEOUT_SECS)?;
        if timeout_secs == 0 {
            return Err(invalid(REQUEST_TIMEOUT_ENV, "must be positive"));
        }

        let trusted_proxies = list(get(TRUSTED_PROXIES_ENV))
            .iter()
            .map(|ip| {
                ip.parse::<IpAddr>()
                    .map_err(|e| invalid(TRUSTED_PROXIES_ENV, format!("'{ip}': {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let tls = match (get(TLS_CERT_ENV), get(TLS_KEY_ENV)) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing(TLS_KEY_ENV)),
            (None, Some(_)) => return Err(ConfigError::Missing(TLS_CERT_ENV)),
        };

        let log_format = match get(LOG_FORMAT_ENV) {
            Some(v) => LogFormat::parse(&v).ok_or_else(|| invalid(LOG_FORMAT_ENV, "expected json or pretty"))?,
            None => LogFormat::Pretty,
        };

        Ok(Self {
            data_dir: get(DATA_DIR_ENV).unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()).into(),
            host: get(HOST_ENV).unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_or(get(PORT_ENV), PORT_ENV, DEFAULT_PORT)?,
            jwt_secret,
            encryption_key,
            access_token_ttl_hours,
            refresh_token_ttl_hours,
            rate_limit_per_minute,
            request_timeout: Duration::from_secs(timeout_secs),
            jwt_leeway_secs: parse_or(get(JWT_LEEWAY_ENV), JWT_LEEWAY_ENV, 0)?,
            trusted_proxies,
            audit_redacted_fields: list(get(AUDIT_REDACTED_FIELDS_ENV)),
            tls,
            log_format,
        })
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e: std::net::AddrParseError| invalid(HOST_ENV, e.to_string()))
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        name,
        reason: reason.into(),
    }
}

/// Split a comma-separated value, skipping empty items.
fn list(raw: Option<String>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_or<T>(raw: Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(v) => v.trim().parse().map_err(|e: T::Err| invalid(name, e.to_string())),
        None => Ok(default),
    }
}
