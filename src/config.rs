//! Startup configuration.
//!
//! Database credentials live in Secrets Manager. They are loaded once, in
//! `Services::init()`, and handed to the store; nothing re-reads them for the
//! life of the process, so rotated credentials need a cold start.

use anyhow::{anyhow, Context, Result};
use aws_config::SdkConfig;
use serde::Deserialize;
use serde_json::Value;
use sqlx::mysql::MySqlConnectOptions;
use std::{env, fmt};

pub const DEFAULT_API_BASE_URL: &str = "https://api.test-spot.com/api/v1";
pub const DEFAULT_DB_SECRET_ID: &str = "test/Tms/Mysql";
const DEFAULT_DB_PORT: u16 = 3306;

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// Base of the customer-order API; confirmations are POSTed under it.
    pub api_base_url: String,

    /// Base of the OAuth endpoints (`access_token`, `verify`).
    pub oauth_base_url: String,

    pub db_secret_id: String,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        let base = env::var("ORDER_API_BASE_URL").unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_owned());
        let secret = env::var("DB_SECRET_ID").unwrap_or_else(|_| DEFAULT_DB_SECRET_ID.to_owned());
        Self::with_api_base_url(base).with_db_secret_id(secret)
    }

    pub fn with_api_base_url<S: Into<String>>(base: S) -> Self {
        let api_base_url = base.into().trim_end_matches('/').to_owned();
        let oauth_base_url = format!("{api_base_url}/oauth");

        ServiceConfig {
            api_base_url,
            oauth_base_url,
            db_secret_id: DEFAULT_DB_SECRET_ID.to_owned(),
        }
    }

    pub fn with_db_secret_id<S: Into<String>>(mut self, secret_id: S) -> Self {
        self.db_secret_id = secret_id.into();
        self
    }
}

#[derive(Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

// Keep the password out of logs.
impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

/// The JSON layout of the RDS-style secret.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DbSecret {
    host_private: String,
    username: String,
    password: String,
    dbname: String,
    #[serde(default)]
    port: Option<Value>,
}

impl DbConfig {
    /// Load the database configuration.
    ///
    /// An explicit `DB_HOST` in the environment wins (handy for running
    /// against a local MySQL); otherwise we go to Secrets Manager.
    pub async fn load(sdk: &SdkConfig, secret_id: &str) -> Result<Self> {
        if let Ok(host) = env::var("DB_HOST") {
            return Self::from_env_with_host(host);
        }

        let client = aws_sdk_secretsmanager::Client::new(sdk);
        let resp = client
            .get_secret_value()
            .secret_id(secret_id)
            .send()
            .await
            .with_context(|| format!("failed to load DB secret `{secret_id}`"))?;

        let text = resp
            .secret_string()
            .ok_or_else(|| anyhow!("DB secret `{secret_id}` has no SecretString"))?;

        Self::from_secret_json(text)
    }

    fn from_env_with_host(host: String) -> Result<Self> {
        let port = match env::var("DB_PORT") {
            Ok(p) => p.parse().with_context(|| format!("illegal DB_PORT `{p}`"))?,
            Err(_) => DEFAULT_DB_PORT,
        };

        Ok(DbConfig {
            host,
            port,
            user: env::var("DB_USER").context("DB_USER must be set alongside DB_HOST")?,
            password: env::var("DB_PASSWORD").unwrap_or_default(),
            database: env::var("DB_NAME").context("DB_NAME must be set alongside DB_HOST")?,
        })
    }

    pub fn from_secret_json(text: &str) -> Result<Self> {
        let secret: DbSecret = serde_json::from_str(text).context("failed to parse DB secret")?;

        let port = match secret.port {
            None | Some(Value::Null) => DEFAULT_DB_PORT,
            Some(Value::Number(n)) => n
                .as_u64()
                .and_then(|p| u16::try_from(p).ok())
                .ok_or_else(|| anyhow!("illegal DB port {n}"))?,
            Some(Value::String(s)) => s.parse().with_context(|| format!("illegal DB port `{s}`"))?,
            Some(other) => return Err(anyhow!("illegal DB port {other}")),
        };

        Ok(DbConfig {
            host: secret.host_private,
            port,
            user: secret.username,
            password: secret.password,
            database: secret.dbname,
        })
    }

    pub fn connect_options(&self) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
            .charset("utf8mb4")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_derivation() {
        let cfg = ServiceConfig::with_api_base_url("http://localhost:9000/api/v1/");
        assert_eq!(cfg.api_base_url, "http://localhost:9000/api/v1");
        assert_eq!(cfg.oauth_base_url, "http://localhost:9000/api/v1/oauth");
        assert_eq!(cfg.db_secret_id, DEFAULT_DB_SECRET_ID);
    }

    #[test]
    fn secret_parsing() {
        let cfg = DbConfig::from_secret_json(
            r#"{"hostPrivate":"db.internal","username":"tms","password":"hunter2","dbname":"tms","engine":"mysql"}"#,
        )
        .unwrap();
        assert_eq!(cfg.host, "db.internal");
        assert_eq!(cfg.port, 3306);
        assert_eq!(cfg.user, "tms");
        assert_eq!(cfg.database, "tms");

        let cfg = DbConfig::from_secret_json(
            r#"{"hostPrivate":"h","username":"u","password":"p","dbname":"d","port":"3307"}"#,
        )
        .unwrap();
        assert_eq!(cfg.port, 3307);

        assert!(DbConfig::from_secret_json(r#"{"username":"u"}"#).is_err());
        assert!(DbConfig::from_secret_json(
            r#"{"hostPrivate":"h","username":"u","password":"p","dbname":"d","port":99999}"#
        )
        .is_err());
    }

    #[test]
    fn debug_redacts_password() {
        let cfg = DbConfig::from_secret_json(
            r#"{"hostPrivate":"h","username":"u","password":"hunter2","dbname":"d"}"#,
        )
        .unwrap();
        let text = format!("{cfg:?}");
        assert!(!text.contains("hunter2"));
        assert!(text.contains("<redacted>"));
    }
}
