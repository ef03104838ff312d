//! The AWS/Lambda-powered customer-order integration service
//!
//! This library crate implements a single HTTP-facing Lambda that:
//!
//! - proxies OAuth client-credential token issuance and verification to the
//!   order API's authorization service;
//! - accepts customer-order submissions, stores them in MySQL (one parent row
//!   plus one detail row per order), and confirms each stored submission back
//!   to the order API.
//!
//! The same code is compiled into three executables:
//! `customer-order-lambda-proxyevent` for the actual cloud deployment behind
//! API Gateway / a Function URL, `customer-order-lambda-bare` which takes the
//! raw event JSON and is useful for local testing, and
//! `customer-order-lambda-oneshot` which runs one event file from the command
//! line.

use lambda_runtime::{
    tracing::{self, info, warn},
    Error,
};
use serde_json::Value;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod confirm;
pub mod definitions;
pub mod error;
pub mod event;
pub mod orders;
pub mod response;
mod routes;
pub mod store;
pub mod tokens;

#[cfg(test)]
mod memstore;

pub use event::InboundEvent;
pub use response::ResponseEnvelope;

use crate::{
    config::{DbConfig, ServiceConfig},
    confirm::ConfirmClient,
    error::ServiceError,
    routes::Route,
    store::{MySqlStore, OrderStore},
    tokens::TokenClient,
};

pub struct Services {
    tokens: TokenClient,
    confirmer: ConfirmClient,
    store: Arc<dyn OrderStore>,
}

fn init_tracing() -> Result<(), Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false) // don't print the module name
        .without_time() // don't print time (CloudWatch has it)
        .finish();

    tracing::dispatcher::set_global_default(tracing::Dispatch::new(subscriber))?;

    // reqwest and friends still speak `log`.
    tracing_log::LogTracer::init()?;
    Ok(())
}

impl Services {
    /// Create a state object for the customer-order Lambda.
    ///
    /// This is the one place where configuration is loaded, including the
    /// database credentials from Secrets Manager. They are held for the life
    /// of the process.
    pub async fn init() -> Result<Self, Error> {
        init_tracing()?;

        let config = ServiceConfig::from_env();
        let sdk = aws_config::load_from_env().await;
        let db = DbConfig::load(&sdk, &config.db_secret_id).await?;
        info!(host = %db.host, database = %db.database, "loaded DB configuration");

        Self::new(&config, Arc::new(MySqlStore::new(&db)))
    }

    /// Assemble the services around an existing store.
    pub fn new(config: &ServiceConfig, store: Arc<dyn OrderStore>) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Services {
            tokens: TokenClient::new(http.clone(), config.oauth_base_url.clone()),
            confirmer: ConfirmClient::new(http, config.api_base_url.clone()),
            store,
        })
    }

    /// Handle one request.
    ///
    /// This never fails: every outcome, including internal faults, becomes a
    /// response envelope. Each invocation is independent; nothing carries over
    /// between requests except the long-lived clients.
    pub async fn dispatch(&self, event: &InboundEvent) -> ResponseEnvelope {
        let path = event.route_path();
        let method = event.method();
        info!(path, method, "dispatching request");

        let outcome = match Route::resolve(path, method) {
            Some(route) => self.handle(route, event).await,
            None => Err(ServiceError::RouteNotFound),
        };

        outcome.unwrap_or_else(report)
    }

    /// Handle one request given as a raw event JSON value.
    pub async fn dispatch_json(&self, event: Value) -> ResponseEnvelope {
        match serde_json::from_value::<InboundEvent>(event) {
            Ok(ev) => self.dispatch(&ev).await,
            Err(e) => report(ServiceError::Internal(
                anyhow::Error::new(e).context("malformed invocation event"),
            )),
        }
    }
}

fn report(e: ServiceError) -> ResponseEnvelope {
    match &e {
        ServiceError::Internal(inner) => tracing::error!("Lambda Error: {inner:#}"),
        _ => warn!(status = e.status_code(), "{e}"),
    }

    e.to_envelope()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memstore::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn malformed_event_is_internal_error() {
        let config = ServiceConfig::with_api_base_url("http://127.0.0.1:9/api/v1");
        let svcs = Services::new(&config, Arc::new(MemoryStore::default())).unwrap();

        let env = svcs.dispatch_json(json!({"rawPath": 12})).await;
        assert_eq!(env.status_code, 500);
        assert_eq!(env.body, r#"{"error": "Internal Server Error"}"#);

        let env = svcs.dispatch_json(json!({"rawPath": "/api/v1"})).await;
        assert_eq!(env.status_code, 200);
    }
}
