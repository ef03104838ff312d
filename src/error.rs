//! Error kinds and their translation into response envelopes.

use thiserror::Error;

use crate::response::{self, ResponseEnvelope};

/// Failures talking to the remote authorization service.
///
/// A transport fault and a non-200 reply are the same kind; the message
/// carries the response body or the transport detail.
#[derive(Debug, Error)]
pub enum RemoteAuthError {
    #[error("Token Issue Failed: {0}")]
    Issue(String),

    #[error("Token Verify Failed: {0}")]
    Verify(String),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("{0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("invalid column name `{0}`")]
    InvalidColumn(String),

    #[error("malformed integration definition: {0}")]
    Definition(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfirmError {
    #[error("Confirm API error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Confirm API failed (status={status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Everything a request can fail with, as seen by the router.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Authorization header required")]
    AuthHeaderMissing,

    #[error("{0}")]
    TokenIssue(#[source] RemoteAuthError),

    #[error("{0}")]
    TokenVerify(#[source] RemoteAuthError),

    /// Verification of the caller on a protected order route.
    #[error("Token verify failed: {0}")]
    CallerVerify(#[source] RemoteAuthError),

    #[error("agent.id (client_id) not found in token verify response")]
    AgentIdMissing,

    #[error("DB save failed: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("{0}")]
    Confirm(#[from] ConfirmError),

    #[error("Not Found")]
    RouteNotFound,

    #[error("Internal Server Error")]
    Internal(#[source] anyhow::Error),
}

impl ServiceError {
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::AuthHeaderMissing
            | ServiceError::TokenVerify(_)
            | ServiceError::CallerVerify(_) => 401,
            ServiceError::AgentIdMissing => 400,
            ServiceError::RouteNotFound => 404,
            ServiceError::TokenIssue(_)
            | ServiceError::Persistence(_)
            | ServiceError::Confirm(_)
            | ServiceError::Internal(_) => 500,
        }
    }

    /// The envelope the caller sees. For internal faults this is always the
    /// generic message; the detail is only for the operational log.
    pub fn to_envelope(&self) -> ResponseEnvelope {
        response::error(self.status_code(), self.to_string())
    }
}

impl From<anyhow::Error> for ServiceError {
    fn from(e: anyhow::Error) -> Self {
        ServiceError::Internal(e)
    }
}
