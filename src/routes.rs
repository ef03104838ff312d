//! Route table and request handlers.

use serde_json::json;

use lambda_runtime::tracing::{info, warn};

use crate::{
    confirm,
    error::{ConfirmError, ServiceError},
    event::InboundEvent,
    orders::{self, SubmissionKind},
    response::{success, ResponseEnvelope},
    tokens::{self, DEFAULT_GRANT_TYPE},
    Services,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Route {
    /// `/api/v1` and `/api/v1/test`: liveness checks.
    Health,
    AccessToken,
    Verify,
    Submission(SubmissionKind),
}

impl Route {
    /// Match a request. Only the submission routes care about the method.
    pub fn resolve(path: &str, method: &str) -> Option<Self> {
        match (path, method) {
            ("/api/v1", _) | ("/api/v1/test", _) => Some(Route::Health),
            ("/api/v1/oauth/access_token", _) => Some(Route::AccessToken),
            ("/api/v1/oauth/verify", _) => Some(Route::Verify),
            ("/api/v1/customer-order/integrations", "POST") => {
                Some(Route::Submission(SubmissionKind::Integration))
            }
            ("/api/v1/customer-order/customizations", "POST") => {
                Some(Route::Submission(SubmissionKind::Customization))
            }
            _ => None,
        }
    }
}

impl Services {
    pub(crate) async fn handle(
        &self,
        route: Route,
        event: &InboundEvent,
    ) -> Result<ResponseEnvelope, ServiceError> {
        match route {
            Route::Health => Ok(success(&json!({
                "path": event.route_path(),
                "message": "API OK",
            }))),
            Route::AccessToken => self.issue_token(event).await,
            Route::Verify => self.verify_token(event).await,
            Route::Submission(kind) => self.receive_orders(event, kind).await,
        }
    }

    async fn issue_token(&self, event: &InboundEvent) -> Result<ResponseEnvelope, ServiceError> {
        let result = self
            .tokens
            .issue_token(
                event.query_param("client_id"),
                event.query_param("client_secret"),
                event.query_param("grant_type").unwrap_or(DEFAULT_GRANT_TYPE),
            )
            .await
            .map_err(ServiceError::TokenIssue)?;

        Ok(success(&result))
    }

    async fn verify_token(&self, event: &InboundEvent) -> Result<ResponseEnvelope, ServiceError> {
        let auth = event.authorization().ok_or(ServiceError::AuthHeaderMissing)?;

        let result = self
            .tokens
            .verify_token(auth)
            .await
            .map_err(ServiceError::TokenVerify)?;

        Ok(success(&result))
    }

    /// Verify the caller, store the submission, then confirm it downstream.
    ///
    /// Nothing is undone if confirmation fails: the rows stay committed and
    /// the integration id shows up in our log for manual follow-up.
    async fn receive_orders(
        &self,
        event: &InboundEvent,
        kind: SubmissionKind,
    ) -> Result<ResponseEnvelope, ServiceError> {
        let auth = event.authorization().ok_or(ServiceError::AuthHeaderMissing)?;

        let verified = self
            .tokens
            .verify_token(auth)
            .await
            .map_err(ServiceError::CallerVerify)?;

        let client_id = tokens::agent_id(&verified).ok_or(ServiceError::AgentIdMissing)?;
        info!(client_id, ?kind, "verified caller");

        let payload = event.json_body()?;

        let parent_id =
            match orders::save_payload(self.store.as_ref(), &payload, client_id, kind).await? {
                Some(id) => id,
                None => {
                    return Ok(success(&json!({
                        "message": "no orders received",
                        "integration_id": null,
                        "client_id": client_id,
                        "confirm_status": null,
                    })))
                }
            };

        let (status, body) = self.confirmer.confirm(parent_id, auth).await.map_err(|e| {
            warn!(parent_id, "confirmation call failed; submission stored unconfirmed");
            e
        })?;

        if !confirm::is_accepted(status) {
            warn!(parent_id, status, "confirmation rejected; submission stored unconfirmed");
            return Err(ConfirmError::Rejected { status, body }.into());
        }

        info!(parent_id, status, "submission confirmed");

        Ok(success(&json!({
            "message": "saved + confirmed",
            "integration_id": parent_id,
            "client_id": client_id,
            "confirm_status": status,
        })))
    }
}
