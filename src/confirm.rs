//! Telling the order API that a submission has been stored.

use reqwest::header;

use crate::error::ConfirmError;

/// Marks the confirmation as coming through the external-customer channel.
const EXTERNAL_CUSTOMER_HEADER: &str = "X-Use-External-Customer";

#[derive(Clone, Debug)]
pub struct ConfirmClient {
    http: reqwest::Client,
    base_url: String,
}

impl ConfirmClient {
    pub fn new<S: Into<String>>(http: reqwest::Client, base_url: S) -> Self {
        ConfirmClient {
            http,
            base_url: base_url.into(),
        }
    }

    /// POST the confirmation for `integration_id`, forwarding the caller's
    /// credential. Returns the HTTP status and raw body; judging the status is
    /// up to the caller.
    pub async fn confirm(
        &self,
        integration_id: u64,
        authorization: &str,
    ) -> Result<(u16, String), ConfirmError> {
        let url = format!(
            "{}/customer-order/integration/{}/confirms",
            self.base_url, integration_id
        );

        let resp = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, authorization)
            .header(header::CONTENT_TYPE, "application/json")
            .header(EXTERNAL_CUSTOMER_HEADER, "1")
            .body("{}")
            .send()
            .await?;

        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok((status, body))
    }
}

/// Confirmations are accepted with either of these.
pub fn is_accepted(status: u16) -> bool {
    status == 200 || status == 201
}
