//! Proxying of the OAuth client-credential endpoints.
//!
//! We don't look inside tokens at all: issuance results are handed straight
//! back to the caller, and verification just tells us which agent (client) the
//! bearer credential belongs to.

use lambda_runtime::tracing::debug;
use reqwest::{header, StatusCode};
use serde_json::Value;

use crate::error::RemoteAuthError;

pub const DEFAULT_GRANT_TYPE: &str = "client_credentials";

#[derive(Clone, Debug)]
pub struct TokenClient {
    http: reqwest::Client,
    base_url: String,
}

impl TokenClient {
    pub fn new<S: Into<String>>(http: reqwest::Client, base_url: S) -> Self {
        TokenClient {
            http,
            base_url: base_url.into(),
        }
    }

    /// Issue a client-credentials token.
    ///
    /// Absent credentials are simply not forwarded; the remote service
    /// decides what to make of that.
    pub async fn issue_token(
        &self,
        client_id: Option<&str>,
        client_secret: Option<&str>,
        grant_type: &str,
    ) -> Result<Value, RemoteAuthError> {
        let url = format!("{}/access_token", self.base_url);

        let mut params = Vec::with_capacity(3);
        if let Some(id) = client_id {
            params.push(("client_id", id));
        }
        if let Some(secret) = client_secret {
            params.push(("client_secret", secret));
        }
        params.push(("grant_type", grant_type));

        let resp = self
            .http
            .post(&url)
            .query(&params)
            .send()
            .await
            .map_err(|e| RemoteAuthError::Issue(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| RemoteAuthError::Issue(e.to_string()))?;

        if status != StatusCode::OK {
            return Err(RemoteAuthError::Issue(text));
        }

        serde_json::from_str(&text).map_err(|e| RemoteAuthError::Issue(e.to_string()))
    }

    /// Verify a caller's `Authorization` header value.
    pub async fn verify_token(&self, authorization: &str) -> Result<Value, RemoteAuthError> {
        let url = format!("{}/verify", self.base_url);

        let resp = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, authorization)
            .header(header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| RemoteAuthError::Verify(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| RemoteAuthError::Verify(e.to_string()))?;

        debug!(status = status.as_u16(), "token verify response");

        if status != StatusCode::OK {
            return Err(RemoteAuthError::Verify(text));
        }

        serde_json::from_str(&text).map_err(|e| RemoteAuthError::Verify(e.to_string()))
    }
}

/// Pull the agent id out of a verify response.
///
/// The id is used as our client id. It may come back as a number (an
/// integral float like `42.0` included) or as a numeric string; anything
/// else, including zero, counts as absent.
pub fn agent_id(verify_response: &Value) -> Option<i64> {
    let id = verify_response.get("agent")?.get("id")?;

    let id = match id {
        Value::Number(n) => match n.as_i64() {
            Some(i) => i,
            None => integral(n.as_f64()?)?,
        },
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };

    if id == 0 {
        None
    } else {
        Some(id)
    }
}

fn integral(f: f64) -> Option<i64> {
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> TokenClient {
        TokenClient::new(reqwest::Client::new(), format!("{}/api/v1/oauth", server.uri()))
    }

    #[tokio::test]
    async fn issue_forwards_query_params() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/oauth/access_token"))
            .and(query_param("client_id", "abc"))
            .and(query_param("client_secret", "s&cret"))
            .and(query_param("grant_type", "client_credentials"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "tok", "expires_in": 3600})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let result = client(&server)
            .issue_token(Some("abc"), Some("s&cret"), DEFAULT_GRANT_TYPE)
            .await
            .unwrap();
        assert_eq!(result["access_token"], "tok");
    }

    #[tokio::test]
    async fn issue_failure_carries_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/oauth/access_token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
            .mount(&server)
            .await;

        let err = client(&server)
            .issue_token(Some("abc"), None, DEFAULT_GRANT_TYPE)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Token Issue Failed: invalid_client");
    }

    #[tokio::test]
    async fn verify_sends_header() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/oauth/verify"))
            .and(header("Authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"agent": {"id": 42}})))
            .expect(1)
            .mount(&server)
            .await;

        let result = client(&server).verify_token("Bearer tok").await.unwrap();
        assert_eq!(agent_id(&result), Some(42));
    }

    #[tokio::test]
    async fn verify_rejection() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/oauth/verify"))
            .respond_with(ResponseTemplate::new(403).set_body_string("expired"))
            .mount(&server)
            .await;

        let err = client(&server).verify_token("Bearer old").await.unwrap_err();
        assert!(matches!(err, RemoteAuthError::Verify(ref body) if body == "expired"));
    }

    #[tokio::test]
    async fn transport_fault_is_verify_error() {
        // Nothing listens on port 9 here.
        let tc = TokenClient::new(reqwest::Client::new(), "http://127.0.0.1:9/oauth");
        let err = tc.verify_token("Bearer tok").await.unwrap_err();
        assert!(matches!(err, RemoteAuthError::Verify(_)));
    }

    #[test]
    fn agent_id_forms() {
        assert_eq!(agent_id(&json!({"agent": {"id": 7}})), Some(7));
        assert_eq!(agent_id(&json!({"agent": {"id": "19"}})), Some(19));
        assert_eq!(agent_id(&json!({"agent": {"id": 42.0}})), Some(42));
        assert_eq!(agent_id(&json!({"agent": {"id": 42.5}})), None);
        assert_eq!(agent_id(&json!({"agent": {"id": 0.0}})), None);
        assert_eq!(agent_id(&json!({"agent": {"id": 0}})), None);
        assert_eq!(agent_id(&json!({"agent": {"id": ""}})), None);
        assert_eq!(agent_id(&json!({"agent": {"id": null}})), None);
        assert_eq!(agent_id(&json!({"agent": {}})), None);
        assert_eq!(agent_id(&json!({"active": true})), None);
    }
}
