//! The inbound request, independent of how it was delivered.
//!
//! The "bare" executable receives the API Gateway (v2) / Function URL event as
//! raw JSON and deserializes it straight into `InboundEvent`. The "proxy event"
//! executable gets an `http::Request` from `lambda_http` and converts it.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    #[serde(default)]
    pub raw_path: Option<String>,

    #[serde(default)]
    pub path: Option<String>,

    #[serde(default)]
    pub request_context: Option<RequestContext>,

    #[serde(default)]
    pub query_string_parameters: Option<HashMap<String, String>>,

    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,

    #[serde(default)]
    pub body: Option<String>,

    #[serde(default)]
    pub is_base64_encoded: bool,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RequestContext {
    #[serde(default)]
    pub http: Option<HttpContext>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct HttpContext {
    #[serde(default)]
    pub method: Option<String>,
}

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().filter(|s| !s.is_empty())
}

impl InboundEvent {
    /// `rawPath`, falling back to `path`.
    pub fn route_path(&self) -> &str {
        non_empty(&self.raw_path)
            .or_else(|| non_empty(&self.path))
            .unwrap_or("")
    }

    pub fn method(&self) -> &str {
        self.request_context
            .as_ref()
            .and_then(|c| c.http.as_ref())
            .and_then(|h| h.method.as_deref())
            .unwrap_or("")
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query_string_parameters
            .as_ref()
            .and_then(|q| q.get(name))
            .map(String::as_str)
    }

    /// The caller's credential, if present and non-empty.
    pub fn authorization(&self) -> Option<&str> {
        let headers = self.headers.as_ref()?;

        ["Authorization", "authorization"]
            .iter()
            .filter_map(|k| headers.get(*k))
            .map(String::as_str)
            .find(|v| !v.is_empty())
    }

    /// The request body parsed as a JSON object; an absent or empty body is
    /// `{}`.
    pub fn json_body(&self) -> Result<Value> {
        let text = match non_empty(&self.body) {
            None => return Ok(Value::Object(Default::default())),
            Some(t) if self.is_base64_encoded => {
                let bytes = STANDARD.decode(t).context("request body is not valid base64")?;
                String::from_utf8(bytes).context("request body is not UTF-8")?
            }
            Some(t) => t.to_owned(),
        };

        let value: Value = serde_json::from_str(&text).context("request body is not valid JSON")?;

        if !value.is_object() {
            return Err(anyhow!("request body is not a JSON object"));
        }

        Ok(value)
    }

    /// Convert a `lambda_http` request.
    pub fn from_http_request(req: &lambda_http::Request) -> Self {
        use lambda_http::{Body, RequestExt};

        let query = req.query_string_parameters();
        let mut params = HashMap::new();
        for (k, v) in query.iter() {
            // Like API Gateway's v2 payload, keep the first value of repeats.
            params.entry(k.to_owned()).or_insert_with(|| v.to_owned());
        }

        let mut headers = HashMap::new();
        for (name, value) in req.headers() {
            if let Ok(v) = value.to_str() {
                headers.entry(name.as_str().to_owned()).or_insert_with(|| v.to_owned());
            }
        }

        // lambda_http has already undone any base64 encoding.
        let body = match req.body() {
            Body::Empty => None,
            Body::Text(t) => Some(t.clone()),
            Body::Binary(b) => Some(String::from_utf8_lossy(b).into_owned()),
        };

        InboundEvent {
            raw_path: Some(req.uri().path().to_owned()),
            path: None,
            request_context: Some(RequestContext {
                http: Some(HttpContext {
                    method: Some(req.method().as_str().to_owned()),
                }),
            }),
            query_string_parameters: Some(params),
            headers: Some(headers),
            body,
            is_base64_encoded: false,
        }
    }
}
