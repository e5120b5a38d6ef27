use std::time::Duration;

use dig_contracts::errors::{DigError, DigResult};
use dig_contracts::request::OutboundRequest;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use super::{truncate_text, ModelBoundary};

const ERROR_BODY_MAX_CHARS: usize = 512;

/// Posts the wire request to a server that speaks `{prompt, images,
/// aspectRatio}` and answers `{parts}` or `{error, detail?}`.
pub struct HttpGenerateBoundary {
    url: String,
    timeout: Duration,
    http: HttpClient,
}

impl HttpGenerateBoundary {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            http: HttpClient::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ModelBoundary for HttpGenerateBoundary {
    fn name(&self) -> &str {
        "http"
    }

    fn generate(&self, request: &OutboundRequest) -> DigResult<Value> {
        let response = self
            .http
            .post(&self.url)
            .timeout(self.timeout)
            .json(request)
            .send()
            .map_err(|err| {
                DigError::remote(
                    "Request failed",
                    Some(json!({ "url": self.url, "message": err.to_string() })),
                )
            })?;

        let status = response.status();
        let body = response.text().map_err(|err| {
            DigError::remote(
                "Response body read failed",
                Some(Value::String(err.to_string())),
            )
        })?;
        if !status.is_success() {
            return Err(error_from_body(status.as_u16(), &body));
        }
        serde_json::from_str(&body).map_err(|err| {
            DigError::remote(
                "Server returned invalid JSON",
                Some(json!({
                    "message": err.to_string(),
                    "body": truncate_text(&body, ERROR_BODY_MAX_CHARS),
                })),
            )
        })
    }
}

/// `error`, else `message`, else a generic label; `detail` rides along.
pub(crate) fn error_from_body(status: u16, body: &str) -> DigError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let text_field = |key: &str| {
        parsed
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    let error = text_field("error")
        .or_else(|| text_field("message"))
        .unwrap_or_else(|| format!("Server error ({status})"));
    let detail = match parsed.get("detail") {
        Some(detail) => Some(detail.clone()),
        None if parsed.is_null() && !body.trim().is_empty() => {
            Some(Value::String(truncate_text(body.trim(), ERROR_BODY_MAX_CHARS)))
        }
        None => None,
    };
    DigError::remote(error, detail)
}
