//! HTTP client for the update server's version endpoints.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::errors::{ErrorCode, Failure, Failures};

const APP_SETTINGS_VERSION_PATH: &str = "/test/getappsettingsversion";
const VERSION_PATH: &str = "/test/getversion";

/// One entry of the error list the server returns on failure.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RemoteError {
    #[serde(alias = "Code")]
    pub code: String,
    #[serde(alias = "Message", default)]
    pub message: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorPayload {
    List(Vec<RemoteError>),
    Wrapped {
        #[serde(alias = "Errors")]
        errors: Vec<RemoteError>,
    },
    Single(RemoteError),
}

/// Version check client
pub struct VersionClient {
    client: Client,
    base_url: String,
}

impl VersionClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, Failures> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Failure::with_detail(ErrorCode::RemoteCallFailed, e))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn get_app_settings_version(&self) -> Result<String, Failures> {
        self.get_string(APP_SETTINGS_VERSION_PATH).await
    }

    pub async fn get_version(&self) -> Result<String, Failures> {
        self.get_string(VERSION_PATH).await
    }

    async fn get_string(&self, path: &str) -> Result<String, Failures> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "Requesting version");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Failure::with_detail(ErrorCode::RemoteCallFailed, e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Failure::with_detail(ErrorCode::RemoteCallFailed, e))?;

        if !status.is_success() {
            return Err(parse_error_body(status.as_u16(), &body));
        }
        Ok(parse_version_body(&body))
    }
}

/// The body is either a JSON string or the bare version text.
fn parse_version_body(body: &str) -> String {
    serde_json::from_str::<String>(body).unwrap_or_else(|_| body.trim().to_string())
}

fn parse_error_body(status: u16, body: &str) -> Failures {
    let remote = match serde_json::from_str::<ErrorPayload>(body) {
        Ok(ErrorPayload::List(errors)) | Ok(ErrorPayload::Wrapped { errors }) => errors,
        Ok(ErrorPayload::Single(error)) => vec![error],
        Err(_) => Vec::new(),
    };

    let failures: Vec<Failure> = remote
        .into_iter()
        .map(|e| {
            Failure::with_detail(
                ErrorCode::RemoteCallFailed,
                format!("{}: {}", e.code, e.message),
            )
        })
        .collect();

    Failures::from_vec(failures).unwrap_or_else(|| {
        let text = body.trim();
        let detail = if text.is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, text)
        };
        Failure::with_detail(ErrorCode::RemoteCallFailed, detail).into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_body() {
        assert_eq!(parse_version_body("\"1.4.2\""), "1.4.2");
        assert_eq!(parse_version_body(" 1.4.2\n"), "1.4.2");
    }

    #[test]
    fn test_error_list_is_carried_over() {
        let body = r#"[{"Code":"VersionNotFound","Message":"no version"},{"code":"Other","message":"x"}]"#;
        let failures = parse_error_body(404, body);
        assert_eq!(failures.len(), 2);
        assert!(failures.iter().all(|f| f.code == ErrorCode::RemoteCallFailed));
        assert!(failures.first().message.contains("VersionNotFound: no version"));
    }

    #[test]
    fn test_wrapped_and_plain_errors() {
        let failures = parse_error_body(500, r#"{"errors":[{"code":"Boom","message":"down"}]}"#);
        assert!(failures.first().message.contains("Boom: down"));

        let failures = parse_error_body(502, "Bad gateway");
        assert_eq!(failures.len(), 1);
        assert!(failures.first().message.contains("HTTP 502: Bad gateway"));

        let failures = parse_error_body(503, "");
        assert!(failures.first().message.contains("HTTP 503"));
    }

    #[test]
    fn test_base_url_is_normalised() {
        let client = VersionClient::new("http://updates.local/", Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url, "http://updates.local");
    }
}
