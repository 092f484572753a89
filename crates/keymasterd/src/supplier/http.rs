//! HTTP plumbing shared by the remote suppliers.

use std::time::Duration;

use keymaster_common::{KeymasterError, KeymasterResult};
use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;

/// Longest response body excerpt carried in an error message.
const BODY_EXCERPT_LEN: usize = 256;

pub(crate) fn build_client(
    timeout: Duration,
    headers: HeaderMap,
) -> KeymasterResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("keymasterd/", env!("CARGO_PKG_VERSION")))
        .default_headers(headers)
        .build()
        .map_err(|e| KeymasterError::internal(format!("failed to build HTTP client: {e}")))
}

/// Appends `segments` to a base URL, percent-encoding each one.
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> KeymasterResult<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| KeymasterError::internal(format!("{} cannot be a base URL", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Sends a request and fails on transport errors or non-2xx status.
pub(crate) async fn send(operation: &str, request: RequestBuilder) -> KeymasterResult<Response> {
    let response = request
        .send()
        .await
        .map_err(|e| KeymasterError::http(operation, e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(BODY_EXCERPT_LEN).collect();
    Err(KeymasterError::http_status(operation, status.as_u16(), excerpt))
}

/// Reads a JSON body; decode failures are reported against `source_name`.
pub(crate) async fn json<T: DeserializeOwned>(
    source_name: &str,
    response: Response,
) -> KeymasterResult<T> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| KeymasterError::http(source_name, e.to_string()))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| KeymasterError::invalid_response(source_name, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_appends_segments() {
        let base = Url::parse("https://km.example.com").unwrap();
        let url = endpoint(&base, &["api", "interfaces", "7", ""]).unwrap();
        assert_eq!(url.as_str(), "https://km.example.com/api/interfaces/7/");
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let base = Url::parse("http://10.0.0.1:8080/").unwrap();
        let url = endpoint(&base, &["v1", "wireguard", "config", "server", "my net"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://10.0.0.1:8080/v1/wireguard/config/server/my%20net"
        );
    }
}
