// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use core::time::Duration;
use reqwest::Response;
use std::error::Error;
use tracing::debug;

use crate::controller::ControllerError;

/// Builds a reqwest client with optional proxy configuration and timeout.
/// Uses rustls TLS.
pub fn build_client(
    proxy_url: Option<&str>,
    timeout: Duration,
) -> Result<reqwest::Client, Box<dyn Error + Send + Sync>> {
    let mut builder = reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(timeout);
    if let Some(proxy) = proxy_url {
        debug!("Using HTTPS proxy {proxy}");
        builder = builder.proxy(reqwest::Proxy::https(proxy)?);
    }
    Ok(builder.build()?)
}

/// Passes 2xx responses through. Anything else becomes a
/// [`ControllerError::Status`] carrying the response body for the log line.
pub async fn ensure_success(response: Response) -> Result<Response, ControllerError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ControllerError::Status { status, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_client_without_proxy() {
        assert!(build_client(None, Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_build_client_with_proxy() {
        assert!(build_client(Some("http://127.0.0.1:3128"), Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_build_client_invalid_proxy() {
        assert!(build_client(Some("http://[::1"), Duration::from_secs(5)).is_err());
    }

    #[tokio::test]
    async fn test_ensure_success_keeps_body_on_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/boom")
            .with_status(503)
            .with_body("controller overloaded")
            .create_async()
            .await;

        let response = reqwest::get(format!("{}/boom", server.url()))
            .await
            .expect("request failed");

        match ensure_success(response).await {
            Err(ControllerError::Status { status, body }) => {
                assert_eq!(status.as_u16(), 503);
                assert_eq!(body, "controller overloaded");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
