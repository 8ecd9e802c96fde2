//! Sends a converted request to the upstream endpoint and returns its raw byte stream.

use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use secrecy::{ExposeSecret, SecretString};

use crate::error::GatewayError;
use crate::request::UpstreamRequest;

/// The upstream's raw HTTP response body, as a stream of byte chunks.
pub type UpstreamByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Fixed, opaque identification headers sent on every upstream call. The upstream only checks
/// these are present and well-formed, never their exact content, so they're hardcoded here
/// rather than threaded through configuration.
const UPSTREAM_USER_AGENT: &str = "aws-sdk-rust/1.x";
const UPSTREAM_AMZ_USER_AGENT: &str = "aws-sdk-rust/1.x api/bridge#1.0";

/// A minimal HTTP client wrapping the single upstream call this gateway ever makes.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    endpoint: url::Url,
}

impl UpstreamClient {
    pub fn new(endpoint: url::Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
        }
    }

    /// Sends `request` with the given bearer token; returns the response body as a byte
    /// stream if the upstream answered with a 2xx status, or a [`GatewayError::UpstreamNon2xx`]
    /// carrying the response body otherwise.
    pub async fn send(
        &self,
        request: &UpstreamRequest,
        access_token: &SecretString,
    ) -> Result<UpstreamByteStream, GatewayError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(access_token.expose_secret())
            .header("content-type", "application/json")
            .header("user-agent", UPSTREAM_USER_AGENT)
            .header("x-amz-user-agent", UPSTREAM_AMZ_USER_AGENT)
            .json(request)
            .send()
            .await
            .map_err(GatewayError::UpstreamTransport)?;

        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::UpstreamNon2xx { status, body });
        }

        Ok(Box::pin(response.bytes_stream()))
    }
}
