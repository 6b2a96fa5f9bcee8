use std::time::Duration;

use async_trait::async_trait;
use powermate_common::DeviceAddress;
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::error::TransportError;

pub type Query<'a> = [(&'a str, String)];

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Response {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        serde_json::from_slice(&self.body)
            .map_err(|err| TransportError::MalformedResponse(err.to_string()))
    }
}

/// Issues one GET against a device endpoint. Implementations must abort the
/// underlying request once `timeout` elapses and report non-2xx replies as
/// [`TransportError::HttpStatus`].
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    async fn request(
        &self,
        address: DeviceAddress,
        endpoint: &str,
        query: &Query<'_>,
        timeout: Duration,
    ) -> Result<Response, TransportError>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        // Devices are only ever on the local subnet.
        let http = reqwest::Client::builder()
            .no_proxy()
            .build()
            .unwrap_or_default();

        Self { http }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceTransport for HttpTransport {
    async fn request(
        &self,
        address: DeviceAddress,
        endpoint: &str,
        query: &Query<'_>,
        timeout: Duration,
    ) -> Result<Response, TransportError> {
        let url = format!("{}{}", address.base_url(), endpoint);
        trace!(%url, ?query, "device request");

        let response = self
            .http
            .get(&url)
            .query(query)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus(status.as_u16()));
        }

        let body = response.bytes().await.map_err(map_reqwest_error)?;
        trace!(%url, body = %String::from_utf8_lossy(&body), "device response");

        Ok(Response {
            status: status.as_u16(),
            body: body.to_vec(),
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_decode() {
        TransportError::MalformedResponse(err.to_string())
    } else {
        TransportError::NetworkUnreachable(err.to_string())
    }
}
