// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

/// Header carrying the device credential on backend requests
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Body of a streamed download
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// Fully buffered HTTP response
#[derive(Debug, Clone)]
pub struct BytesResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: Bytes,
}

/// Response whose body is read chunk by chunk
pub struct HttpResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

/// The two request shapes the sync pass needs, behind a seam tests can replace
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Fetch the entire response body, optionally authenticating with an API key
    async fn get_bytes(
        &self,
        url: &str,
        api_key: Option<&str>,
    ) -> Result<BytesResponse, reqwest::Error>;

    /// Get a streaming response for asset downloads
    async fn get_stream(&self, url: &str) -> Result<HttpResponse, reqwest::Error>;
}

#[async_trait]
impl<T: HttpClient + ?Sized> HttpClient for Arc<T> {
    async fn get_bytes(
        &self,
        url: &str,
        api_key: Option<&str>,
    ) -> Result<BytesResponse, reqwest::Error> {
        (**self).get_bytes(url, api_key).await
    }

    async fn get_stream(&self, url: &str) -> Result<HttpResponse, reqwest::Error> {
        (**self).get_stream(url).await
    }
}

/// `User-Agent` sent with every request
const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// [`HttpClient`] backed by a shared `reqwest::Client`
#[derive(Clone)]
pub struct ReqwestClient {
    inner: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Self {
        Self::with_builder(reqwest::Client::builder()).unwrap_or_else(|_| Self {
            inner: reqwest::Client::new(),
        })
    }

    /// Create a client that gives up on connects or reads stalled for `timeout`
    ///
    /// Whole-request deadlines are left to callers.
    pub fn with_timeout(timeout: Duration) -> Result<Self, reqwest::Error> {
        Self::with_builder(
            reqwest::Client::builder()
                .connect_timeout(timeout)
                .read_timeout(timeout),
        )
    }

    fn with_builder(builder: reqwest::ClientBuilder) -> Result<Self, reqwest::Error> {
        let inner = builder.user_agent(USER_AGENT).build()?;
        Ok(Self { inner })
    }
}

impl Default for ReqwestClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get_bytes(
        &self,
        url: &str,
        api_key: Option<&str>,
    ) -> Result<BytesResponse, reqwest::Error> {
        let request = match api_key {
            Some(key) => self.inner.get(url).header(API_KEY_HEADER, key),
            None => self.inner.get(url),
        };

        let response = request.send().await?;
        Ok(BytesResponse {
            status: response.status().as_u16(),
            body: response.bytes().await?,
        })
    }

    async fn get_stream(&self, url: &str) -> Result<HttpResponse, reqwest::Error> {
        let response = self.inner.get(url).send().await?;

        Ok(HttpResponse {
            status: response.status().as_u16(),
            content_length: response.content_length(),
            body: Box::pin(response.bytes_stream()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_names_the_crate() {
        assert!(USER_AGENT.starts_with("kiosk-sync/"));
    }

    #[test]
    fn reqwest_client_accepts_timeout() {
        let client = ReqwestClient::with_timeout(Duration::from_secs(5));
        assert!(client.is_ok());
    }
}
