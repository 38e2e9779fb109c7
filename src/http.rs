// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

use crate::settings::NetworkSettings;

/// A streaming response body
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// A GET request issued by the remote loader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    /// Value for the `Cache-Control` request header
    pub cache_control: Option<String>,
}

/// Response head plus the body, still unread
pub struct HttpResponse {
    pub status: u16,
    /// Declared body length; absent for chunked responses
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

/// Transport used by the remote loader; tests substitute a scripted one
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Open a streaming GET request
    async fn get_stream(&self, request: &HttpRequest) -> Result<HttpResponse, reqwest::Error>;
}

/// [`HttpClient`] backed by reqwest
#[derive(Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Create a client with the configured timeouts and user agent
    pub fn new(settings: &NetworkSettings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .connect_timeout(settings.connect_timeout())
            .read_timeout(settings.read_timeout())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get_stream(&self, request: &HttpRequest) -> Result<HttpResponse, reqwest::Error> {
        let mut builder = self.client.get(&request.url);
        if let Some(cache_control) = &request.cache_control {
            builder = builder.header(reqwest::header::CACHE_CONTROL, cache_control);
        }

        let response = builder.send().await?;
        Ok(HttpResponse {
            status: response.status().as_u16(),
            content_length: response.content_length(),
            body: Box::pin(response.bytes_stream()),
        })
    }
}
