//! HTTP session boundary
//!
//! Everything that talks to the network goes through [`HttpSession`], so the
//! API client and the downloader can run against an in-memory fake in tests.
//! [`ReqwestSession`] is the production implementation: one cookie-carrying
//! `reqwest::Client` shared by every call.

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;

/// Response headers as name/value pairs (names compared case-insensitively)
pub type HttpHeaders = Vec<(String, String)>;

/// Streaming response body
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Per-request options
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Total time allowed for the request, body included
    pub timeout: Option<Duration>,
    /// Extra request headers
    pub headers: HttpHeaders,
}

impl RequestOptions {
    /// Options with only a timeout set
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            headers: Vec::new(),
        }
    }

    /// Add a request header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Request the resource starting at byte `offset`
    pub fn range_from(self, offset: u64) -> Self {
        self.header("Range", format!("bytes={offset}-"))
    }
}

/// Status, headers and a streaming body
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// Response headers
    pub headers: HttpHeaders,
    body: ByteStream,
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl HttpResponse {
    /// Build a response around a body stream
    pub fn new(status: u16, headers: HttpHeaders, body: ByteStream) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Build a response whose whole body is already in memory
    pub fn from_bytes(status: u16, headers: HttpHeaders, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        let stream = futures::stream::once(async move { Ok::<_, Error>(body) }).boxed();
        Self::new(status, headers, stream)
    }

    /// First header value matching `name` (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `Content-Length` header, if present and numeric
    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length")
            .and_then(|v| v.trim().parse().ok())
    }

    /// 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-2xx status into [`Error::Http`]
    pub fn error_for_status(self, url: &str) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::Http {
                status: self.status,
                url: url.to_string(),
            })
        }
    }

    /// Take the body stream
    pub fn into_body(self) -> ByteStream {
        self.body
    }

    /// Read the whole body into memory
    pub async fn bytes(self) -> Result<Bytes> {
        let mut body = self.body;
        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Read the body and decode it as JSON
    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let bytes = self.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Capability interface for outbound HTTP
#[async_trait]
pub trait HttpSession: Send + Sync {
    /// GET `url`; the body is streamed lazily
    async fn get(&self, url: &str, options: RequestOptions) -> Result<HttpResponse>;

    /// HEAD `url`
    async fn head(&self, url: &str, options: RequestOptions) -> Result<HttpResponse>;
}

/// Production session backed by a cookie-enabled `reqwest::Client`
#[derive(Clone, Debug)]
pub struct ReqwestSession {
    client: reqwest::Client,
    site_url: String,
    bootstrap_timeout: Duration,
}

impl ReqwestSession {
    /// Build the client from API settings
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            reqwest::header::HeaderValue::from_static("en-US,en;q=0.5"),
        );

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            site_url: config.site_url.clone(),
            bootstrap_timeout: config.probe_timeout,
        })
    }

    /// Request the site root once so the cookie store holds a session
    ///
    /// Failure is not fatal; requests made afterwards simply go out without
    /// cookies.
    pub async fn bootstrap(&self) -> Result<()> {
        let response = self
            .client
            .get(&self.site_url)
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .timeout(self.bootstrap_timeout)
            .send()
            .await?;

        let cookies = response.cookies().count();
        tracing::info!(site = %self.site_url, status = response.status().as_u16(), cookies, "Session initialized");
        Ok(())
    }

    fn request(
        &self,
        method: reqwest::Method,
        url: &str,
        options: RequestOptions,
    ) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, url);
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        for (name, value) in options.headers {
            builder = builder.header(name, value);
        }
        builder
    }
}

fn convert(response: reqwest::Response) -> HttpResponse {
    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect();
    let body = response
        .bytes_stream()
        .map(|chunk| chunk.map_err(Error::Network))
        .boxed();

    HttpResponse::new(status, headers, body)
}

#[async_trait]
impl HttpSession for ReqwestSession {
    async fn get(&self, url: &str, options: RequestOptions) -> Result<HttpResponse> {
        let response = self
            .request(reqwest::Method::GET, url, options)
            .send()
            .await?;
        Ok(convert(response))
    }

    async fn head(&self, url: &str, options: RequestOptions) -> Result<HttpResponse> {
        let response = self
            .request(reqwest::Method::HEAD, url, options)
            .send()
            .await?;
        Ok(convert(response))
    }
}
