//! Client facade: shared HTTP plumbing and constructors for the write and
//! query APIs.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Method, Response, Url};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::options::Options;
use crate::query::QueryApi;
use crate::write_api::WriteApi;
use crate::write_blocking::WriteApiBlocking;
use crate::write_service::WriteConnection;

/// Connection to an InfluxDB 2.x server.
///
/// The client is cheap to clone; clones share the underlying HTTP connection
/// pool. It hands out three APIs: [`write_api`](Client::write_api) for
/// asynchronous batched writes, [`write_api_blocking`](Client::write_api_blocking)
/// for one-request-per-call writes, and [`query_api`](Client::query_api) for
/// streaming Flux queries.
///
/// # Example
///
/// ```ignore
/// use influxdb2_client::Client;
///
/// let client = Client::new("http://localhost:8086", "my-token");
/// assert!(client.ready().await?);
/// ```
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: Url,
    authorization: String,
    options: Options,
}

/// JSON error envelope sent by the server on failed requests.
#[derive(Debug, Default, Deserialize)]
struct ServerMessage {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl Client {
    /// Creates a client for `url` authenticating with `token`, using default
    /// options.
    ///
    /// # Panics
    ///
    /// Panics if the provided URL is invalid.
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_options(url, token, Options::default())
    }

    /// Creates a client with custom [`Options`].
    ///
    /// # Panics
    ///
    /// Panics if the provided URL is invalid.
    pub fn with_options(
        url: impl Into<String>,
        token: impl Into<String>,
        options: Options,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self::with_http_client(http, url, token, options)
    }

    /// Creates a client on top of a preconfigured `reqwest` client, for
    /// custom timeouts, proxies or TLS settings.
    ///
    /// # Panics
    ///
    /// Panics if the provided URL is invalid.
    pub fn with_http_client(
        http: reqwest::Client,
        url: impl Into<String>,
        token: impl Into<String>,
        options: Options,
    ) -> Self {
        let url_str = url.into();
        let base_url = Url::parse(&url_str)
            .unwrap_or_else(|e| panic!("invalid InfluxDB URL '{}': {}", url_str, e));
        Self {
            http,
            base_url,
            authorization: format!("Token {}", token.into()),
            options,
        }
    }

    /// Base URL of the server this client talks to.
    pub fn server_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Options shared by every API handed out by this client.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Asynchronous, buffering write client for the given organization and
    /// bucket. Must be called within a tokio runtime; the pipeline workers
    /// are spawned immediately.
    pub fn write_api(&self, org: &str, bucket: &str) -> WriteApi {
        WriteApi::new(org, bucket, Arc::new(self.clone()))
    }

    /// Blocking write client for the given organization and bucket.
    pub fn write_api_blocking(&self, org: &str, bucket: &str) -> WriteApiBlocking {
        WriteApiBlocking::new(org, bucket, Arc::new(self.clone()))
    }

    /// Query client for the given organization.
    pub fn query_api(&self, org: &str) -> QueryApi {
        QueryApi::new(org, self.clone())
    }

    /// Checks whether the server is up. GET `{base}/ready`, true on 200.
    pub async fn ready(&self) -> Result<bool> {
        let mut url = self.base_url.clone();
        let path = format!("{}/ready", url.path().trim_end_matches('/'));
        url.set_path(&path);
        let response = self
            .http
            .request(Method::GET, url)
            .header(header::USER_AGENT, user_agent())
            .send()
            .await?;
        Ok(response.status() == reqwest::StatusCode::OK)
    }

    /// Shared POST primitive: sets authorization and user-agent, lets
    /// `decorate` add request-specific headers, and turns any non-2xx reply
    /// into [`Error::Server`]. The caller owns the successful response.
    pub(crate) async fn post_request<F>(
        &self,
        url: &str,
        body: reqwest::Body,
        decorate: F,
    ) -> Result<Response>
    where
        F: FnOnce(reqwest::RequestBuilder) -> reqwest::RequestBuilder + Send,
    {
        let request = self
            .http
            .post(url)
            .header(header::AUTHORIZATION, self.authorization.as_str())
            .header(header::USER_AGENT, user_agent());
        let response = decorate(request).body(body).send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(decode_server_error(response).await)
    }
}

#[async_trait]
impl WriteConnection for Client {
    fn options(&self) -> &Options {
        &self.options
    }

    fn server_url(&self) -> &str {
        self.base_url.as_str()
    }

    async fn write_request(
        &self,
        url: &str,
        body: Bytes,
        content_encoding: Option<&'static str>,
    ) -> Result<()> {
        self.post_request(url, body.into(), |req| match content_encoding {
            Some(encoding) => req.header(header::CONTENT_ENCODING, encoding),
            None => req,
        })
        .await
        .map(|_| ())
    }
}

/// Decodes a failed response into [`Error::Server`]: JSON envelope when the
/// content type says so, status line plus raw body otherwise. Empty 429/503
/// replies get fixed code/message fallbacks.
async fn decode_server_error(response: Response) -> Error {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u32>().ok());
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(';')
                .next()
                .unwrap_or("")
                .trim()
                .eq_ignore_ascii_case("application/json")
        })
        .unwrap_or(false);

    let (mut code, mut message) = if is_json {
        match response.json::<ServerMessage>().await {
            Ok(body) => (body.code, body.message),
            Err(_) => (String::new(), String::new()),
        }
    } else {
        (
            status.to_string(),
            response.text().await.unwrap_or_default(),
        )
    };
    if message.is_empty() {
        match status.as_u16() {
            429 => {
                code = "too many requests".to_string();
                message = "exceeded rate limit".to_string();
            }
            503 => {
                code = "unavailable".to_string();
                message = "service temporarily unavailable".to_string();
            }
            _ => {}
        }
    }
    Error::Server {
        status: status.as_u16(),
        code,
        message,
        retry_after,
    }
}

/// Lazily built `influxdb2-client/{version} ({os}; {arch})`.
fn user_agent() -> &'static str {
    static USER_AGENT: OnceLock<String> = OnceLock::new();
    USER_AGENT.get_or_init(|| {
        format!(
            "influxdb2-client/{} ({}; {})",
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS,
            std::env::consts::ARCH
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_url_is_normalized() {
        let client = Client::new("http://localhost:8086", "my-token");
        assert_eq!(client.server_url(), "http://localhost:8086/");
    }

    #[test]
    #[should_panic(expected = "invalid InfluxDB URL")]
    fn test_invalid_url_panics() {
        let _ = Client::new("not a url", "my-token");
    }

    #[test]
    fn test_user_agent_shape() {
        let ua = user_agent();
        assert!(ua.starts_with("influxdb2-client/"));
        assert!(ua.contains(std::env::consts::OS));
        assert!(ua.contains(std::env::consts::ARCH));
    }

    #[test]
    fn test_options_are_shared() {
        let options = Options::default().batch_size(7);
        let client = Client::with_options("http://localhost:8086", "t", options);
        assert_eq!(client.options().batch_size, 7);
        assert_eq!(client.clone().options().batch_size, 7);
    }
}
