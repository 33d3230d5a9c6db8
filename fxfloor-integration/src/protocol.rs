use crate::error::IntegrationError;
use bytes::BytesMut;
use futures::{Stream, StreamExt};
use serde::{Serialize, de::DeserializeOwned};
use std::{borrow::Cow, time::Duration};

/// Default timeout applied to broker HTTP polls.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// Http request that can be executed by a [`RestClient`].
pub trait RestRequest {
    /// Expected response type if the request is successful.
    type Response: DeserializeOwned;

    /// Serialisable request body, where relevant.
    type Body: Serialize;

    /// Http [`reqwest::Method`] of this request.
    fn method() -> reqwest::Method;

    /// Endpoint path of this request, appended to the client base url.
    fn path(&self) -> Cow<'static, str>;

    /// Optional Http request body.
    fn body(&self) -> Option<&Self::Body> {
        None
    }

    /// Http request timeout.
    fn timeout() -> Duration {
        DEFAULT_POLL_TIMEOUT
    }
}

/// Placeholder body type for [`RestRequest`]s that carry no body.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EmptyBody;

/// Configurable REST client for executing bearer-authenticated [`RestRequest`]s
/// against a broker HTTP API.
#[derive(Clone)]
pub struct RestClient {
    /// HTTP [`reqwest::Client`] for executing [`reqwest::Request`]s.
    pub http_client: reqwest::Client,

    /// Base Url of the API being interacted with.
    pub base_url: Cow<'static, str>,

    /// Bearer token presented on every request.
    auth_token: String,
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("base_url", &self.base_url)
            .field("auth_token", &"<redacted>")
            .finish()
    }
}

impl RestClient {
    pub fn new(base_url: impl Into<Cow<'static, str>>, auth_token: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            base_url: base_url.into(),
            auth_token: auth_token.into(),
        }
    }

    /// Execute the provided [`RestRequest`], deserialising the success response.
    ///
    /// Non-2xx responses surface as [`IntegrationError::Response`] with the raw body
    /// preserved so callers can parse API-specific rejection reasons.
    pub async fn execute<Request>(&self, request: Request) -> Result<Request::Response, IntegrationError>
    where
        Request: RestRequest,
    {
        let url = format!("{}{}", self.base_url, request.path());

        let mut builder = self
            .http_client
            .request(Request::method(), url)
            .timeout(Request::timeout())
            .bearer_auth(&self.auth_token);

        if let Some(body) = request.body() {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let payload = response.bytes().await?;

        if status.is_success() {
            Ok(serde_json::from_slice::<Request::Response>(&payload)?)
        } else {
            Err(IntegrationError::Response {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&payload).into_owned(),
            })
        }
    }

    /// Open a chunked HTTP stream and yield newline-delimited frames.
    ///
    /// Broker transaction and pricing streams are framed as one JSON document per
    /// line; the stream ends when the transport closes it.
    pub async fn stream_lines(
        &self,
        path: &str,
    ) -> Result<impl Stream<Item = Result<String, IntegrationError>> + use<>, IntegrationError>
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http_client
            .get(url)
            .bearer_auth(&self.auth_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let payload = response.bytes().await?;
            return Err(IntegrationError::Response {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&payload).into_owned(),
            });
        }

        let mut buffer = BytesMut::new();
        Ok(response
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(bytes) => {
                    buffer.extend_from_slice(&bytes);
                    let mut lines = Vec::new();
                    while let Some(at) = buffer.iter().position(|byte| *byte == b'\n') {
                        let line = buffer.split_to(at + 1);
                        let text = String::from_utf8_lossy(&line[..at]).trim().to_string();
                        if !text.is_empty() {
                            lines.push(Ok(text));
                        }
                    }
                    futures::stream::iter(lines)
                }
                Err(error) => futures::stream::iter(vec![Err(IntegrationError::Http(error))]),
            })
            .flatten())
    }
}
