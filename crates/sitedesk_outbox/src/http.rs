//! HTTP transport implementation.
//!
//! The HTTP library is abstracted behind [`HttpClient`] so the transport can
//! be driven by reqwest in production and by anything else in tests.

use crate::error::OutboxResult;
use crate::mutation::Method;
use crate::transport::{MutationTransport, ReplayFuture, ReplayRequest, ReplayResponse};
use parking_lot::RwLock;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`HttpClient::send`]; resolves to the status code.
pub type HttpFuture<'a> = Pin<Box<dyn Future<Output = OutboxResult<u16>> + Send + 'a>>;

/// HTTP client abstraction.
///
/// Implementations send one request with the JSON body as recorded, a
/// `null` body included, and return the status of whatever response
/// arrived. The response body is not needed.
pub trait HttpClient: Send + Sync {
    /// Sends a request.
    fn send<'a>(&'a self, method: Method, url: &'a str, body: &'a Value) -> HttpFuture<'a>;
}

/// HTTP-based mutation transport.
pub struct HttpTransport<C: HttpClient> {
    /// Base URL of the API server (e.g. `https://api.example.com/v1`).
    base_url: String,
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Joins the base URL and an endpoint path.
    pub fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        let path = endpoint.trim_start_matches('/');
        format!("{base}/{path}")
    }
}

impl<C: HttpClient> MutationTransport for HttpTransport<C> {
    fn replay<'a>(&'a self, request: &'a ReplayRequest) -> ReplayFuture<'a> {
        Box::pin(async move {
            let url = self.url_for(&request.endpoint);
            match self.client.send(request.method, &url, &request.body).await {
                Ok(status) => {
                    *self.last_error.write() = None;
                    Ok(ReplayResponse { status })
                }
                Err(e) => {
                    *self.last_error.write() = Some(e.to_string());
                    Err(e)
                }
            }
        })
    }
}

impl<C: HttpClient> std::fmt::Debug for HttpTransport<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "reqwest-client")]
pub use reqwest_client::ReqwestClient;

#[cfg(feature = "reqwest-client")]
mod reqwest_client {
    use super::{HttpClient, HttpFuture};
    use crate::error::{OutboxError, OutboxResult};
    use crate::mutation::Method;
    use serde_json::Value;
    use std::time::Duration;

    /// [`HttpClient`] backed by `reqwest`.
    #[derive(Debug, Clone)]
    pub struct ReqwestClient {
        client: reqwest::Client,
    }

    impl ReqwestClient {
        /// Builds a client whose requests time out after `timeout`.
        pub fn new(timeout: Duration) -> OutboxResult<Self> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| OutboxError::InvalidConfig(format!("http client: {e}")))?;
            Ok(Self { client })
        }

        /// Wraps an existing client.
        pub fn from_client(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    fn to_reqwest(method: Method) -> reqwest::Method {
        match method {
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }

    fn map_error(e: reqwest::Error) -> OutboxError {
        if e.is_timeout() {
            OutboxError::Timeout
        } else if e.is_builder() {
            OutboxError::transport_fatal(e.to_string())
        } else {
            OutboxError::transport_retryable(e.to_string())
        }
    }

    /// Every request carries the recorded body as JSON, `null` included.
    pub(super) fn build_request(
        client: &reqwest::Client,
        method: Method,
        url: &str,
        body: &Value,
    ) -> reqwest::RequestBuilder {
        client.request(to_reqwest(method), url).json(body)
    }

    impl HttpClient for ReqwestClient {
        fn send<'a>(&'a self, method: Method, url: &'a str, body: &'a Value) -> HttpFuture<'a> {
            Box::pin(async move {
                let response = build_request(&self.client, method, url, body)
                    .send()
                    .await
                    .map_err(map_error)?;
                Ok(response.status().as_u16())
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OutboxError;
    use crate::mutation::PendingMutation;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingClient {
        calls: Mutex<Vec<(Method, String, Value)>>,
        fail: bool,
    }

    impl HttpClient for RecordingClient {
        fn send<'a>(&'a self, method: Method, url: &'a str, body: &'a Value) -> HttpFuture<'a> {
            Box::pin(async move {
                self.calls
                    .lock()
                    .push((method, url.to_string(), body.clone()));
                if self.fail {
                    Err(OutboxError::transport_retryable("connection refused"))
                } else {
                    Ok(204)
                }
            })
        }
    }

    #[test]
    fn url_joining() {
        let transport = HttpTransport::new("https://api.test/v1/", RecordingClient::default());
        assert_eq!(transport.url_for("/widgets/1"), "https://api.test/v1/widgets/1");
        assert_eq!(transport.url_for("widgets"), "https://api.test/v1/widgets");
        assert_eq!(
            transport.url_for("https://other.test/x"),
            "https://other.test/x"
        );
    }

    #[tokio::test]
    async fn replay_sends_recorded_request() {
        let transport = HttpTransport::new("https://api.test", RecordingClient::default());
        let mutation = PendingMutation::new("/staff/4", Method::Patch, json!({"role": "lead"}));

        let response = transport
            .replay(&ReplayRequest::for_mutation(&mutation))
            .await
            .unwrap();

        assert_eq!(response.status, 204);
        let calls = transport.client.calls.lock();
        assert_eq!(
            calls[0],
            (
                Method::Patch,
                "https://api.test/staff/4".to_string(),
                json!({"role": "lead"})
            )
        );
    }

    #[tokio::test]
    async fn failure_is_remembered() {
        let client = RecordingClient {
            fail: true,
            ..RecordingClient::default()
        };
        let transport = HttpTransport::new("https://api.test", client);
        let mutation = PendingMutation::new("/sites", Method::Post, json!({}));

        let err = transport
            .replay(&ReplayRequest::for_mutation(&mutation))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(transport.last_error().unwrap().contains("connection refused"));
    }

    #[cfg(feature = "reqwest-client")]
    #[test]
    fn reqwest_client_builds() {
        assert!(ReqwestClient::new(std::time::Duration::from_secs(5)).is_ok());
    }

    #[cfg(feature = "reqwest-client")]
    #[test]
    fn null_body_is_sent_as_json() {
        let client = reqwest::Client::new();
        let request = reqwest_client::build_request(
            &client,
            Method::Delete,
            "https://api.test/staff/2",
            &Value::Null,
        )
        .build()
        .unwrap();

        assert_eq!(request.method(), &reqwest::Method::DELETE);
        assert_eq!(
            request.body().and_then(|b| b.as_bytes()),
            Some(&b"null"[..])
        );
        assert_eq!(
            request.headers()[reqwest::header::CONTENT_TYPE],
            "application/json"
        );
    }
}
