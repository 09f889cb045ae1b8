//! HTTP client for the OpenSky REST API and its OAuth2 token endpoint.

use crate::geo::BoundingBox;
use crate::protocol::{self, ParseError};
use crate::types::{AircraftMetadata, AircraftState};
use async_trait::async_trait;
use base64::Engine;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION},
    Client, StatusCode,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const STATES_URL: &str = "https://opensky-network.org/api/states/all";
pub const METADATA_URL: &str = "https://opensky-network.org/api/metadata/aircraft/icao";
pub const TOKEN_URL: &str =
    "https://auth.opensky-network.org/auth/realms/opensky-network/protocol/openid-connect/token";

/// Header carrying the back-off delay on HTTP 429.
pub const RETRY_AFTER_HEADER: &str = "x-rate-limit-retry-after-seconds";
/// Back-off when the 429 response carries no usable delay.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 900;
/// Upper clamp for the back-off delay (one day).
pub const MAX_RETRY_AFTER_SECS: u64 = 86_400;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Server returned error status: {status}")]
    ServerError { status: StatusCode },
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
    #[error("Invalid response: {0}")]
    InvalidResponse(#[from] ParseError),
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A raw HTTP response as seen by the API layer.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }
}

/// Value of the `Authorization` header for an API request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Bearer(String),
    Basic { username: String, password: String },
}

impl Authorization {
    pub fn header_value(&self) -> String {
        match self {
            Authorization::Bearer(token) => format!("Bearer {}", token),
            Authorization::Basic { username, password } => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", username, password));
                format!("Basic {}", encoded)
            }
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Authorization::Bearer(_) => "bearer",
            Authorization::Basic { .. } => "basic",
        }
    }
}

/// The network boundary. Implemented by [`ReqwestTransport`] and by test doubles.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, authorization: Option<String>) -> Result<HttpResponse, ClientError>;

    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<HttpResponse, ClientError>;
}

/// [`Transport`] backed by a shared reqwest client.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .gzip(true)
            .build()?;

        Ok(Self { client })
    }

    async fn into_response(response: reqwest::Response) -> Result<HttpResponse, ClientError> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, authorization: Option<String>) -> Result<HttpResponse, ClientError> {
        let mut request = self.client.get(url);
        if let Some(value) = authorization {
            request = request.header(AUTHORIZATION, value);
        }
        Self::into_response(request.send().await?).await
    }

    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<HttpResponse, ClientError> {
        let response = self.client.post(url).form(form).send().await?;
        Self::into_response(response).await
    }
}

/// Client-credentials grant returned by the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    /// Lifetime in seconds
    pub expires_in: f64,
}

/// Typed access to the three endpoints.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Fetch the state vectors inside `bbox`.
    pub async fn fetch_states(
        &self,
        bbox: &BoundingBox,
        authorization: Option<&Authorization>,
    ) -> Result<Vec<AircraftState>, ClientError> {
        let url = format!("{}?{}", STATES_URL, bbox.to_query_string());

        tracing::debug!(
            "Fetching: {} (auth: {})",
            url,
            authorization.map_or("none", Authorization::scheme)
        );

        let response = self
            .transport
            .get(&url, authorization.map(Authorization::header_value))
            .await?;
        let body = check_status(response)?;
        Ok(protocol::parse_states(&body)?)
    }

    /// Fetch static metadata for one aircraft.
    pub async fn fetch_metadata(
        &self,
        icao24: &str,
        authorization: Option<&Authorization>,
    ) -> Result<AircraftMetadata, ClientError> {
        let url = format!("{}/{}", METADATA_URL, icao24);
        let response = self
            .transport
            .get(&url, authorization.map(Authorization::header_value))
            .await?;
        let body = check_status(response)?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Run a client-credentials grant.
    pub async fn request_token(&self, client_id: &str, client_secret: &str) -> Result<TokenGrant, ClientError> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ];
        let response = self.transport.post_form(TOKEN_URL, &form).await?;
        let body = check_status(response)?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Map a response to its body, or to the error its status implies.
fn check_status(response: HttpResponse) -> Result<Vec<u8>, ClientError> {
    match response.status {
        status if status.is_success() => Ok(response.body),
        StatusCode::TOO_MANY_REQUESTS => {
            let header = response
                .headers
                .get(RETRY_AFTER_HEADER)
                .and_then(|v| v.to_str().ok());
            Err(ClientError::RateLimited {
                retry_after: retry_after(header),
            })
        }
        status => Err(ClientError::ServerError { status }),
    }
}

/// Back-off delay for a 429 response, clamped to one day.
pub fn retry_after(header: Option<&str>) -> Duration {
    let secs = header
        .and_then(|v| parse_delay_secs(v.trim()))
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
    Duration::from_secs(secs)
}

/// Signed integer seconds, saturated to `[0, MAX_RETRY_AFTER_SECS]` whatever their length.
fn parse_delay_secs(value: &str) -> Option<u64> {
    let (negative, digits) = match value.strip_prefix('-') {
        Some(digits) => (true, digits),
        None => (false, value.strip_prefix('+').unwrap_or(value)),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if negative {
        return Some(0);
    }
    // Only overflow can fail once the digits are validated
    Some(digits.parse::<u64>().map_or(MAX_RETRY_AFTER_SECS, |v| v.min(MAX_RETRY_AFTER_SECS)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;

    #[test]
    fn test_retry_after_clamp() {
        assert_eq!(retry_after(Some("999999")), Duration::from_secs(86_400));
        assert_eq!(retry_after(Some("120")), Duration::from_secs(120));
        assert_eq!(retry_after(Some("-5")), Duration::from_secs(0));
    }

    #[test]
    fn test_retry_after_oversized_saturates() {
        assert_eq!(
            retry_after(Some("123456789012345678901234567890")),
            Duration::from_secs(86_400)
        );
        assert_eq!(
            retry_after(Some("-123456789012345678901234567890")),
            Duration::from_secs(0)
        );
        assert_eq!(retry_after(Some(" 60 ")), Duration::from_secs(60));
        assert_eq!(retry_after(Some("12abc")), Duration::from_secs(900));
        assert_eq!(retry_after(Some("-")), Duration::from_secs(900));
    }

    #[test]
    fn test_retry_after_default() {
        assert_eq!(retry_after(None), Duration::from_secs(900));
        assert_eq!(retry_after(Some("soon")), Duration::from_secs(900));
        assert_eq!(retry_after(Some("")), Duration::from_secs(900));
    }

    #[test]
    fn test_authorization_headers() {
        assert_eq!(Authorization::Bearer("abc".to_string()).header_value(), "Bearer abc");

        let basic = Authorization::Basic {
            username: "user".to_string(),
            password: "pass".to_string(),
        };
        assert_eq!(basic.header_value(), "Basic dXNlcjpwYXNz");
    }

    #[tokio::test]
    async fn test_fetch_states_sends_bbox_and_auth() {
        let transport = Arc::new(MockTransport::new());
        transport.respond("/states/all", HttpResponse::new(StatusCode::OK, r#"{"time":1,"states":[]}"#));

        let api = ApiClient::new(transport.clone());
        let bbox = BoundingBox::new(40.0, -4.0, 41.0, -3.0);
        let auth = Authorization::Bearer("tok".to_string());

        let states = api.fetch_states(&bbox, Some(&auth)).await.unwrap();
        assert!(states.is_empty());

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].url,
            "https://opensky-network.org/api/states/all?lamin=40&lomin=-4&lamax=41&lomax=-3"
        );
        assert_eq!(requests[0].authorization.as_deref(), Some("Bearer tok"));
    }

    #[tokio::test]
    async fn test_fetch_states_rate_limited() {
        let transport = Arc::new(MockTransport::new());
        transport.respond("/states/all", MockTransport::rate_limited(Some("30")));

        let api = ApiClient::new(transport);
        let err = api
            .fetch_states(&BoundingBox::new(0.0, 0.0, 1.0, 1.0), None)
            .await
            .unwrap_err();

        match err {
            ClientError::RateLimited { retry_after } => assert_eq!(retry_after, Duration::from_secs(30)),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_states_server_error() {
        let transport = Arc::new(MockTransport::new());
        transport.respond("/states/all", HttpResponse::new(StatusCode::SERVICE_UNAVAILABLE, ""));

        let api = ApiClient::new(transport);
        let err = api
            .fetch_states(&BoundingBox::new(0.0, 0.0, 1.0, 1.0), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ServerError { status } if status == StatusCode::SERVICE_UNAVAILABLE));
    }

    #[tokio::test]
    async fn test_request_token_form() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(
            "/token",
            HttpResponse::new(StatusCode::OK, r#"{"access_token":"xyz","expires_in":1800,"token_type":"Bearer"}"#),
        );

        let api = ApiClient::new(transport.clone());
        let grant = api.request_token("id", "secret").await.unwrap();
        assert_eq!(grant.access_token, "xyz");
        assert_eq!(grant.expires_in, 1800.0);

        let requests = transport.requests();
        assert_eq!(
            requests[0].form,
            vec![
                ("grant_type".to_string(), "client_credentials".to_string()),
                ("client_id".to_string(), "id".to_string()),
                ("client_secret".to_string(), "secret".to_string()),
            ]
        );
    }
}
