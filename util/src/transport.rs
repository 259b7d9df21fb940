use reqwest::{
    blocking::Client as Reqwest,
    header::{HeaderName, HeaderValue},
    Method,
};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, trace};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,

    #[error("Unable to connect: {0}")]
    Connection(String),

    #[error("Server answered with status {status}")]
    Status { status: u16, body: String },

    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_connect() {
            Self::Connection(error.to_string())
        } else {
            Self::Other(error.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Moves request bodies to a service and back. Error statuses are returned
/// as responses; only failures to exchange anything are errors.
pub trait Transport {
    fn request(
        &self,
        url: &str,
        method: &str,
        body: Vec<u8>,
        headers: &[(String, String)],
    ) -> Result<Response, TransportError>;
}

#[derive(Debug, Clone, Default, typed_builder::TypedBuilder)]
pub struct HttpSettings {
    #[builder(default, setter(strip_option))]
    pub timeout: Option<Duration>,
    /// Sent with every request, before the per-request headers.
    #[builder(default)]
    pub headers: Vec<(String, String)>,
    #[builder(default, setter(strip_option))]
    pub credentials: Option<(String, String)>,
}

/// Blocking HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Reqwest,
    settings: HttpSettings,
}

impl HttpTransport {
    pub fn new(settings: HttpSettings) -> Result<Self, TransportError> {
        let mut builder = Reqwest::builder();
        if let Some(timeout) = settings.timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            settings,
        })
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self {
            client: Reqwest::new(),
            settings: HttpSettings::default(),
        }
    }
}

impl Transport for HttpTransport {
    fn request(
        &self,
        url: &str,
        method: &str,
        body: Vec<u8>,
        headers: &[(String, String)],
    ) -> Result<Response, TransportError> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| TransportError::Other(format!("invalid HTTP method {}", method)))?;
        info!(%url, %method, "sending request");

        let mut request = self.client.request(method, url).body(body);
        for (name, value) in self.settings.headers.iter().chain(headers) {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| TransportError::Other(format!("invalid header name {}", name)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| TransportError::Other(format!("invalid value for header {}", name)))?;
            request = request.header(name, value);
        }
        if let Some((user, password)) = &self.settings.credentials {
            request = request.basic_auth(user, Some(password));
        }

        let response = request.send()?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_owned(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.bytes()?.to_vec();
        trace!(status, length = body.len(), "received response");

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}
