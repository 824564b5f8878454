//! Ownership-token session client for the Moku REST API.
//!
//! A [`SessionClient`] starts unclaimed. [`SessionClient::claim`] acquires the
//! device's `Moku-Client-Key`, after which every request carries that key.

use std::fmt;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::{Client, Method, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::envelope::{failure_messages, summarize_body, Envelope};
use crate::oscilloscope::Oscilloscope;

/// Header carrying the ownership token in both directions.
pub const CLIENT_KEY_HEADER: &str = "Moku-Client-Key";
/// Address of a Moku when connected to its own Wi-Fi access point.
pub const DEFAULT_DEVICE_ADDRESS: &str = "192.168.73.1";

const CLIENT_KEY_HEADER_LOWERCASE: &str = "moku-client-key";

const CLAIM_OWNERSHIP_PATH: &str = "moku/claim_ownership";
const RELINQUISH_OWNERSHIP_PATH: &str = "moku/relinquish_ownership";
const NAME_PATH: &str = "moku/name";
const SERIAL_NUMBER_PATH: &str = "moku/serial_number";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SessionDefaults;

impl SessionDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
}

#[derive(Clone, Debug)]
pub struct SessionClientOptions {
    pub connect_timeout: Duration,
    /// Upper bound for a whole request, including a `get_data` that waits for
    /// a fresh acquisition.
    pub request_timeout: Duration,
}

impl Default for SessionClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: SessionDefaults::CONNECT_TIMEOUT,
            request_timeout: SessionDefaults::REQUEST_TIMEOUT,
        }
    }
}

/// Base address of a device's API, e.g. `http://192.168.73.1/api/`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    base: Url,
}

impl Endpoint {
    /// Builds the API base for a bare host or IP address, optionally with a
    /// port. A bare IPv6 address is bracketed.
    pub fn from_host(host: &str) -> Result<Self, SessionError> {
        let host = host.trim().trim_end_matches('/');
        if host.is_empty() {
            return Err(SessionError::InvalidEndpoint("empty host".to_string()));
        }
        // More than one colon can only be an IPv6 literal, not `host:port`.
        if !host.starts_with('[') && host.matches(':').count() > 1 {
            return Self::parse(&format!("http://[{host}]/api/"));
        }
        Self::parse(&format!("http://{host}/api/"))
    }

    /// Accepts a full `http` or `https` URL. A trailing slash is added so
    /// relative paths resolve below it.
    pub fn parse(url: &str) -> Result<Self, SessionError> {
        let mut base = Url::parse(url.trim())
            .map_err(|err| SessionError::InvalidEndpoint(format!("{url}: {err}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(SessionError::InvalidEndpoint(format!(
                "{url}: unsupported scheme `{}`",
                base.scheme()
            )));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.set_query(None);
        base.set_fragment(None);

        Ok(Self { base })
    }

    pub fn as_url(&self) -> &Url {
        &self.base
    }

    /// Resolves `path` relative to the base; leading slashes are ignored.
    pub fn join(&self, path: &str) -> Result<Url, SessionError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|err| SessionError::InvalidEndpoint(format!("{path}: {err}")))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.base, f)
    }
}

/// Options for [`SessionClient::claim_with`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ClaimOptions {
    /// Take ownership even if another client currently holds the device.
    pub force_connect: bool,
}

impl ClaimOptions {
    pub fn forced() -> Self {
        Self {
            force_connect: true,
        }
    }
}

#[derive(Serialize)]
struct ClaimBody {
    force_connect: bool,
}

#[derive(Debug)]
pub struct SessionClient {
    http: Client,
    endpoint: Endpoint,
    client_key: Option<SecretString>,
    request_timeout: Duration,
}

impl SessionClient {
    pub fn new(endpoint: Endpoint) -> Result<Self, SessionError> {
        Self::with_options(endpoint, SessionClientOptions::default())
    }

    pub fn with_options(
        endpoint: Endpoint,
        options: SessionClientOptions,
    ) -> Result<Self, SessionError> {
        let http = Client::builder()
            .no_proxy()
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(SessionError::Transport)?;

        Ok(Self {
            http,
            endpoint,
            client_key: None,
            request_timeout: options.request_timeout,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The ownership token from the last successful claim, if any.
    pub fn client_key(&self) -> Option<&SecretString> {
        self.client_key.as_ref()
    }

    pub fn is_claimed(&self) -> bool {
        self.client_key.is_some()
    }

    /// Claims ownership of the device without a request body.
    pub async fn claim(&mut self) -> Result<Envelope, SessionError> {
        self.claim_with(ClaimOptions::default()).await
    }

    /// Claims ownership, storing the returned key for all later requests.
    ///
    /// A non-success HTTP status yields [`SessionError::ClaimDenied`] and
    /// leaves any previously stored key untouched. Claiming again replaces
    /// the stored key with the new one.
    pub async fn claim_with(&mut self, options: ClaimOptions) -> Result<Envelope, SessionError> {
        let url = self.endpoint.join(CLAIM_OWNERSHIP_PATH)?;
        let mut builder = self
            .http
            .post(url)
            .timeout(self.request_timeout)
            .headers(request_headers(self.client_key.as_ref())?);
        builder = if options.force_connect {
            builder.json(&ClaimBody {
                force_connect: true,
            })
        } else {
            builder.body("")
        };

        let response = builder.send().await.map_err(SessionError::Transport)?;
        let status = response.status();
        let header_key = response
            .headers()
            .get(CLIENT_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(SessionError::Transport)?;

        if !status.is_success() {
            debug!(event = "session_claim_denied", status = status.as_u16());
            return Err(SessionError::ClaimDenied {
                status,
                messages: failure_messages(&body),
            });
        }

        let envelope = Envelope::decode(&body)?;
        if let Envelope::Failure { code, messages } = &envelope {
            return Err(SessionError::Api {
                code: *code,
                messages: messages.clone(),
            });
        }

        let client_key = select_client_key(header_key, &envelope)?;

        let reclaimed = self.client_key.is_some();
        self.client_key = Some(SecretString::new(client_key));
        debug!(
            event = "session_claimed",
            forced = options.force_connect,
            reclaimed
        );

        Ok(envelope)
    }

    /// Gives up ownership and forgets the stored key. Does nothing when the
    /// session was never claimed.
    pub async fn relinquish_ownership(&mut self) -> Result<(), SessionError> {
        if self.client_key.is_none() {
            return Ok(());
        }

        self.post_empty(RELINQUISH_OWNERSHIP_PATH).await?;
        self.client_key = None;
        debug!(event = "session_relinquished");
        Ok(())
    }

    /// Issues a `GET` and returns the envelope's `data`.
    pub async fn get(&self, path: &str) -> Result<Value, SessionError> {
        self.send::<()>(Method::GET, path, None).await
    }

    /// Issues a `POST` with a JSON body and returns the envelope's `data`.
    pub async fn post<B>(&self, path: &str, body: &B) -> Result<Value, SessionError>
    where
        B: Serialize + ?Sized,
    {
        self.send(Method::POST, path, Some(body)).await
    }

    /// Issues a `POST` with an empty body.
    pub async fn post_empty(&self, path: &str) -> Result<Value, SessionError> {
        self.send::<()>(Method::POST, path, None).await
    }

    pub async fn get_as<T>(&self, path: &str) -> Result<T, SessionError>
    where
        T: DeserializeOwned,
    {
        decode_data(self.get(path).await?)
    }

    pub async fn post_as<B, T>(&self, path: &str, body: &B) -> Result<T, SessionError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        decode_data(self.post(path, body).await?)
    }

    /// The device's display name.
    pub async fn name(&self) -> Result<String, SessionError> {
        self.get_as(NAME_PATH).await
    }

    pub async fn serial_number(&self) -> Result<String, SessionError> {
        match self.get(SERIAL_NUMBER_PATH).await? {
            Value::String(serial) => Ok(serial),
            Value::Number(serial) => Ok(serial.to_string()),
            other => Err(SessionError::Decode(format!(
                "unexpected serial number: {other}"
            ))),
        }
    }

    /// Oscilloscope endpoints in single-instrument mode.
    pub fn oscilloscope(&self) -> Oscilloscope<'_> {
        Oscilloscope::new(self, None)
    }

    /// Oscilloscope endpoints for an instrument placed in `slot`.
    pub fn oscilloscope_in_slot(&self, slot: u8) -> Oscilloscope<'_> {
        Oscilloscope::new(self, Some(slot))
    }

    async fn send<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Value, SessionError>
    where
        B: Serialize + ?Sized,
    {
        let url = self.endpoint.join(path)?;
        debug!(event = "session_request", method = %method, path);

        let is_post = method == Method::POST;
        let mut builder = self
            .http
            .request(method, url)
            .timeout(self.request_timeout)
            .headers(request_headers(self.client_key.as_ref())?);
        if let Some(body) = body {
            builder = builder.json(body);
        } else if is_post {
            builder = builder.body("");
        }

        let response = builder.send().await.map_err(SessionError::Transport)?;
        let status = response.status();
        let body = response.text().await.map_err(SessionError::Transport)?;

        let envelope = match Envelope::decode(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(SessionError::HttpStatus {
                    status,
                    body: summarize_body(&body),
                });
            }
            Err(err) => return Err(err),
        };

        match envelope {
            Envelope::Success(data) => Ok(data),
            Envelope::Failure { code, messages } => {
                debug!(event = "session_api_error", path, code);
                Err(SessionError::Api { code, messages })
            }
        }
    }
}

/// Headers for one request given the current ownership state.
pub(crate) fn request_headers(
    client_key: Option<&SecretString>,
) -> Result<HeaderMap, SessionError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    if let Some(client_key) = client_key {
        let mut value = HeaderValue::from_str(client_key.expose_secret()).map_err(|_| {
            SessionError::Decode("client key is not a valid header value".to_string())
        })?;
        value.set_sensitive(true);
        headers.insert(HeaderName::from_static(CLIENT_KEY_HEADER_LOWERCASE), value);
    }

    Ok(headers)
}

/// Picks the ownership key from a successful claim reply. The device sends it
/// both as the `Moku-Client-Key` header and as `data`; the header wins.
fn select_client_key(
    header_key: Option<String>,
    envelope: &Envelope,
) -> Result<String, SessionError> {
    let client_key = header_key
        .filter(|key| !key.is_empty())
        .or_else(|| {
            envelope
                .data()
                .and_then(Value::as_str)
                .filter(|key| !key.is_empty())
                .map(str::to_string)
        })
        .ok_or_else(|| {
            SessionError::Decode("claim response carried no client key".to_string())
        })?;

    if HeaderValue::from_str(&client_key).is_err() {
        return Err(SessionError::Decode(
            "client key is not a valid header value".to_string(),
        ));
    }
    Ok(client_key)
}

fn decode_data<T: DeserializeOwned>(data: Value) -> Result<T, SessionError> {
    serde_json::from_value(data)
        .map_err(|err| SessionError::Decode(format!("unexpected data shape: {err}")))
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("request failed: {0}")]
    Transport(reqwest::Error),

    #[error("ownership claim denied (http status {status}): {}", .messages.join("; "))]
    ClaimDenied {
        status: StatusCode,
        messages: Vec<String>,
    },

    #[error("device error {code}: {}", .messages.join("; "))]
    Api { code: i64, messages: Vec<String> },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl SessionError {
    /// Whether a caller may reasonably retry. Only transient transport
    /// failures qualify; device-reported errors never do.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_timeout() || err.is_connect(),
            Self::ClaimDenied { .. }
            | Self::Api { .. }
            | Self::Decode(_)
            | Self::HttpStatus { .. }
            | Self::InvalidEndpoint(_) => false,
        }
    }

    /// HTTP status attached to the error, when the failure carried one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::ClaimDenied { status, .. } | Self::HttpStatus { status, .. } => Some(*status),
            Self::Transport(err) => err.status(),
            _ => None,
        }
    }
}
