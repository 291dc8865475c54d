//! Rate-limited request client with credential rotation.
//!
//! Every outbound call passes through a minimum-interval gate that is held
//! for the duration of the call, so calls issued through one client never
//! overlap. Each attempt consumes the next credential of the ring.

use reqwest::{Method, Url};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, instrument, warn};

use crate::error::RequestError;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, RequestBody};

/// Where the credential travels on each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialPlacement {
    Query(&'static str),
    Header(&'static str),
}

/// Round-robin credential list. Selecting a credential and advancing the
/// pointer is a single atomic step.
pub struct CredentialRing {
    keys: Vec<String>,
    next: AtomicUsize,
}

impl CredentialRing {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys = keys
            .into_iter()
            .map(Into::into)
            .map(|k: String| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        Self {
            keys,
            next: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn next(&self) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.keys.len();
        Some(self.keys[idx].as_str())
    }
}

impl fmt::Debug for CredentialRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRing")
            .field("len", &self.keys.len())
            .finish_non_exhaustive()
    }
}

/// Redact a credential for logs.
pub fn redact(credential: &str) -> String {
    let prefix: String = credential.chars().take(8).collect();
    format!("{}...", prefix)
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub min_interval: Duration,
    pub max_attempts: usize,
    pub rate_limit_delay: Duration,
    pub timeout: Option<Duration>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(1000),
            max_attempts: 3,
            rate_limit_delay: Duration::from_millis(2000),
            timeout: None,
        }
    }
}

pub struct RateLimitedClient {
    transport: Arc<dyn HttpTransport>,
    base_url: Url,
    credentials: CredentialRing,
    placement: CredentialPlacement,
    settings: ClientSettings,
    last_call: Mutex<Option<Instant>>,
}

impl fmt::Debug for RateLimitedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitedClient")
            .field("base_url", &self.base_url)
            .field("credentials", &self.credentials)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl RateLimitedClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        base_url: Url,
        credentials: CredentialRing,
        placement: CredentialPlacement,
        settings: ClientSettings,
    ) -> Self {
        Self {
            transport,
            base_url,
            credentials,
            placement,
            settings,
            last_call: Mutex::new(None),
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.credentials.is_empty()
    }

    pub fn transport(&self) -> Arc<dyn HttpTransport> {
        Arc::clone(&self.transport)
    }

    /// Number of attempts a single `send` may make.
    pub fn attempt_budget(&self) -> usize {
        self.settings
            .max_attempts
            .min(self.credentials.len())
            .max(1)
    }

    pub async fn send(
        &self,
        method: Method,
        endpoint: &str,
        body: RequestBody,
    ) -> Result<Value, RequestError> {
        self.send_with_timeout(method, endpoint, body, None).await
    }

    /// Send one logical request, retrying with the next credential on
    /// retryable failures. `timeout` overrides the client default.
    #[instrument(skip_all, fields(endpoint = endpoint))]
    pub async fn send_with_timeout(
        &self,
        method: Method,
        endpoint: &str,
        body: RequestBody,
        timeout: Option<Duration>,
    ) -> Result<Value, RequestError> {
        if self.credentials.is_empty() {
            return Err(RequestError::NoCredentials);
        }
        let url = self
            .base_url
            .join(endpoint)
            .map_err(|e| RequestError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;
        let timeout = timeout.or(self.settings.timeout);
        let attempts = self.attempt_budget();

        let mut last_err = RequestError::NoCredentials;
        for attempt in 1..=attempts {
            let credential = self.credentials.next().ok_or(RequestError::NoCredentials)?;
            let request =
                self.build_request(method.clone(), url.clone(), credential, body.clone(), timeout);
            debug!(attempt, attempts, credential = %redact(credential), "sending request");

            let outcome = match self.execute_paced(request).await {
                Ok(response) => decode_response(response),
                Err(err) => Err(err),
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(attempt, attempts, error = %err, "request attempt failed");
                    let retry = err.is_retryable() && attempt < attempts;
                    let limited = err.is_rate_limited();
                    last_err = err;
                    if !retry {
                        break;
                    }
                    if limited {
                        sleep(self.settings.rate_limit_delay).await;
                    }
                }
            }
        }
        Err(last_err)
    }

    fn build_request(
        &self,
        method: Method,
        mut url: Url,
        credential: &str,
        body: RequestBody,
        timeout: Option<Duration>,
    ) -> HttpRequest {
        let mut headers = Vec::new();
        match self.placement {
            CredentialPlacement::Query(name) => {
                url.query_pairs_mut().append_pair(name, credential);
            }
            CredentialPlacement::Header(name) => {
                headers.push((name.to_string(), credential.to_string()))
            }
        }
        HttpRequest {
            method,
            url,
            headers,
            body,
            timeout,
        }
    }

    /// Wait out the minimum interval, then issue the call while still holding
    /// the gate.
    async fn execute_paced(&self, request: HttpRequest) -> Result<HttpResponse, RequestError> {
        let mut last = self.last_call.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.settings.min_interval;
            let now = Instant::now();
            if ready_at > now {
                sleep(ready_at - now).await;
            }
        }
        *last = Some(Instant::now());
        let response = self.transport.execute(request).await?;
        Ok(response)
    }
}

fn decode_response(response: HttpResponse) -> Result<Value, RequestError> {
    if response.is_success() {
        if response.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        return serde_json::from_slice(&response.body)
            .map_err(|e| RequestError::Decode(e.to_string()));
    }
    Err(RequestError::Upstream {
        status: response.status,
        message: error_message(&response),
    })
}

fn error_message(response: &HttpResponse) -> String {
    match serde_json::from_slice::<Value>(&response.body) {
        Ok(body) => extract_error_message(&body),
        Err(_) => {
            let text = response.text();
            let text = text.trim();
            if text.is_empty() {
                format!("HTTP {}", response.status)
            } else {
                text.to_string()
            }
        }
    }
}

/// Pull a readable message out of an upstream error body. Known fields are
/// inspected in the order `msg`, `message`, `detail`, `error`, `errors[]`;
/// any other shape is serialized whole.
pub fn extract_error_message(body: &Value) -> String {
    match body {
        Value::String(s) => s.clone(),
        Value::Object(map) => {
            for key in ["msg", "message", "detail", "error"] {
                if let Some(message) = map.get(key).and_then(message_of) {
                    return message;
                }
            }
            if let Some(message) = map.get("errors").and_then(message_of) {
                return message;
            }
            body.to_string()
        }
        other => other.to_string(),
    }
}

fn message_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(_) => Some(extract_error_message(value)),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(message_of).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("; "))
            }
        }
        other => Some(other.to_string()),
    }
}
