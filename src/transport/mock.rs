//! Scripted in-memory transport.
//!
//! Available in all builds so integration tests can drive the clients
//! without a network.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use super::{HttpRequest, HttpResponse, HttpTransport, TransportError};

type Rule = (String, Result<HttpResponse, TransportError>);

/// Replays queued responses and records every request it sees.
///
/// Responses queued with [`ScriptedTransport::on`] are matched by URL path
/// substring; the first matching rule is consumed. Requests with no matching
/// rule receive the default response (200 with `{}`).
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    rules: Arc<Mutex<VecDeque<Rule>>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, path_fragment: &str, response: Result<HttpResponse, TransportError>) -> &Self {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back((path_fragment.to_string(), response));
        self
    }

    pub fn on_json(&self, path_fragment: &str, status: u16, body: Value) -> &Self {
        self.on(path_fragment, Ok(json_response(status, body)))
    }

    pub fn on_bytes(&self, path_fragment: &str, content_type: &str, body: Vec<u8>) -> &Self {
        self.on(
            path_fragment,
            Ok(HttpResponse {
                status: 200,
                content_type: Some(content_type.to_string()),
                body,
            }),
        )
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Requests whose URL path contains `fragment`.
    pub fn requests_to(&self, fragment: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.path().contains(fragment))
            .collect()
    }
}

pub fn json_response(status: u16, body: Value) -> HttpResponse {
    HttpResponse {
        status,
        content_type: Some("application/json".into()),
        body: serde_json::to_vec(&body).unwrap_or_default(),
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let path = request.url.path().to_string();
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).push(request);
        let mut rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        match rules.iter().position(|(fragment, _)| path.contains(fragment.as_str())) {
            Some(pos) => rules
                .remove(pos)
                .map(|(_, response)| response)
                .unwrap_or_else(|| Ok(json_response(200, Value::Object(Default::default())))),
            None => Ok(json_response(200, Value::Object(Default::default()))),
        }
    }
}
