//! Scripted `HttpTransport` for driving conversations without a server.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mainzelliste_client::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, TransportError};
use serde_json::json;

/// Replays queued responses in order and records every request it receives.
/// Requests beyond the script fail with a transport error.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Result<HttpResponse, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::default(),
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// `(method, path)` of every recorded request.
    pub fn calls(&self) -> Vec<(HttpMethod, String)> {
        self.requests()
            .iter()
            .map(|r| (r.method(), r.url().path().to_string()))
            .collect()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Request("no scripted response left".to_string())))
    }
}

pub fn session_created(session_id: &str) -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse::json(201, &json!({"sessionId": session_id})))
}

pub fn token_created(token_id: &str) -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse::json(201, &json!({"id": token_id, "type": "readPatients"})))
}

pub fn no_content() -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse::empty(204))
}
