//! Session/token/operation conversation with the Mainzelliste.
//!
//! # Design
//! One `Conversation` runs one logical call through a fixed, forward-only
//! sequence of HTTP requests:
//!
//! ```text
//! CreatingSession -> CreatingToken -> PerformingOperation -> [DeletingSession] -> Done
//! ```
//!
//! Each step waits for the previous request to complete. The first failing
//! step ends the conversation with its error. `run` consumes the
//! conversation and returns an `Outcome`: the terminal result, plus the
//! session cleanup still to be done. Callers deliver the result first and run
//! the cleanup afterwards, so nobody waits on the DELETE.
//!
//! Sessions are only cleaned up after a successful operation unless
//! `cleanup_abandoned_sessions` is set; otherwise the server expires them.
//!
//! All log lines are emitted inside a span carrying the conversation id, so
//! concurrent conversations stay distinguishable.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, info_span, warn, Instrument, Span};

use crate::client::ClientSettings;
use crate::error::ApiError;
use crate::http::{HttpBody, HttpMethod, HttpRequest, HttpResponse};
use crate::operation::Operation;
use crate::transport::HttpTransport;

static NEXT_CONVERSATION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique number identifying one conversation in logs and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationId(u64);

impl ConversationId {
    pub fn next() -> Self {
        Self(NEXT_CONVERSATION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum ConversationState {
    Created,
    CreatingSession,
    CreatingToken,
    PerformingOperation,
    DeletingSession,
    Done,
}

/// Terminal result of a conversation and the cleanup it leaves behind.
#[must_use]
pub(crate) struct Outcome<T> {
    pub(crate) result: Result<T, ApiError>,
    pub(crate) cleanup: Option<SessionCleanup>,
}

/// Best-effort deletion of a session. Failures are logged, never returned.
#[must_use]
pub(crate) struct SessionCleanup {
    settings: Arc<ClientSettings>,
    transport: Arc<dyn HttpTransport>,
    session_id: String,
    span: Span,
}

impl SessionCleanup {
    pub(crate) fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Issues `DELETE /sessions/{id}`. Returns whether the server confirmed.
    pub(crate) async fn run(self) -> bool {
        let span = self.span.clone();
        async move {
            debug!(state = ?ConversationState::DeletingSession, "state transition");
            let path = format!("/sessions/{}", self.session_id);
            let request = self.settings.create_request(HttpMethod::Delete, &path, &[], HttpBody::null());

            let deleted = match self.transport.send(request).await {
                Ok(response) if response.status() == 204 => {
                    debug!(session = %self.session_id, "session deleted");
                    true
                }
                Ok(response) => {
                    warn!(
                        session = %self.session_id,
                        status = response.status(),
                        body = %response.body().text(),
                        "failed to delete session"
                    );
                    false
                }
                Err(e) => {
                    warn!(session = %self.session_id, error = %e, "failed to delete session");
                    false
                }
            };
            debug!(state = ?ConversationState::Done, "state transition");
            deleted
        }
        .instrument(span)
        .await
    }
}

/// One in-flight logical call against the service.
pub(crate) struct Conversation<O: Operation> {
    id: ConversationId,
    settings: Arc<ClientSettings>,
    transport: Arc<dyn HttpTransport>,
    operation: O,
    state: ConversationState,
    session_id: Option<String>,
    token_id: Option<String>,
}

impl<O: Operation> Conversation<O> {
    pub(crate) fn new(settings: Arc<ClientSettings>, transport: Arc<dyn HttpTransport>, operation: O) -> Self {
        Self {
            id: ConversationId::next(),
            settings,
            transport,
            operation,
            state: ConversationState::Created,
            session_id: None,
            token_id: None,
        }
    }

    pub(crate) fn id(&self) -> ConversationId {
        self.id
    }

    /// Runs all steps and returns the terminal result. Consumes the
    /// conversation; it is never reused.
    pub(crate) async fn run(mut self) -> Outcome<O::Output> {
        let span = info_span!("conversation", id = self.id.get(), operation = O::NAME);
        async move {
            info!("conversation started");
            let result = self.perform().await;

            let cleanup = match (&result, self.session_id.take()) {
                (Ok(_), Some(session_id)) => Some(session_id),
                (Err(_), Some(session_id)) if self.settings.cleanup_abandoned_sessions => {
                    debug!(session = %session_id, "cleaning up session of failed conversation");
                    Some(session_id)
                }
                (Err(_), Some(session_id)) => {
                    debug!(session = %session_id, "abandoning session");
                    None
                }
                (_, None) => None,
            }
            .map(|session_id| SessionCleanup {
                settings: Arc::clone(&self.settings),
                transport: Arc::clone(&self.transport),
                session_id,
                span: Span::current(),
            });

            match &result {
                Ok(_) => info!("conversation succeeded"),
                Err(e) => warn!(error = %e, "conversation failed"),
            }
            if cleanup.is_none() {
                self.advance(ConversationState::Done);
            }

            Outcome { result, cleanup }
        }
        .instrument(span)
        .await
    }

    async fn perform(&mut self) -> Result<O::Output, ApiError> {
        self.create_session().await?;
        self.create_token().await?;
        self.perform_operation().await
    }

    fn advance(&mut self, next: ConversationState) {
        debug_assert!(next > self.state, "conversation state must only move forward");
        debug!(state = ?next, "state transition");
        self.state = next;
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        debug!(method = %request.method(), url = %request.url(), "sending request");
        self.transport.send(request).await.map_err(ApiError::from)
    }

    async fn create_session(&mut self) -> Result<(), ApiError> {
        self.advance(ConversationState::CreatingSession);
        let request = self
            .settings
            .create_request(HttpMethod::Post, "/sessions", &[], HttpBody::null());

        let response = self.send(request).await.inspect_err(|e| {
            warn!(error = ?e, "failed to create session");
        })?;
        match response.status() {
            201 => {}
            404 => {
                log_failure("failed to create session", &response);
                return Err(ApiError::NotFound);
            }
            _ => {
                log_failure("failed to create session", &response);
                return Err(ApiError::from_response(&response));
            }
        }

        let session_id = string_member(&response, "sessionId")
            .ok_or_else(|| ApiError::malformed("session", "missing sessionId"))?;
        info!(session = %session_id, "session created");
        self.session_id = Some(session_id);
        Ok(())
    }

    async fn create_token(&mut self) -> Result<(), ApiError> {
        self.advance(ConversationState::CreatingToken);
        let path = format!("/sessions/{}/tokens", self.session_id.as_deref().unwrap_or_default());
        let body = HttpBody::from_json(&self.operation.token(&self.settings.api_version));
        let request = self.settings.create_request(HttpMethod::Post, &path, &[], body);

        let response = self.send(request).await.inspect_err(|e| {
            warn!(error = ?e, "failed to create token");
        })?;
        if response.status() != 201 {
            log_failure("failed to create token", &response);
            return Err(ApiError::from_response(&response));
        }

        let token_id =
            string_member(&response, "id").ok_or_else(|| ApiError::malformed("token", "missing id"))?;
        info!(token = %token_id, "token created");
        self.token_id = Some(token_id);
        Ok(())
    }

    async fn perform_operation(&mut self) -> Result<O::Output, ApiError> {
        self.advance(ConversationState::PerformingOperation);
        let op = self.operation.build_request(self.token_id.as_deref().unwrap_or_default());
        let request = self.settings.create_request(op.method, &op.path, &op.query, op.body);

        let response = self.send(request).await.inspect_err(|e| {
            warn!(error = ?e, "operation request failed");
        })?;
        let status = response.status();
        let body = response.body().clone();
        self.operation.parse_response(response).inspect_err(|e| {
            warn!(status, error = %e, "operation failed\n>>>\n{}\n<<<", body.text());
        })
    }
}

fn log_failure(message: &str, response: &HttpResponse) {
    warn!(
        status = response.status(),
        "{message}\n>>>\n{}\n<<<",
        response.body().text()
    );
}

fn string_member(response: &HttpResponse, name: &str) -> Option<String> {
    match response.body().to_json_object().remove(name) {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}
