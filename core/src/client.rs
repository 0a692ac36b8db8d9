//! Client facade for the Mainzelliste REST API.
//!
//! # Design
//! `MlClient` holds the endpoint settings (base URL, API version, API key)
//! and a transport. Each public operation creates a fresh `Conversation`
//! with a snapshot of those settings, so conversations share no mutable
//! state and any number of them may be in flight at once.
//!
//! Operations come in two flavors:
//! - `load_patient_data` and friends await the conversation and return its
//!   result;
//! - `spawn_load_patient_data` and friends start the conversation on the
//!   runtime and publish exactly one `ClientEvent` when it finishes. Every
//!   subscriber has its own unbounded queue, so events are never dropped
//!   however far a subscriber falls behind.
//!
//! In both cases the caller sees the result before the best-effort session
//! deletion is issued. Those deletions run detached; `wait_idle` lets a
//! shutdown sequence wait for them, and dropping the client without waiting
//! is fine.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::debug;
use url::Url;

use crate::config::{ConfigError, EndpointConfig};
use crate::conversation::{Conversation, ConversationId, SessionCleanup};
use crate::error::ApiError;
use crate::http::{HttpBody, HttpMethod, HttpRequest};
use crate::operation::{EditPatient, LoadPatientData, Operation, QueryPatient};
use crate::transport::{HttpTransport, ReqwestTransport};
use crate::types::{ApiVersion, PatientData, PatientRecord, QueryResult};

pub const API_KEY_HEADER: &str = "mainzellisteApiKey";
pub const API_VERSION_HEADER: &str = "mainzellisteApiVersion";

/// Completion of a conversation started with one of the `spawn_*` methods.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    PatientDataLoaded {
        conversation: ConversationId,
        result: Result<PatientData, ApiError>,
    },
    PatientDataQueried {
        conversation: ConversationId,
        result: Result<QueryResult, ApiError>,
    },
    PatientDataEdited {
        conversation: ConversationId,
        result: Result<(), ApiError>,
    },
}

impl ClientEvent {
    pub fn conversation(&self) -> ConversationId {
        match self {
            ClientEvent::PatientDataLoaded { conversation, .. }
            | ClientEvent::PatientDataQueried { conversation, .. }
            | ClientEvent::PatientDataEdited { conversation, .. } => *conversation,
        }
    }

    pub fn error(&self) -> Option<&ApiError> {
        match self {
            ClientEvent::PatientDataLoaded { result, .. } => result.as_ref().err(),
            ClientEvent::PatientDataQueried { result, .. } => result.as_ref().err(),
            ClientEvent::PatientDataEdited { result, .. } => result.as_ref().err(),
        }
    }
}

/// Read-only settings shared by the conversations of one client.
#[derive(Debug, Clone)]
pub(crate) struct ClientSettings {
    pub(crate) base_url: String,
    base: Url,
    pub(crate) api_version: ApiVersion,
    api_key: String,
    pub(crate) cleanup_abandoned_sessions: bool,
}

impl ClientSettings {
    pub(crate) fn new(base_url: &str, api_version: ApiVersion, api_key: String) -> Result<Self, url::ParseError> {
        let base_url = normalize_base_url(base_url);
        let base = Url::parse(&base_url)?;
        Ok(Self {
            base_url,
            base,
            api_version,
            api_key,
            cleanup_abandoned_sessions: false,
        })
    }

    /// `base URL + path`, the base URL's own query followed by `query`, and
    /// both authentication headers.
    pub(crate) fn create_request(
        &self,
        method: HttpMethod,
        path: &str,
        query: &[(String, String)],
        body: HttpBody,
    ) -> HttpRequest {
        let mut url = self.base.clone();
        let full_path = format!("{}{}", url.path().trim_end_matches('/'), path);
        url.set_path(&full_path);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }

        HttpRequest::new(method, url)
            .with_header(API_KEY_HEADER, self.api_key.as_str())
            .with_header(API_VERSION_HEADER, self.api_version.to_string())
            .with_body(body)
    }
}

/// Strips every trailing slash.
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

/// Fan-out of `ClientEvent`s to every live subscriber.
#[derive(Clone, Default)]
struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<ClientEvent>>>>,
}

impl EventBus {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ClientEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Subscribers whose receiver is gone are dropped.
    fn publish(&self, event: ClientEvent) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Asynchronous client for one Mainzelliste endpoint.
pub struct MlClient {
    settings: Arc<ClientSettings>,
    transport: Arc<dyn HttpTransport>,
    events: EventBus,
    tasks: TaskTracker,
}

impl MlClient {
    pub fn new(
        base_url: &str,
        api_version: ApiVersion,
        api_key: impl Into<String>,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, url::ParseError> {
        let settings = ClientSettings::new(base_url, api_version, api_key.into())?;
        Ok(Self {
            settings: Arc::new(settings),
            transport,
            events: EventBus::default(),
            tasks: TaskTracker::new(),
        })
    }

    /// Client for `config`, talking through a `ReqwestTransport`.
    pub fn from_config(config: &EndpointConfig, api_key: impl Into<String>) -> Result<Self, ConfigError> {
        let transport = ReqwestTransport::new(&config.transport_config())?;
        let client = Self::new(&config.base_url, config.api_version.clone(), api_key, Arc::new(transport))?
            .with_session_cleanup_on_failure(config.cleanup_abandoned_sessions);
        Ok(client)
    }

    /// Also delete the session when a conversation fails after creating it.
    pub fn with_session_cleanup_on_failure(mut self, enabled: bool) -> Self {
        Arc::make_mut(&mut self.settings).cleanup_abandoned_sessions = enabled;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.settings.base_url
    }

    /// Conversations already running keep the URL they started with.
    pub fn set_base_url(&mut self, base_url: &str) -> Result<(), url::ParseError> {
        let base_url = normalize_base_url(base_url);
        let base = Url::parse(&base_url)?;
        let mut settings = ClientSettings::clone(&self.settings);
        settings.base_url = base_url;
        settings.base = base;
        self.settings = Arc::new(settings);
        Ok(())
    }

    pub fn api_version(&self) -> &ApiVersion {
        &self.settings.api_version
    }

    pub fn create_request(
        &self,
        method: HttpMethod,
        path: &str,
        query: &[(String, String)],
        body: HttpBody,
    ) -> HttpRequest {
        self.settings.create_request(method, path, query, body)
    }

    /// Receiver for the events of conversations started after this call.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ClientEvent> {
        self.events.subscribe()
    }

    pub async fn load_patient_data(&self, pids: Vec<String>, fields: Vec<String>) -> Result<PatientData, ApiError> {
        self.execute(LoadPatientData::new(pids, fields)).await
    }

    pub async fn query_patient_data(&self, data: PatientRecord, sureness: bool) -> Result<QueryResult, ApiError> {
        self.execute(QueryPatient::new(data, sureness)).await
    }

    pub async fn edit_patient_data(&self, pid: String, data: PatientRecord) -> Result<(), ApiError> {
        self.execute(EditPatient::new(pid, data)).await
    }

    /// Starts a load and returns the id its `ClientEvent` will carry.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub fn spawn_load_patient_data(&self, pids: Vec<String>, fields: Vec<String>) -> ConversationId {
        self.spawn(LoadPatientData::new(pids, fields), |conversation, result| {
            ClientEvent::PatientDataLoaded { conversation, result }
        })
    }

    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub fn spawn_query_patient_data(&self, data: PatientRecord, sureness: bool) -> ConversationId {
        self.spawn(QueryPatient::new(data, sureness), |conversation, result| {
            ClientEvent::PatientDataQueried { conversation, result }
        })
    }

    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub fn spawn_edit_patient_data(&self, pid: String, data: PatientRecord) -> ConversationId {
        self.spawn(EditPatient::new(pid, data), |conversation, result| {
            ClientEvent::PatientDataEdited { conversation, result }
        })
    }

    /// Waits until every spawned conversation and session cleanup is done.
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    fn conversation<O: Operation>(&self, operation: O) -> Conversation<O> {
        Conversation::new(Arc::clone(&self.settings), Arc::clone(&self.transport), operation)
    }

    async fn execute<O: Operation>(&self, operation: O) -> Result<O::Output, ApiError> {
        let outcome = self.conversation(operation).run().await;
        if let Some(cleanup) = outcome.cleanup {
            self.detach(cleanup);
        }
        outcome.result
    }

    fn detach(&self, cleanup: SessionCleanup) {
        debug!(session = %cleanup.session_id(), "scheduling session cleanup");
        self.tasks.spawn(async move {
            cleanup.run().await;
        });
    }

    fn spawn<O, F>(&self, operation: O, into_event: F) -> ConversationId
    where
        O: Operation,
        F: FnOnce(ConversationId, Result<O::Output, ApiError>) -> ClientEvent + Send + 'static,
    {
        let conversation = self.conversation(operation);
        let id = conversation.id();
        let events = self.events.clone();
        self.tasks.spawn(async move {
            let outcome = conversation.run().await;
            events.publish(into_event(id, outcome.result));
            if let Some(cleanup) = outcome.cleanup {
                cleanup.run().await;
            }
        });
        id
    }
}
