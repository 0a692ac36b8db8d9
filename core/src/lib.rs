//! Asynchronous client for the Mainzelliste pseudonymization service.
//!
//! # Overview
//! Every call against the service is a short conversation: create a
//! session, mint a single-purpose token inside it, perform the one operation
//! the token allows, then delete the session. `MlClient` runs these
//! conversations for three operations (load, query and edit patient data)
//! and reports one terminal result per call.
//!
//! # Design
//! - `http` holds plain-data request/response types; `transport` is the only
//!   place that touches the network, behind the `HttpTransport` trait.
//! - `tokens` and `operation` are pure: they build payloads and parse
//!   responses, so they are tested without a server.
//! - `conversation` sequences the steps and classifies failures into
//!   `ApiError`.
//! - Session deletion is best effort and never delays the caller.

pub mod client;
pub mod config;
mod conversation;
pub mod error;
pub mod http;
pub mod operation;
pub mod tokens;
pub mod transport;
pub mod types;

pub use client::{ClientEvent, MlClient};
pub use config::{ConfigError, EndpointConfig};
pub use conversation::ConversationId;
pub use error::ApiError;
pub use http::{HttpBody, HttpMethod, HttpRequest, HttpResponse};
pub use transport::{HttpTransport, ReqwestTransport, TransportConfig, TransportError};
pub use types::{ApiVersion, PatientData, PatientRecord, QueryResult, ID_TYPE};
