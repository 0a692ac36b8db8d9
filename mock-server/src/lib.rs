//! In-memory stand-in for a Mainzelliste server.
//!
//! Implements the slice of the REST API the client uses: sessions, tokens
//! (`readPatients`, `addPatient`, `editPatient`) and the patient endpoints
//! those tokens unlock. Tokens are single use. Every request must carry the
//! `mainzellisteApiKey` and `mainzellisteApiVersion` headers.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, post, put},
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info};
use uuid::Uuid;

pub const DEFAULT_API_KEY: &str = "mainzelliste";

#[derive(Clone, Debug)]
pub struct Patient {
    pub pid: String,
    pub fields: BTreeMap<String, String>,
    pub tentative: bool,
}

#[derive(Clone, Debug)]
enum Token {
    ReadPatients { search_ids: Vec<String>, result_fields: Vec<String> },
    AddPatient,
    EditPatient { pid: String },
}

#[derive(Default)]
struct Store {
    sessions: HashMap<String, Vec<String>>,
    tokens: HashMap<String, Token>,
    patients: Vec<Patient>,
}

/// Shared server state. Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct AppState {
    api_key: Arc<str>,
    store: Arc<RwLock<Store>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(DEFAULT_API_KEY)
    }
}

impl AppState {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: Arc::from(api_key),
            store: Arc::default(),
        }
    }

    pub async fn insert_patient(&self, pid: &str, fields: &[(&str, &str)]) {
        let fields = fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        self.store.write().await.patients.push(Patient {
            pid: pid.to_string(),
            fields,
            tentative: false,
        });
    }

    pub async fn patient(&self, pid: &str) -> Option<Patient> {
        self.store.read().await.patients.iter().find(|p| p.pid == pid).cloned()
    }

    pub async fn patient_count(&self) -> usize {
        self.store.read().await.patients.len()
    }

    pub async fn session_count(&self) -> usize {
        self.store.read().await.sessions.len()
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/{session_id}", delete(delete_session))
        .route("/sessions/{session_id}/tokens", post(create_token))
        .route("/patients", post(add_patient).get(read_patients))
        .route("/patients/tokenId/{token_id}", put(edit_patient))
        .route_layer(middleware::from_fn_with_state(state.clone(), check_api_headers))
        .with_state(state)
}

pub async fn run(listener: TcpListener, state: AppState) -> Result<(), std::io::Error> {
    axum::serve(listener, app(state)).await
}

async fn check_api_headers(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let headers = request.headers();
    let key = headers.get("mainzellisteApiKey").and_then(|v| v.to_str().ok());
    if key != Some(&*state.api_key) {
        return (StatusCode::UNAUTHORIZED, "Please supply your API key in HTTP header field 'mainzellisteApiKey'.")
            .into_response();
    }
    if !headers.contains_key("mainzellisteApiVersion") {
        return (StatusCode::BAD_REQUEST, "Missing header 'mainzellisteApiVersion'.").into_response();
    }
    next.run(request).await
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn new_pid() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_ascii_uppercase()
}

fn pid_json(pid: &str, tentative: bool) -> Value {
    json!({"idType": "pid", "idString": pid, "tentative": tentative})
}

async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let session_id = new_id();
    state.store.write().await.sessions.insert(session_id.clone(), Vec::new());
    info!(session = %session_id, "session created");
    (
        StatusCode::CREATED,
        Json(json!({"sessionId": session_id, "uri": format!("/sessions/{session_id}")})),
    )
}

async fn delete_session(State(state): State<AppState>, Path(session_id): Path<String>) -> StatusCode {
    let mut store = state.store.write().await;
    match store.sessions.remove(&session_id) {
        Some(tokens) => {
            for token in tokens {
                store.tokens.remove(&token);
            }
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}

#[derive(Deserialize)]
struct TokenRequest {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

fn parse_token(request: &TokenRequest) -> Result<Token, String> {
    match request.kind.as_str() {
        "readPatients" => {
            let search_ids = request.data["searchIds"]
                .as_array()
                .ok_or("readPatients token needs searchIds")?
                .iter()
                .filter(|id| id["idType"] == "pid")
                .filter_map(|id| id["idString"].as_str().map(str::to_string))
                .collect();
            Ok(Token::ReadPatients {
                search_ids,
                result_fields: string_list(&request.data["resultFields"]),
            })
        }
        "addPatient" => Ok(Token::AddPatient),
        "editPatient" => {
            let pid = request.data["patientId"]["idString"]
                .as_str()
                .ok_or("editPatient token needs patientId")?;
            Ok(Token::EditPatient { pid: pid.to_string() })
        }
        other => Err(format!("Unknown token type '{other}'.")),
    }
}

async fn create_token(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<TokenRequest>,
) -> Response {
    let token = match parse_token(&request) {
        Ok(token) => token,
        Err(message) => return (StatusCode::BAD_REQUEST, message).into_response(),
    };

    let mut store = state.store.write().await;
    let Some(tokens) = store.sessions.get_mut(&session_id) else {
        return (StatusCode::NOT_FOUND, format!("No session with id {session_id}.")).into_response();
    };
    let token_id = new_id();
    tokens.push(token_id.clone());
    store.tokens.insert(token_id.clone(), token);
    debug!(session = %session_id, token = %token_id, kind = %request.kind, "token created");

    (
        StatusCode::CREATED,
        Json(json!({"id": token_id, "type": request.kind, "data": request.data})),
    )
        .into_response()
}

#[derive(Deserialize)]
struct TokenQuery {
    #[serde(rename = "tokenId")]
    token_id: Option<String>,
}

fn invalid_token() -> Response {
    (StatusCode::UNAUTHORIZED, "Please supply a valid 'tokenId' for this operation.").into_response()
}

async fn read_patients(State(state): State<AppState>, Query(query): Query<TokenQuery>) -> Response {
    let mut store = state.store.write().await;
    let token = query.token_id.and_then(|id| store.tokens.remove(&id));
    let Some(Token::ReadPatients { search_ids, result_fields }) = token else {
        return invalid_token();
    };

    let mut result = Vec::new();
    for pid in &search_ids {
        let Some(patient) = store.patients.iter().find(|p| &p.pid == pid) else {
            continue;
        };
        let fields: serde_json::Map<String, Value> = result_fields
            .iter()
            .map(|name| {
                let value = patient.fields.get(name).cloned().unwrap_or_default();
                (name.clone(), Value::String(value))
            })
            .collect();
        result.push(json!({"ids": [pid_json(&patient.pid, patient.tentative)], "fields": fields}));
    }

    (StatusCode::OK, Json(Value::Array(result))).into_response()
}

async fn add_patient(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    Form(mut fields): Form<BTreeMap<String, String>>,
) -> Response {
    let mut store = state.store.write().await;
    let token = query.token_id.and_then(|id| store.tokens.remove(&id));
    let Some(Token::AddPatient) = token else {
        return invalid_token();
    };

    let sureness = fields.remove("sureness").is_some_and(|v| v == "true");
    if fields.is_empty() {
        return (StatusCode::BAD_REQUEST, "No patient fields supplied.").into_response();
    }

    let matching = |patient: &Patient| {
        fields
            .iter()
            .filter(|(name, value)| patient.fields.get(*name) == Some(*value))
            .count()
    };

    if let Some(existing) = store.patients.iter().find(|p| matching(p) == fields.len()) {
        return (StatusCode::CREATED, Json(json!([pid_json(&existing.pid, existing.tentative)]))).into_response();
    }

    let possible: Vec<Value> = store
        .patients
        .iter()
        .filter(|p| matching(p) > 0)
        .map(|p| json!({"idType": "pid", "idString": p.pid}))
        .collect();
    if !possible.is_empty() && !sureness {
        return (
            StatusCode::CONFLICT,
            Json(json!({
                "message": "Unsure case. Please confirm the patient data.",
                "possibleMatches": possible,
            })),
        )
            .into_response();
    }

    let patient = Patient {
        pid: new_pid(),
        fields,
        tentative: !possible.is_empty(),
    };
    let body = json!([pid_json(&patient.pid, patient.tentative)]);
    info!(pid = %patient.pid, tentative = patient.tentative, "patient created");
    store.patients.push(patient);
    (StatusCode::CREATED, Json(body)).into_response()
}

async fn edit_patient(
    State(state): State<AppState>,
    Path(token_id): Path<String>,
    Json(changes): Json<BTreeMap<String, String>>,
) -> Response {
    let mut store = state.store.write().await;
    let Some(Token::EditPatient { pid }) = store.tokens.remove(&token_id) else {
        return invalid_token();
    };
    let Some(patient) = store.patients.iter_mut().find(|p| p.pid == pid) else {
        return (StatusCode::NOT_FOUND, format!("No patient with pid {pid}.")).into_response();
    };
    patient.fields.extend(changes);
    StatusCode::NO_CONTENT.into_response()
}
