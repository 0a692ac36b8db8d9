//! The operation-specific part of a conversation.
//!
//! # Design
//! A conversation always creates a session, then a token, then performs one
//! operation. Only the token payload, the operation request and the parsing
//! of its response differ between load, query and edit. `Operation` captures
//! those three pieces; each is a pure function, split into a build step that
//! produces the request and a parse step that consumes the response.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::ApiError;
use crate::http::{HttpBody, HttpMethod, HttpResponse};
use crate::tokens::{make_create_patient_token, make_edit_patient_token, make_read_patient_token};
use crate::types::{ApiVersion, PatientData, PatientRecord, QueryResult, ID_TYPE};

/// Request for the operation step, relative to the client's base URL.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub method: HttpMethod,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: HttpBody,
}

/// One kind of patient operation run inside a conversation.
pub trait Operation: Send + Sync + 'static {
    type Output: Send + 'static;

    /// Short name used in logs.
    const NAME: &'static str;

    fn token(&self, api_version: &ApiVersion) -> Value;

    fn build_request(&self, token_id: &str) -> OperationRequest;

    fn parse_response(&self, response: HttpResponse) -> Result<Self::Output, ApiError>;
}

#[derive(Debug, Deserialize)]
struct PatientId {
    #[serde(rename = "idType")]
    id_type: String,
    #[serde(rename = "idString")]
    id_string: String,
    #[serde(default)]
    tentative: bool,
}

#[derive(Debug, Deserialize)]
struct PatientEntry {
    #[serde(default)]
    ids: Vec<PatientId>,
    #[serde(default)]
    fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct PossibleMatches {
    #[serde(rename = "possibleMatches", default)]
    possible_matches: Vec<PatientId>,
}

fn find_pid(ids: &[PatientId]) -> Option<&PatientId> {
    ids.iter().find(|id| id.id_type == ID_TYPE)
}

fn field_value(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn check_status(response: &HttpResponse, expected: u16) -> Result<(), ApiError> {
    if response.status() == expected {
        Ok(())
    } else {
        Err(ApiError::from_response(response))
    }
}

fn decode<T: for<'de> Deserialize<'de>>(step: &'static str, response: &HttpResponse) -> Result<T, ApiError> {
    serde_json::from_slice(response.body().data()).map_err(|e| ApiError::malformed(step, e.to_string()))
}

fn token_query(token_id: &str) -> Vec<(String, String)> {
    vec![("tokenId".to_string(), token_id.to_string())]
}

/// Read `fields` of the patients identified by `pids`.
#[derive(Debug, Clone)]
pub struct LoadPatientData {
    pids: Vec<String>,
    fields: Vec<String>,
}

impl LoadPatientData {
    pub fn new(pids: Vec<String>, fields: Vec<String>) -> Self {
        Self { pids, fields }
    }
}

impl Operation for LoadPatientData {
    type Output = PatientData;
    const NAME: &'static str = "load";

    fn token(&self, api_version: &ApiVersion) -> Value {
        make_read_patient_token(api_version, &self.pids, &self.fields)
    }

    fn build_request(&self, token_id: &str) -> OperationRequest {
        OperationRequest {
            method: HttpMethod::Get,
            path: "/patients".to_string(),
            query: token_query(token_id),
            body: HttpBody::null(),
        }
    }

    fn parse_response(&self, response: HttpResponse) -> Result<PatientData, ApiError> {
        check_status(&response, 200)?;
        let entries: Vec<PatientEntry> = decode("patient data", &response)?;

        let data = entries
            .into_iter()
            .map(|entry| {
                let pid = find_pid(&entry.ids).map(|id| id.id_string.clone()).unwrap_or_default();
                let mut record: PatientRecord = entry
                    .fields
                    .into_iter()
                    .map(|(name, value)| (name, field_value(value)))
                    .collect();
                record.insert(ID_TYPE.to_string(), pid);
                record
            })
            .collect();
        Ok(data)
    }
}

/// Look up a patient by its identifying fields, adding it if it is new.
#[derive(Debug, Clone)]
pub struct QueryPatient {
    data: PatientRecord,
    sureness: bool,
}

impl QueryPatient {
    /// With `sureness` set the service skips its possible-match check.
    pub fn new(data: PatientRecord, sureness: bool) -> Self {
        Self { data, sureness }
    }
}

impl Operation for QueryPatient {
    type Output = QueryResult;
    const NAME: &'static str = "query";

    fn token(&self, api_version: &ApiVersion) -> Value {
        make_create_patient_token(api_version)
    }

    fn build_request(&self, token_id: &str) -> OperationRequest {
        let sureness = self.sureness.then_some(("sureness", "true"));
        let pairs = self
            .data
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .filter(|(k, _)| *k != "sureness")
            .chain(sureness);

        OperationRequest {
            method: HttpMethod::Post,
            path: "/patients".to_string(),
            query: token_query(token_id),
            body: HttpBody::url_encoded_from_map(pairs),
        }
    }

    fn parse_response(&self, response: HttpResponse) -> Result<QueryResult, ApiError> {
        match response.status() {
            201 => {
                let ids: Vec<PatientId> = decode("patient query", &response)?;
                let id = find_pid(&ids).ok_or_else(|| ApiError::malformed("patient query", "no pid in response"))?;
                Ok(QueryResult::Match {
                    pid: id.id_string.clone(),
                    tentative: id.tentative,
                })
            }
            409 => {
                let body: PossibleMatches = decode("possible matches", &response)?;
                let mut pids = Vec::with_capacity(body.possible_matches.len());
                for candidate in body.possible_matches {
                    if candidate.id_type == ID_TYPE {
                        pids.push(candidate.id_string);
                    } else {
                        warn!(id_type = %candidate.id_type, "skipping possible match with unexpected id type");
                    }
                }
                if pids.is_empty() {
                    return Err(ApiError::malformed("possible matches", "no pid candidates in response"));
                }
                Ok(QueryResult::PossibleMatches {
                    possible_match_pids: pids,
                })
            }
            _ => Err(ApiError::from_response(&response)),
        }
    }
}

/// Overwrite fields of the patient identified by `pid`.
#[derive(Debug, Clone)]
pub struct EditPatient {
    pid: String,
    data: PatientRecord,
}

impl EditPatient {
    pub fn new(pid: String, data: PatientRecord) -> Self {
        Self { pid, data }
    }
}

impl Operation for EditPatient {
    type Output = ();
    const NAME: &'static str = "edit";

    fn token(&self, api_version: &ApiVersion) -> Value {
        make_edit_patient_token(api_version, &self.pid)
    }

    fn build_request(&self, token_id: &str) -> OperationRequest {
        OperationRequest {
            method: HttpMethod::Put,
            path: format!("/patients/tokenId/{token_id}"),
            query: Vec::new(),
            body: HttpBody::json_object_from_map(&self.data),
        }
    }

    fn parse_response(&self, response: HttpResponse) -> Result<(), ApiError> {
        check_status(&response, 204)
    }
}
