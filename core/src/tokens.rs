//! Token request payloads.
//!
//! Every operation on patient data is authorized by a single-purpose token
//! minted inside a session. These builders produce the `{type, data}` JSON
//! object posted to `/sessions/{sessionId}/tokens`.
//!
//! The API version is taken so that version-specific token shapes can be
//! introduced without changing callers. All versions currently share one
//! shape.

use serde_json::{json, Value};

use crate::types::{ApiVersion, ID_TYPE};

fn patient_id(pid: &str) -> Value {
    json!({ "idType": ID_TYPE, "idString": pid })
}

/// Token allowing to read `fields` of the patients identified by `pids`.
pub fn make_read_patient_token(_api_version: &ApiVersion, pids: &[String], fields: &[String]) -> Value {
    let search_ids: Vec<Value> = pids.iter().map(|pid| patient_id(pid)).collect();
    json!({
        "type": "readPatients",
        "data": {
            "searchIds": search_ids,
            "resultIds": [ID_TYPE],
            "resultFields": fields,
        }
    })
}

/// Token allowing to add (or look up) one patient.
pub fn make_create_patient_token(_api_version: &ApiVersion) -> Value {
    json!({
        "type": "addPatient",
        "data": {
            "idTypes": [ID_TYPE],
        }
    })
}

/// Token allowing to edit the fields of the patient identified by `pid`.
pub fn make_edit_patient_token(_api_version: &ApiVersion, pid: &str) -> Value {
    json!({
        "type": "editPatient",
        "data": {
            "patientId": patient_id(pid),
        }
    })
}
