//! Domain types for patient identity records.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The reserved `idType` under which the service reports patient identifiers,
/// and the key that holds the identifier in every `PatientRecord`.
pub const ID_TYPE: &str = "pid";

/// Field name to value for one patient. Always contains `ID_TYPE` when it
/// comes back from a load.
pub type PatientRecord = BTreeMap<String, String>;

/// Patient records in the order the service returned them.
pub type PatientData = Vec<PatientRecord>;

/// Outcome of a patient query.
///
/// A query either resolves to one identifier or reports several candidates
/// the service could not decide between; never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum QueryResult {
    Match { pid: String, tentative: bool },
    #[serde(rename_all = "camelCase")]
    PossibleMatches { possible_match_pids: Vec<String> },
}

impl QueryResult {
    pub fn pid(&self) -> Option<&str> {
        match self {
            QueryResult::Match { pid, .. } => Some(pid),
            QueryResult::PossibleMatches { .. } => None,
        }
    }

    pub fn is_tentative(&self) -> bool {
        matches!(self, QueryResult::Match { tentative: true, .. })
    }

    pub fn possible_match_pids(&self) -> &[String] {
        match self {
            QueryResult::Match { .. } => &[],
            QueryResult::PossibleMatches { possible_match_pids } => possible_match_pids,
        }
    }
}

/// Dotted numeric API version as sent in the `mainzellisteApiVersion` header.
///
/// The header carries the version exactly as it was written; the numeric
/// segments are kept for comparisons.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ApiVersion {
    segments: Vec<u32>,
    text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid API version '{0}': expected dotted numbers such as 3.0")]
pub struct ApiVersionError(String);

impl ApiVersion {
    pub fn new(major: u32, minor: u32) -> Self {
        Self {
            segments: vec![major, minor],
            text: format!("{major}.{minor}"),
        }
    }

    pub fn segments(&self) -> &[u32] {
        &self.segments
    }
}

impl FromStr for ApiVersion {
    type Err = ApiVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ApiVersionError(s.to_string()));
        }
        let segments = trimmed
            .split('.')
            .map(|part| part.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ApiVersionError(s.to_string()))?;
        Ok(Self {
            segments,
            text: trimmed.to_string(),
        })
    }
}

impl TryFrom<String> for ApiVersion {
    type Error = ApiVersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ApiVersion> for String {
    fn from(version: ApiVersion) -> Self {
        version.to_string()
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
