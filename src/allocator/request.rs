//! Parsing and validation of the desired-count map.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::AllocationError;

/// Body of `POST /assignTasks`.
#[derive(Debug, Clone, Deserialize)]
pub struct AssignTasksBody {
    /// `{ <language>: { <email>: <count>, ... } }`
    pub data: Map<String, Value>,
    #[serde(default)]
    pub role: Option<String>,
}

/// A validated single-language allocation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentRequest {
    pub project_id: i64,
    /// A language name or the "all" sentinel.
    pub language: String,
    /// Desired counts in processing order.
    pub per_user_counts: Vec<(String, u32)>,
}

impl AssignmentRequest {
    pub fn new(
        project_id: i64,
        language: impl Into<String>,
        per_user_counts: Vec<(String, u32)>,
    ) -> Self {
        Self {
            project_id,
            language: language.into(),
            per_user_counts,
        }
    }

    /// Validate a `{language: {email: count}}` map.
    ///
    /// Exactly one language key is accepted; extra keys are rejected rather
    /// than ignored.
    pub fn from_data(project_id: i64, data: &Map<String, Value>) -> Result<Self, AllocationError> {
        let mut languages = data.iter();
        let (language, users) = match (languages.next(), languages.next()) {
            (Some(entry), None) => entry,
            (None, _) => {
                return Err(AllocationError::InvalidRequest(
                    "request names no language".into(),
                ));
            }
            (Some(_), Some(_)) => {
                let keys: Vec<&str> = data.keys().map(String::as_str).collect();
                return Err(AllocationError::InvalidRequest(format!(
                    "exactly one language per request, got {}: {}",
                    keys.len(),
                    keys.join(", ")
                )));
            }
        };

        if language.trim().is_empty() {
            return Err(AllocationError::InvalidRequest("language is empty".into()));
        }

        let users = users.as_object().ok_or_else(|| {
            AllocationError::InvalidRequest(format!(
                "counts for {language} must be an object of email to count"
            ))
        })?;
        if users.is_empty() {
            return Err(AllocationError::InvalidRequest(format!(
                "no users listed for {language}"
            )));
        }

        let per_user_counts = users
            .iter()
            .map(|(email, raw)| {
                let email = email.trim();
                if email.is_empty() {
                    return Err(AllocationError::InvalidRequest("empty user email".into()));
                }
                Ok((email.to_string(), parse_count(email, raw)?))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(project_id, language.clone(), per_user_counts))
    }

    /// Sum of all desired counts.
    pub fn total_requested(&self) -> u64 {
        self.per_user_counts
            .iter()
            .map(|(_, c)| u64::from(*c))
            .sum()
    }
}

/// Accept a non-negative integer, or a string holding one.
fn parse_count(email: &str, raw: &Value) -> Result<u32, AllocationError> {
    let parsed = match raw {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| {
            AllocationError::InvalidRequest(format!(
                "count for {email} must be a non-negative integer, got {raw}"
            ))
        })
}
