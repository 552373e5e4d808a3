use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use keel_infra::{Audit, ProjectPatch, ProjectStatus};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Group that receives the initial `owner` grant.
    pub owner_group: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
}

impl UpdateProjectRequest {
    pub fn into_patch(self) -> Result<ProjectPatch, axum::response::Response> {
        let status = match self.status.as_deref() {
            Some(raw) => Some(errors::parse::<ProjectStatus>(raw)?),
            None => None,
        };

        Ok(ProjectPatch {
            name: self.name,
            description: self.description,
            status,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct AddGroupRequest {
    pub group_id: String,
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct AccessQuery {
    pub permission: String,
}

// -------------------------
// Response helpers
// -------------------------

/// `{"<key>": value, "activity": {...}}` for a committed mutation.
pub fn mutation_json<T: Serialize>(key: &str, value: &T, audit: &Audit) -> JsonValue {
    let mut body = serde_json::Map::new();
    body.insert(key.to_string(), json!(value));
    body.insert("activity".to_string(), audit_json(audit));
    JsonValue::Object(body)
}

pub fn audit_json(audit: &Audit) -> JsonValue {
    match audit {
        Audit::Recorded(event) => json!({ "status": "recorded", "event": event }),
        Audit::Skipped => json!({ "status": "skipped" }),
        Audit::Failed(error) => json!({ "status": "failed", "error": error }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_status_is_a_client_error() {
        let req = UpdateProjectRequest {
            name: None,
            description: None,
            status: Some("paused".into()),
        };
        let resp = req.into_patch().unwrap_err();
        assert_eq!(resp.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn audit_outcomes_are_labelled() {
        assert_eq!(audit_json(&Audit::Skipped)["status"], "skipped");
        assert_eq!(audit_json(&Audit::Failed("down".into()))["error"], "down");
    }
}
