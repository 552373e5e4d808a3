//! Update-kind selection.
//!
//! A mutation produces exactly one activity event. When a changed field has a
//! dedicated kind (status → `status_changed`) that kind wins, carrying the
//! field's before/after values; the generic `updated` kind is never emitted
//! alongside it.

use serde_json::{Map, Value as JsonValue, json};

use crate::ActivityKind;

/// Fields that have their own activity kind, in priority order.
const DEDICATED_KINDS: &[(&str, ActivityKind)] = &[("status", ActivityKind::StatusChanged)];

/// One changed field of an updated record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub field: String,
    pub from: JsonValue,
    pub to: JsonValue,
}

impl FieldChange {
    pub fn new(field: impl Into<String>, from: impl Into<JsonValue>, to: impl Into<JsonValue>) -> Self {
        Self {
            field: field.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }
}

/// Kind, description and metadata for an update event.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateActivity {
    pub kind: ActivityKind,
    pub description: String,
    pub metadata: JsonValue,
}

/// Pick the single event describing an update of `subject`.
///
/// Returns `None` when nothing actually changed.
pub fn classify_update(subject: &str, changes: &[FieldChange]) -> Option<UpdateActivity> {
    let changed: Vec<&FieldChange> = changes.iter().filter(|c| !c.is_noop()).collect();
    if changed.is_empty() {
        return None;
    }

    let changed_fields: Vec<&str> = changed.iter().map(|c| c.field.as_str()).collect();

    let dedicated = DEDICATED_KINDS.iter().find_map(|(field, kind)| {
        changed
            .iter()
            .find(|c| c.field == *field)
            .map(|change| (*kind, *change))
    });

    if let Some((kind, change)) = dedicated {
        return Some(UpdateActivity {
            kind,
            description: format!(
                "{subject} {} changed from {} to {}",
                change.field,
                display(&change.from),
                display(&change.to)
            ),
            metadata: json!({
                "field": change.field,
                "from": change.from,
                "to": change.to,
                "changed_fields": changed_fields,
            }),
        });
    }

    let mut detail = Map::new();
    for c in &changed {
        detail.insert(c.field.clone(), json!({ "from": c.from, "to": c.to }));
    }

    Some(UpdateActivity {
        kind: ActivityKind::Updated,
        description: format!("{subject} updated ({})", changed_fields.join(", ")),
        metadata: json!({
            "changed_fields": changed_fields,
            "changes": detail,
        }),
    })
}

fn display(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => "none".to_string(),
        other => other.to_string(),
    }
}
