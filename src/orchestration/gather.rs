use crate::orchestration::manifest::{FieldSpec, Manifest};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum GatherOutcome {
    Continue,
    /// Fields still to collect, in manifest order.
    NeedsInput(Vec<FieldSpec>),
}

/// Null, blank strings, and empty arrays or objects count as not answered.
pub fn is_answered(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(text)) => !text.trim().is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
        Some(Value::Bool(_)) | Some(Value::Number(_)) => true,
    }
}

pub fn gather(manifest: &Manifest, answers: &Map<String, Value>) -> GatherOutcome {
    let missing = manifest
        .required_fields
        .iter()
        .filter(|field| !is_answered(answers.get(&field.name)))
        .cloned()
        .collect::<Vec<_>>();
    if missing.is_empty() {
        GatherOutcome::Continue
    } else {
        GatherOutcome::NeedsInput(missing)
    }
}
