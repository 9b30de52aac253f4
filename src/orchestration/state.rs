use crate::orchestration::envelope::ResultEnvelope;
use crate::orchestration::manifest::Manifest;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("workflow result was already written")]
    ResultAlreadySet,
    #[error("workflow manifest was already attached")]
    ManifestAlreadySet,
}

/// Data threaded through one pipeline run. Created per run and dropped with
/// it; never shared between runs.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowState {
    prompt: String,
    answers: Option<Map<String, Value>>,
    manifest: Option<Manifest>,
    result: Option<ResultEnvelope>,
}

impl WorkflowState {
    pub fn new(prompt: impl Into<String>, answers: Option<Map<String, Value>>) -> Self {
        Self {
            prompt: prompt.into(),
            answers,
            manifest: None,
            result: None,
        }
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn answers(&self) -> Option<&Map<String, Value>> {
        self.answers.as_ref()
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }

    pub fn result(&self) -> Option<&ResultEnvelope> {
        self.result.as_ref()
    }

    pub fn attach_manifest(&mut self, manifest: Manifest) -> Result<(), StateError> {
        if self.manifest.is_some() {
            return Err(StateError::ManifestAlreadySet);
        }
        self.manifest = Some(manifest);
        Ok(())
    }

    /// Writes the result once; later writes are rejected and leave the first
    /// result in place.
    pub fn set_result(&mut self, result: ResultEnvelope) -> Result<(), StateError> {
        if self.result.is_some() {
            return Err(StateError::ResultAlreadySet);
        }
        self.result = Some(result);
        Ok(())
    }

    pub fn into_result(self) -> Option<ResultEnvelope> {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_is_write_once() {
        let mut state = WorkflowState::new("hello", None);
        state
            .set_result(ResultEnvelope::text("first"))
            .expect("first write");
        assert_eq!(
            state.set_result(ResultEnvelope::error("second")),
            Err(StateError::ResultAlreadySet)
        );
        assert_eq!(state.into_result(), Some(ResultEnvelope::text("first")));
    }
}
