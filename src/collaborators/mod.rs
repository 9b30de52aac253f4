pub mod file_renderer;

use crate::orchestration::error::StepError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

pub use file_renderer::FileDocumentRenderer;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{reason}")]
pub struct CollaboratorError {
    pub reason: String,
}

impl CollaboratorError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub content: String,
    #[serde(default)]
    pub doc_id: String,
    /// Vector distance; lower is closer.
    #[serde(default)]
    pub distance: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalQuery<'a> {
    pub query: &'a str,
    pub k: usize,
    pub doc_id: Option<&'a str>,
}

pub trait Retriever: Send + Sync {
    fn retrieve(
        &self,
        query: &RetrievalQuery<'_>,
    ) -> Result<Vec<RetrievedChunk>, CollaboratorError>;
}

pub trait TextGenerator: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<String, CollaboratorError>;
}

pub trait DocumentRenderer: Send + Sync {
    /// Renders `template_id` with `fields` and returns a URL to the artifact.
    fn render(
        &self,
        template_id: &str,
        fields: &Map<String, Value>,
    ) -> Result<String, CollaboratorError>;
}

pub const RETRIEVER_SERVICE: &str = "retriever";
pub const GENERATOR_SERVICE: &str = "text generator";
pub const RENDERER_SERVICE: &str = "document renderer";

/// Collaborators handed to every step factory.
#[derive(Clone, Default)]
pub struct StepServices {
    retriever: Option<Arc<dyn Retriever>>,
    generator: Option<Arc<dyn TextGenerator>>,
    renderer: Option<Arc<dyn DocumentRenderer>>,
}

impl std::fmt::Debug for StepServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepServices")
            .field("retriever", &self.retriever.is_some())
            .field("generator", &self.generator.is_some())
            .field("renderer", &self.renderer.is_some())
            .finish()
    }
}

impl StepServices {
    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn DocumentRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn retriever(&self) -> Result<Arc<dyn Retriever>, StepError> {
        self.retriever
            .clone()
            .ok_or_else(|| StepError::upstream(RETRIEVER_SERVICE, "not configured"))
    }

    pub fn generator(&self) -> Result<Arc<dyn TextGenerator>, StepError> {
        self.generator
            .clone()
            .ok_or_else(|| StepError::upstream(GENERATOR_SERVICE, "not configured"))
    }

    pub fn renderer(&self) -> Result<Arc<dyn DocumentRenderer>, StepError> {
        self.renderer
            .clone()
            .ok_or_else(|| StepError::upstream(RENDERER_SERVICE, "not configured"))
    }
}
