use crate::orchestration::builtin_steps::{DOCX_RENDER, ECHO, GENERATE, RETRIEVE};
use crate::orchestration::error::ExecutionError;
use crate::orchestration::executor::build_step;
use crate::orchestration::step_registry::{StepParams, StepRegistry};
use crate::shared::ids::ChainId;
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub const POLICY_QNA_CHAIN: &str = "policy_qna_chain";
pub const DOC_DRAFT_CHAIN: &str = "doc_draft_chain";
pub const ECHO_CHAIN: &str = "echo_chain";
pub const NO_MATCH_CHAIN: &str = "no_match_chain";

pub const BUILTIN_CHAIN_IDS: [&str; 4] =
    [POLICY_QNA_CHAIN, DOC_DRAFT_CHAIN, ECHO_CHAIN, NO_MATCH_CHAIN];

pub const HANDBOOK_DOC_ID: &str = "handbook_2024";
pub const DEFAULT_DRAFT_TEMPLATE: &str = "tpl_sow_v1";
pub const HANDBOOK_MISS_ANSWER: &str = "I couldn't find that in the handbook.";
pub const NO_MATCH_MESSAGE: &str = "I couldn't match your request to a known task. \
Try rephrasing it, for example by naming the document you need drafted or the policy you are asking about.";

const HANDBOOK_PROMPT: &str = "You are an HR assistant. Answer the question using only the \
handbook excerpts below. If the excerpts do not contain the answer, say so.\n\n\
Excerpts:\n{CONTEXT}\n\nQuestion: {QUESTION}\nAnswer:";

pub trait NativeProcessor: Send + Sync {
    /// Runs against the chain context `{prompt, task_id, inputs, metadata}`.
    fn process(&self, context: &Value) -> Result<Value, ExecutionError>;
}

fn params(value: Value) -> StepParams {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn run_step(
    steps: &StepRegistry,
    step_id: &str,
    step_type: &str,
    step_params: &StepParams,
    context: &Value,
    state: &Value,
) -> Result<Value, ExecutionError> {
    build_step(steps, step_id, step_type, step_params)?
        .call(context, state)
        .map_err(|source| ExecutionError::StepExecution {
            step_id: step_id.to_string(),
            source,
        })
}

/// Retrieval over the employee handbook followed by a grounded answer.
struct PolicyQna {
    steps: Arc<StepRegistry>,
}

impl NativeProcessor for PolicyQna {
    fn process(&self, context: &Value) -> Result<Value, ExecutionError> {
        let retrieved = run_step(
            &self.steps,
            RETRIEVE,
            RETRIEVE,
            &params(json!({"k": 6, "doc_id": HANDBOOK_DOC_ID, "max_distance": 0.30})),
            context,
            context,
        )?;
        let mut state = context.as_object().cloned().unwrap_or_default();
        state.insert(RETRIEVE.to_string(), retrieved);
        run_step(
            &self.steps,
            GENERATE,
            GENERATE,
            &params(json!({
                "prompt": HANDBOOK_PROMPT,
                "context_from": RETRIEVE,
                "empty_answer": HANDBOOK_MISS_ANSWER,
            })),
            context,
            &Value::Object(state),
        )
    }
}

/// Renders the task's template with the gathered answers.
struct DocDraft {
    steps: Arc<StepRegistry>,
}

impl NativeProcessor for DocDraft {
    fn process(&self, context: &Value) -> Result<Value, ExecutionError> {
        let template_id = context
            .get("metadata")
            .and_then(|metadata| metadata.get("template_id"))
            .and_then(Value::as_str)
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(DEFAULT_DRAFT_TEMPLATE);
        run_step(
            &self.steps,
            "render",
            DOCX_RENDER,
            &params(json!({"template_id": template_id})),
            context,
            context,
        )
    }
}

struct EchoInputs {
    steps: Arc<StepRegistry>,
}

impl NativeProcessor for EchoInputs {
    fn process(&self, context: &Value) -> Result<Value, ExecutionError> {
        run_step(&self.steps, ECHO, ECHO, &Map::new(), context, context)
    }
}

struct NoMatch;

impl NativeProcessor for NoMatch {
    fn process(&self, _context: &Value) -> Result<Value, ExecutionError> {
        Ok(json!({"type": "text", "content": NO_MATCH_MESSAGE}))
    }
}

/// The fixed built-ins, in registration order.
pub fn builtin_processors(steps: &Arc<StepRegistry>) -> Vec<(ChainId, Arc<dyn NativeProcessor>)> {
    let processors: [(&str, Arc<dyn NativeProcessor>); 4] = [
        (
            POLICY_QNA_CHAIN,
            Arc::new(PolicyQna {
                steps: steps.clone(),
            }),
        ),
        (
            DOC_DRAFT_CHAIN,
            Arc::new(DocDraft {
                steps: steps.clone(),
            }),
        ),
        (
            ECHO_CHAIN,
            Arc::new(EchoInputs {
                steps: steps.clone(),
            }),
        ),
        (NO_MATCH_CHAIN, Arc::new(NoMatch)),
    ];
    processors
        .into_iter()
        .filter_map(|(id, processor)| match ChainId::parse(id) {
            Ok(chain_id) => Some((chain_id, processor)),
            Err(err) => {
                tracing::error!(chain_id = id, error = %err, "invalid built-in chain id");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        CollaboratorError, DocumentRenderer, RetrievalQuery, RetrievedChunk, Retriever,
        StepServices,
    };
    use crate::orchestration::error::StepError;
    use std::sync::Mutex;

    struct EmptyRetriever;

    impl Retriever for EmptyRetriever {
        fn retrieve(
            &self,
            query: &RetrievalQuery<'_>,
        ) -> Result<Vec<RetrievedChunk>, CollaboratorError> {
            assert_eq!(query.doc_id, Some(HANDBOOK_DOC_ID));
            assert_eq!(query.k, 6);
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct RecordingRenderer {
        calls: Mutex<Vec<(String, Map<String, Value>)>>,
    }

    impl DocumentRenderer for RecordingRenderer {
        fn render(
            &self,
            template_id: &str,
            fields: &Map<String, Value>,
        ) -> Result<String, CollaboratorError> {
            self.calls
                .lock()
                .expect("lock")
                .push((template_id.to_string(), fields.clone()));
            Ok(format!("https://files.example.test/{template_id}.docx"))
        }
    }

    fn processor(
        services: StepServices,
        chain_id: &str,
    ) -> Arc<dyn NativeProcessor> {
        let steps = Arc::new(StepRegistry::with_builtin_steps(services));
        builtin_processors(&steps)
            .into_iter()
            .find(|(id, _)| id.as_str() == chain_id)
            .map(|(_, processor)| processor)
            .expect("built-in present")
    }

    #[test]
    fn all_builtin_ids_are_registered() {
        let steps = Arc::new(StepRegistry::with_builtin_steps(StepServices::default()));
        let ids = builtin_processors(&steps)
            .into_iter()
            .map(|(id, _)| id.to_string())
            .collect::<Vec<_>>();
        assert_eq!(ids, BUILTIN_CHAIN_IDS);
    }

    #[test]
    fn policy_qna_answers_without_generator_when_handbook_has_nothing() {
        let services = StepServices::default().with_retriever(Arc::new(EmptyRetriever));
        let out = processor(services, POLICY_QNA_CHAIN)
            .process(&json!({"prompt": "is there a pet policy", "inputs": {}}))
            .expect("answer");
        assert_eq!(out, json!({"type": "text", "content": HANDBOOK_MISS_ANSWER}));
    }

    #[test]
    fn policy_qna_reports_missing_retriever_as_upstream_failure() {
        let qna = processor(StepServices::default(), POLICY_QNA_CHAIN);
        match qna.process(&json!({"prompt": "q"})) {
            Err(ExecutionError::StepExecution { step_id, source }) => {
                assert_eq!(step_id, RETRIEVE);
                assert!(matches!(source, StepError::Upstream { .. }));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn doc_draft_defaults_template_and_passes_inputs() {
        let renderer = Arc::new(RecordingRenderer::default());
        let services = StepServices::default().with_renderer(renderer.clone());
        let out = processor(services, DOC_DRAFT_CHAIN)
            .process(&json!({"inputs": {"client": "Acme Corp"}, "metadata": {}}))
            .expect("draft");
        assert_eq!(out["type"], "download_link");
        let calls = renderer.calls.lock().expect("lock");
        assert_eq!(calls[0].0, DEFAULT_DRAFT_TEMPLATE);
        assert_eq!(calls[0].1.get("client"), Some(&json!("Acme Corp")));
    }
}
