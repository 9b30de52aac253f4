use crate::collaborators::{
    RetrievalQuery, StepServices, GENERATOR_SERVICE, RENDERER_SERVICE, RETRIEVER_SERVICE,
};
use crate::orchestration::error::StepError;
use crate::orchestration::step_registry::{
    ContextStateStep, StateStep, StepInstance, StepParams, StepRegistry,
};
use serde_json::{json, Map, Value};

pub const ECHO: &str = "echo";
pub const FORMAT_TEXT: &str = "format_text";
pub const RETRIEVE: &str = "retrieve";
pub const GENERATE: &str = "generate";
pub const DOCX_RENDER: &str = "docx_render";

const LEGACY_ALIASES: [(&str, &str); 3] = [
    ("backend.tools.docx_render.DocxRender", DOCX_RENDER),
    ("backend.tools.docx_render.DocDraftRunnable", DOCX_RENDER),
    ("backend.vector_search.SupaRetriever", RETRIEVE),
];

pub fn register_builtin_steps(registry: &mut StepRegistry) {
    registry.register(ECHO, |_, _| Ok(StepInstance::state(EchoStep)));
    registry.register(FORMAT_TEXT, |params, _| {
        Ok(StepInstance::state(FormatTextStep::from_params(params)?))
    });
    registry.register(RETRIEVE, |params, services| {
        Ok(StepInstance::state(RetrieveStep::from_params(params, services)?))
    });
    registry.register(GENERATE, |params, services| {
        Ok(StepInstance::context_and_state(GenerateStep::from_params(
            params, services,
        )?))
    });
    registry.register(DOCX_RENDER, |params, services| {
        Ok(StepInstance::state(DocxRenderStep::from_params(params, services)?))
    });
    for (legacy, canonical) in LEGACY_ALIASES {
        if let Err(err) = registry.register_alias(legacy, canonical) {
            tracing::warn!(legacy, canonical, error = %err, "skipping step alias");
        }
    }
}

pub fn inputs_of(state: &Value) -> Map<String, Value> {
    state
        .get("inputs")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn text_envelope(content: String) -> Value {
    json!({"type": "text", "content": content})
}

fn optional_string(params: &StepParams, key: &str) -> Result<Option<String>, StepError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) if value.trim().is_empty() => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(other) => Err(StepError::InvalidParams(format!(
            "`{key}` must be a string, got {other}"
        ))),
    }
}

fn required_string(params: &StepParams, key: &str) -> Result<String, StepError> {
    optional_string(params, key)?
        .ok_or_else(|| StepError::InvalidParams(format!("`{key}` is required")))
}

/// Replaces `{name}` placeholders using `lookup`. Braces that do not enclose an
/// identifier are copied verbatim.
pub fn substitute_placeholders<F>(template: &str, lookup: F) -> Result<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let name = &after[..end];
        let is_identifier = !name.is_empty()
            && name
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
        if is_identifier {
            let value = lookup(name).ok_or_else(|| {
                format!("template expects placeholder {{{name}}} which was not supplied")
            })?;
            out.push_str(&value);
            rest = &after[end + 1..];
        } else {
            out.push('{');
            rest = after;
        }
    }
    out.push_str(rest);
    Ok(out)
}

struct EchoStep;

impl StateStep for EchoStep {
    fn invoke(&self, state: &Value) -> Result<Value, StepError> {
        let mut entries = inputs_of(state).into_iter().collect::<Vec<_>>();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let content = if entries.is_empty() {
            "No inputs were provided.".to_string()
        } else {
            entries
                .iter()
                .map(|(key, value)| format!("{key}: {}", value_text(value)))
                .collect::<Vec<_>>()
                .join("\n")
        };
        Ok(text_envelope(content))
    }
}

struct FormatTextStep {
    template: String,
}

impl FormatTextStep {
    fn from_params(params: &StepParams) -> Result<Self, StepError> {
        Ok(Self {
            template: required_string(params, "template")?,
        })
    }
}

impl StateStep for FormatTextStep {
    fn invoke(&self, state: &Value) -> Result<Value, StepError> {
        let inputs = inputs_of(state);
        let metadata = state.get("metadata").and_then(Value::as_object);
        let content = substitute_placeholders(&self.template, |name| {
            inputs
                .get(name)
                .or_else(|| metadata.and_then(|m| m.get(name)))
                .map(value_text)
        })
        .map_err(StepError::InvalidInput)?;
        Ok(text_envelope(content))
    }
}

struct RetrieveStep {
    k: usize,
    doc_id: Option<String>,
    query_key: String,
    max_distance: Option<f32>,
    services: StepServices,
}

impl RetrieveStep {
    fn from_params(params: &StepParams, services: &StepServices) -> Result<Self, StepError> {
        let k = match params.get("k") {
            None | Some(Value::Null) => 4,
            Some(value) => value
                .as_u64()
                .filter(|k| *k >= 1)
                .ok_or_else(|| {
                    StepError::InvalidParams(format!(
                        "`k` must be a positive integer, got {value}"
                    ))
                })?
                as usize,
        };
        let max_distance = match params.get("max_distance") {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.as_f64().ok_or_else(|| {
                StepError::InvalidParams(format!("`max_distance` must be a number, got {value}"))
            })? as f32),
        };
        Ok(Self {
            k,
            doc_id: optional_string(params, "doc_id")?,
            query_key: optional_string(params, "query_key")?
                .unwrap_or_else(|| "question".to_string()),
            max_distance,
            services: services.clone(),
        })
    }
}

fn question_from(state: &Value, key: &str) -> Option<String> {
    state
        .get("inputs")
        .and_then(|inputs| inputs.get(key))
        .map(value_text)
        .filter(|text| !text.trim().is_empty())
        .or_else(|| {
            state
                .get("prompt")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .filter(|text| !text.trim().is_empty())
}

impl StateStep for RetrieveStep {
    fn invoke(&self, state: &Value) -> Result<Value, StepError> {
        let query = question_from(state, &self.query_key).ok_or_else(|| {
            StepError::InvalidInput(format!(
                "no `{}` input or prompt to retrieve for",
                self.query_key
            ))
        })?;
        let retriever = self.services.retriever()?;
        let chunks = retriever
            .retrieve(&RetrievalQuery {
                query: &query,
                k: self.k,
                doc_id: self.doc_id.as_deref(),
            })
            .map_err(|err| StepError::upstream(RETRIEVER_SERVICE, err.reason))?;
        let kept = chunks
            .into_iter()
            .filter(|chunk| self.max_distance.map_or(true, |max| chunk.distance < max))
            .collect::<Vec<_>>();
        Ok(json!({ "chunks": kept }))
    }
}

struct GenerateStep {
    prompt: String,
    context_from: String,
    question_key: String,
    empty_answer: Option<String>,
    services: StepServices,
}

impl GenerateStep {
    fn from_params(params: &StepParams, services: &StepServices) -> Result<Self, StepError> {
        Ok(Self {
            prompt: required_string(params, "prompt")?,
            context_from: optional_string(params, "context_from")?
                .unwrap_or_else(|| RETRIEVE.to_string()),
            question_key: optional_string(params, "question_key")?
                .unwrap_or_else(|| "question".to_string()),
            empty_answer: optional_string(params, "empty_answer")?,
            services: services.clone(),
        })
    }
}

impl ContextStateStep for GenerateStep {
    fn run(&self, context: &Value, state: &Value) -> Result<Value, StepError> {
        let chunks = state
            .get(&self.context_from)
            .and_then(|output| output.get("chunks"))
            .and_then(Value::as_array)
            .map(|chunks| {
                chunks
                    .iter()
                    .filter_map(|chunk| chunk.get("content").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        if chunks.is_empty() {
            if let Some(answer) = self.empty_answer.as_ref() {
                return Ok(text_envelope(answer.clone()));
            }
        }
        let joined = chunks.join("\n\n---\n");
        let question = question_from(context, &self.question_key).unwrap_or_default();
        let prompt = substitute_placeholders(&self.prompt, |name| match name {
            "CONTEXT" => Some(joined.clone()),
            "QUESTION" => Some(question.clone()),
            _ => None,
        })
        .map_err(StepError::InvalidParams)?;

        let generator = self.services.generator()?;
        let answer = generator
            .generate(&prompt)
            .map_err(|err| StepError::upstream(GENERATOR_SERVICE, err.reason))?;
        if answer.trim().is_empty() {
            return Err(StepError::Failed("generator returned empty text".to_string()));
        }
        Ok(text_envelope(answer))
    }
}

struct DocxRenderStep {
    template_id: Option<String>,
    services: StepServices,
}

impl DocxRenderStep {
    fn from_params(params: &StepParams, services: &StepServices) -> Result<Self, StepError> {
        Ok(Self {
            template_id: optional_string(params, "template_id")?,
            services: services.clone(),
        })
    }
}

impl StateStep for DocxRenderStep {
    fn invoke(&self, state: &Value) -> Result<Value, StepError> {
        let template_id = self
            .template_id
            .clone()
            .or_else(|| {
                state
                    .get("metadata")
                    .and_then(|metadata| metadata.get("template_id"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .ok_or_else(|| {
                StepError::InvalidInput(
                    "no `template_id` in step params or task metadata".to_string(),
                )
            })?;
        let renderer = self.services.renderer()?;
        let url = renderer
            .render(&template_id, &inputs_of(state))
            .map_err(|err| StepError::upstream(RENDERER_SERVICE, err.reason))?;
        Ok(json!({"type": "download_link", "url": url}))
    }
}
