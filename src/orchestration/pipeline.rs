use crate::collaborators::StepServices;
use crate::config::{CatalogFileStore, ConfigStore, MemoryConfigStore, Settings};
use crate::orchestration::envelope::ResultEnvelope;
use crate::orchestration::error::WorkflowError;
use crate::orchestration::gather::{gather, GatherOutcome};
use crate::orchestration::intent::{IntentResolver, LexicalTaskIndex, TaskIndex};
use crate::orchestration::registry::{ProcessorRegistry, ReloadReport};
use crate::orchestration::state::WorkflowState;
use crate::orchestration::step_registry::StepRegistry;
use serde_json::{json, Map, Value};
use std::sync::{mpsc, Arc};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Intent,
    Gather,
    Process,
    Deliver,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Intent => "intent",
            Self::Gather => "gather",
            Self::Process => "process",
            Self::Deliver => "deliver",
        }
    }
}

/// Intent, Gather, Process, Deliver. Process always hands over to Deliver, so
/// one run invokes it at most once.
#[derive(Debug)]
pub struct Pipeline {
    resolver: IntentResolver,
    registry: Arc<ProcessorRegistry>,
}

impl Pipeline {
    pub fn new(resolver: IntentResolver, registry: Arc<ProcessorRegistry>) -> Self {
        Self { resolver, registry }
    }

    /// Wires the catalog store, lexical index and registry described by
    /// `settings`. Without a catalog only the built-in chains are available.
    pub fn from_settings(
        settings: &Settings,
        services: StepServices,
    ) -> Result<Self, WorkflowError> {
        let store: Arc<dyn ConfigStore> = match settings.resolved_catalog_path() {
            Some(path) => Arc::new(CatalogFileStore::new(path)),
            None => Arc::new(MemoryConfigStore::default()),
        };
        let index = LexicalTaskIndex::from_store(store.as_ref()).unwrap_or_else(|err| {
            tracing::warn!(
                error = %err,
                "task manifests unreadable; routing everything to the fallback"
            );
            LexicalTaskIndex::default()
        });
        let resolver = IntentResolver::new(Arc::new(index), &settings.routing, &settings.fallback)?;
        let steps = Arc::new(StepRegistry::with_builtin_steps(services));
        let state_root = settings.resolved_state_root();
        let registry = ProcessorRegistry::build(store, steps, state_root.as_deref());
        Ok(Self::new(resolver, Arc::new(registry)))
    }

    pub fn with_index(
        index: Arc<dyn TaskIndex>,
        settings: &Settings,
        registry: Arc<ProcessorRegistry>,
    ) -> Result<Self, WorkflowError> {
        let resolver = IntentResolver::new(index, &settings.routing, &settings.fallback)?;
        Ok(Self::new(resolver, registry))
    }

    pub fn registry(&self) -> &Arc<ProcessorRegistry> {
        &self.registry
    }

    pub fn resolver(&self) -> &IntentResolver {
        &self.resolver
    }

    /// Reloads the chain registry, then re-reads manifests into the task
    /// index from the same store. If the manifests cannot be read the
    /// previous index keeps routing.
    pub fn reload(&self) -> Result<ReloadReport, WorkflowError> {
        let report = self.registry.reload()?;
        if let Err(err) = self.resolver.refresh_index(self.registry.store().as_ref()) {
            tracing::warn!(
                error = %err,
                "task manifests unreadable; keeping previous task index"
            );
        }
        Ok(report)
    }

    pub fn run_workflow(
        &self,
        prompt: &str,
        answers: Option<Map<String, Value>>,
    ) -> ResultEnvelope {
        let mut state = WorkflowState::new(prompt, answers);
        let mut stage = Stage::Intent;
        loop {
            tracing::debug!(stage = stage.as_str(), "pipeline stage");
            stage = match stage {
                Stage::Intent => self.intent(&mut state),
                Stage::Gather => self.gather(&mut state),
                Stage::Process => self.process(&mut state),
                Stage::Deliver => break,
            };
        }
        deliver(state)
    }

    fn intent(&self, state: &mut WorkflowState) -> Stage {
        let resolution = match self.resolver.resolve(state.prompt()) {
            Ok(resolution) => resolution,
            Err(err) => return fail(state, Stage::Intent, &err),
        };
        tracing::info!(
            task_id = %resolution.manifest.task_id,
            chain_id = %resolution.manifest.chain_id,
            matched = resolution.matched,
            score = ?resolution.score,
            "intent resolved"
        );
        if let Err(err) = state.attach_manifest(resolution.manifest) {
            return fail(state, Stage::Intent, &WorkflowError::Config(err.to_string()));
        }
        Stage::Gather
    }

    fn gather(&self, state: &mut WorkflowState) -> Stage {
        let Some(manifest) = state.manifest() else {
            return fail(
                state,
                Stage::Gather,
                &WorkflowError::Config("no manifest attached before gather".to_string()),
            );
        };
        let empty = Map::new();
        let answers = state.answers().unwrap_or(&empty);
        match gather(manifest, answers) {
            GatherOutcome::Continue => Stage::Process,
            GatherOutcome::NeedsInput(fields) => {
                tracing::info!(
                    task_id = %manifest.task_id,
                    missing = fields.len(),
                    "requesting more input"
                );
                record(state, ResultEnvelope::Form { fields });
                Stage::Deliver
            }
        }
    }

    fn process(&self, state: &mut WorkflowState) -> Stage {
        match self.execute(state) {
            Ok(envelope) => record(state, envelope),
            Err(err) => {
                fail(state, Stage::Process, &err);
            }
        }
        Stage::Deliver
    }

    fn execute(&self, state: &WorkflowState) -> Result<ResultEnvelope, WorkflowError> {
        let manifest = state.manifest().ok_or_else(|| {
            WorkflowError::Config("no manifest attached before process".to_string())
        })?;
        let chain_id = manifest.chain_id.as_str();
        let executable = self
            .registry
            .lookup(chain_id)
            .ok_or_else(|| WorkflowError::UnknownChain {
                chain_id: chain_id.to_string(),
            })?;

        let context = json!({
            "prompt": state.prompt(),
            "task_id": manifest.task_id.as_str(),
            "inputs": state.answers().cloned().unwrap_or_default(),
            "metadata": manifest.metadata,
        });
        let output = executable
            .execute(&context)
            .map_err(|err| WorkflowError::from_execution(chain_id, err))?;
        ResultEnvelope::from_chain_output(output).map_err(|reason| WorkflowError::MalformedResult {
            chain_id: chain_id.to_string(),
            reason,
        })
    }
}

fn record(state: &mut WorkflowState, envelope: ResultEnvelope) {
    if let Err(err) = state.set_result(envelope) {
        tracing::error!(error = %err, "dropping second workflow result");
    }
}

fn fail(state: &mut WorkflowState, stage: Stage, err: &WorkflowError) -> Stage {
    tracing::warn!(
        stage = stage.as_str(),
        retryable = err.is_retryable(),
        error = %err,
        "workflow run failed"
    );
    record(state, ResultEnvelope::error(err.to_string()));
    Stage::Deliver
}

fn deliver(state: WorkflowState) -> ResultEnvelope {
    state
        .into_result()
        .unwrap_or_else(|| ResultEnvelope::error("workflow finished without a result"))
}

/// Runs one pipeline on a worker thread and gives up after `timeout`. A
/// timed-out run keeps going in the background until it finishes, but its
/// state is dropped with the thread and its result is discarded.
pub fn run_workflow_with_timeout(
    pipeline: Arc<Pipeline>,
    prompt: String,
    answers: Option<Map<String, Value>>,
    timeout: Duration,
) -> ResultEnvelope {
    let (tx, rx) = mpsc::channel();
    let spawned = std::thread::Builder::new()
        .name("taskflow-run".to_string())
        .spawn(move || {
            let envelope = pipeline.run_workflow(&prompt, answers);
            let _ = tx.send(envelope);
        });
    if let Err(err) = spawned {
        return ResultEnvelope::error(format!("failed to start workflow run: {err}"));
    }

    match rx.recv_timeout(timeout) {
        Ok(envelope) => envelope,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            let err = WorkflowError::RunTimeout {
                timeout_seconds: timeout.as_secs(),
            };
            tracing::warn!(error = %err, "abandoning workflow run");
            ResultEnvelope::error(err.to_string())
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            ResultEnvelope::error("workflow run aborted before producing a result")
        }
    }
}
