use crate::orchestration::chain_def::ChainDefinition;
use crate::orchestration::error::ExecutionError;
use crate::orchestration::step_registry::{
    StepBuildError, StepInstance, StepParams, StepRegistry,
};
use crate::shared::ids::StepId;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// The running state starts as a copy of the chain context and gains one key
/// per executed step. The chain output is the last executed step's output.
#[derive(Debug, Clone)]
pub struct ChainExecutor {
    steps: Arc<StepRegistry>,
}

struct RunCursor<'a> {
    context: &'a Value,
    state: Map<String, Value>,
    visited: HashSet<String>,
    last_output: Value,
}

impl ChainExecutor {
    pub fn new(steps: Arc<StepRegistry>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &StepRegistry {
        &self.steps
    }

    pub fn run(
        &self,
        definition: &ChainDefinition,
        context: &Value,
    ) -> Result<Value, ExecutionError> {
        let mut cursor = RunCursor {
            context,
            state: context.as_object().cloned().unwrap_or_default(),
            visited: HashSet::new(),
            last_output: Value::Null,
        };

        match definition {
            ChainDefinition::Linear { steps } => {
                for step in steps {
                    self.execute_step(&mut cursor, &step.id, &step.step_type, &step.params)?;
                }
            }
            ChainDefinition::Graph { entry, nodes } => {
                let mut previous = None::<&StepId>;
                let mut current = entry;
                loop {
                    let node = nodes.get(current).ok_or_else(|| ExecutionError::DanglingEdge {
                        from: previous.map_or_else(|| "entry".to_string(), StepId::to_string),
                        to: current.to_string(),
                    })?;
                    self.execute_step(&mut cursor, current, &node.step_type, &node.params)?;
                    if node.terminal {
                        break;
                    }
                    match node.next.first() {
                        Some(next) => {
                            previous = Some(current);
                            current = next;
                        }
                        None => break,
                    }
                }
            }
        }

        Ok(cursor.last_output)
    }

    fn execute_step(
        &self,
        cursor: &mut RunCursor<'_>,
        step_id: &StepId,
        step_type: &str,
        params: &StepParams,
    ) -> Result<(), ExecutionError> {
        if !cursor.visited.insert(step_id.to_string()) {
            return Err(ExecutionError::Cycle {
                step_id: step_id.to_string(),
            });
        }

        let instance = build_step(&self.steps, step_id.as_str(), step_type, params)?;

        tracing::debug!(
            step_id = %step_id,
            step_type,
            arity = ?instance.arity(),
            "running chain step"
        );
        let state = Value::Object(cursor.state.clone());
        let output = instance
            .call(cursor.context, &state)
            .map_err(|source| ExecutionError::StepExecution {
                step_id: step_id.to_string(),
                source,
            })?;

        cursor.state.insert(step_id.to_string(), output.clone());
        cursor.last_output = output;
        Ok(())
    }
}

/// Builds one step, attributing build failures to `step_id`.
pub(crate) fn build_step(
    steps: &StepRegistry,
    step_id: &str,
    step_type: &str,
    params: &StepParams,
) -> Result<StepInstance, ExecutionError> {
    steps.build(step_type, params).map_err(|err| match err {
        StepBuildError::UnknownType(tag) => ExecutionError::UnknownStepType {
            step_id: step_id.to_string(),
            step_type: tag,
        },
        StepBuildError::Params { source, .. } => ExecutionError::StepExecution {
            step_id: step_id.to_string(),
            source,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::StepServices;
    use crate::config::ChainKind;
    use crate::orchestration::error::StepError;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn executor_with(counter: Arc<AtomicUsize>) -> ChainExecutor {
        let mut registry = StepRegistry::with_builtin_steps(StepServices::default());
        let calls = counter.clone();
        registry.register("count", move |_, _| {
            let calls = calls.clone();
            Ok(StepInstance::state_fn(move |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(json!({ "count": n }))
            }))
        });
        registry.register("seen_keys", |_, _| {
            Ok(StepInstance::context_and_state_fn(|context, state| {
                let keys = |value: &Value| {
                    value
                        .as_object()
                        .map(|map| map.keys().cloned().collect::<Vec<_>>())
                        .unwrap_or_default()
                };
                Ok(json!({ "context": keys(context), "state": keys(state) }))
            }))
        });
        registry.register("boom", |_, _| {
            Ok(StepInstance::state_fn(|_| {
                Err(StepError::Failed("template store rejected the draft".to_string()))
            }))
        });
        ChainExecutor::new(Arc::new(registry))
    }

    fn definition(value: Value) -> ChainDefinition {
        ChainDefinition::from_value(&value, ChainKind::Chain).expect("definition")
    }

    #[test]
    fn linear_chain_feeds_outputs_forward_and_returns_last() {
        let executor = executor_with(Arc::new(AtomicUsize::new(0)));
        let chain = definition(json!({
            "type": "chain",
            "steps": [
                {"id": "first", "type": "count"},
                {"id": "inspect", "type": "seen_keys"}
            ]
        }));
        let context = json!({"prompt": "p", "inputs": {}});
        let output = executor.run(&chain, &context).expect("run");
        assert_eq!(output["context"], json!(["inputs", "prompt"]));
        assert_eq!(output["state"], json!(["first", "inputs", "prompt"]));
    }

    #[test]
    fn graph_with_back_edge_fails_with_cycle_instead_of_looping() {
        let counter = Arc::new(AtomicUsize::new(0));
        let executor = executor_with(counter.clone());
        let chain = definition(json!({
            "type": "json_graph",
            "entry": "x",
            "nodes": {
                "x": {"type": "count", "next": ["y"]},
                "y": {"type": "count", "next": ["x"]}
            }
        }));
        match executor.run(&chain, &json!({})) {
            Err(ExecutionError::Cycle { step_id }) => assert_eq!(step_id, "x"),
            other => panic!("unexpected run result: {other:?}"),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn graph_stops_at_terminal_node() {
        let counter = Arc::new(AtomicUsize::new(0));
        let executor = executor_with(counter.clone());
        let chain = definition(json!({
            "type": "json_graph",
            "entry": "a",
            "nodes": {
                "a": {"type": "count", "next": "b"},
                "b": {"type": "count", "next": ["c"], "end": true},
                "c": {"type": "count"}
            }
        }));
        let output = executor.run(&chain, &json!({})).expect("run");
        assert_eq!(output, json!({"count": 2}));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn step_failures_are_tagged_with_the_step_id() {
        let executor = executor_with(Arc::new(AtomicUsize::new(0)));
        let chain = definition(json!({
            "steps": [
                {"id": "ok", "type": "count"},
                {"id": "render", "type": "boom"},
                {"id": "never", "type": "count"}
            ]
        }));
        match executor.run(&chain, &json!({})) {
            Err(ExecutionError::StepExecution { step_id, source }) => {
                assert_eq!(step_id, "render");
                assert_eq!(
                    source,
                    StepError::Failed("template store rejected the draft".to_string())
                );
            }
            other => panic!("unexpected run result: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_at_run_time_names_the_step() {
        let executor = executor_with(Arc::new(AtomicUsize::new(0)));
        let chain = definition(json!({
            "steps": [{"id": "lost", "type": "not_registered"}]
        }));
        match executor.run(&chain, &json!({})) {
            Err(ExecutionError::UnknownStepType { step_id, step_type }) => {
                assert_eq!(step_id, "lost");
                assert_eq!(step_type, "not_registered");
            }
            other => panic!("unexpected run result: {other:?}"),
        }
    }
}
