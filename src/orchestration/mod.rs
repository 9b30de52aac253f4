pub mod builtin_steps;
pub mod chain_def;
pub mod envelope;
pub mod error;
pub mod executor;
pub mod gather;
pub mod intent;
pub mod manifest;
pub mod pipeline;
pub mod processors;
pub mod registry;
pub mod state;
pub mod step_registry;

pub use chain_def::{ChainDefinition, NodeDef, StepDef};
pub use envelope::ResultEnvelope;
pub use error::{ExecutionError, StepError, WorkflowError};
pub use executor::ChainExecutor;
pub use gather::{gather, GatherOutcome};
pub use intent::{
    IndexError, IntentResolver, LexicalTaskIndex, Resolution, ScoredManifest, TaskIndex,
};
pub use manifest::{FieldSpec, Manifest, Widget};
pub use pipeline::{run_workflow_with_timeout, Pipeline, Stage};
pub use processors::{NativeProcessor, BUILTIN_CHAIN_IDS};
pub use registry::{Executable, ProcessorRegistry, RegistrySnapshot, ReloadReport, SkippedChain};
pub use state::{StateError, WorkflowState};
pub use step_registry::{
    ContextStateStep, StateStep, StepArity, StepInstance, StepParams, StepRegistry,
};
