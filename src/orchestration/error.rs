use crate::config::ConfigError;

/// Failure raised by a single step implementation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StepError {
    #[error("{service} unavailable: {reason}")]
    Upstream { service: String, reason: String },
    #[error("invalid step input: {0}")]
    InvalidInput(String),
    #[error("invalid step params: {0}")]
    InvalidParams(String),
    #[error("{0}")]
    Failed(String),
}

impl StepError {
    pub fn upstream(service: &str, reason: impl Into<String>) -> Self {
        Self::Upstream {
            service: service.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failure of one chain run inside the executor.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    #[error("cycle detected at step `{step_id}`")]
    Cycle { step_id: String },
    #[error("step `{step_id}` failed: {source}")]
    StepExecution {
        step_id: String,
        #[source]
        source: StepError,
    },
    #[error("step `{step_id}` has unregistered type `{step_type}`")]
    UnknownStepType { step_id: String, step_type: String },
    #[error("step `{from}` points at undeclared step `{to}`")]
    DanglingEdge { from: String, to: String },
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("chain `{chain_id}` is not registered")]
    UnknownChain { chain_id: String },
    #[error("chain `{chain_id}` definition is invalid: {reason}")]
    InvalidChain { chain_id: String, reason: String },
    #[error("chain `{chain_id}` stopped: cycle detected at step `{step_id}`")]
    Cycle { chain_id: String, step_id: String },
    #[error("chain `{chain_id}` step `{step_id}` failed: {reason}")]
    StepExecution {
        chain_id: String,
        step_id: String,
        reason: String,
    },
    #[error("{service} unavailable: {reason}")]
    UpstreamUnavailable { service: String, reason: String },
    #[error("chain `{chain_id}` step `{step_id}` failed: {service} unavailable: {reason}")]
    StepUpstream {
        chain_id: String,
        step_id: String,
        service: String,
        reason: String,
    },
    #[error("chain `{chain_id}` returned a malformed result: {reason}")]
    MalformedResult { chain_id: String, reason: String },
    #[error("workflow run timed out after {timeout_seconds}s")]
    RunTimeout { timeout_seconds: u64 },
    #[error("config error: {0}")]
    Config(String),
}

impl WorkflowError {
    /// Whether the caller may retry the whole `run_workflow` call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable { .. }
                | Self::StepUpstream { .. }
                | Self::RunTimeout { .. }
        )
    }

    pub fn from_execution(chain_id: &str, err: ExecutionError) -> Self {
        match err {
            ExecutionError::Cycle { step_id } => Self::Cycle {
                chain_id: chain_id.to_string(),
                step_id,
            },
            ExecutionError::StepExecution {
                step_id,
                source: StepError::Upstream { service, reason },
            } => Self::StepUpstream {
                chain_id: chain_id.to_string(),
                step_id,
                service,
                reason,
            },
            ExecutionError::StepExecution { step_id, source } => Self::StepExecution {
                chain_id: chain_id.to_string(),
                step_id,
                reason: source.to_string(),
            },
            ExecutionError::UnknownStepType { step_id, step_type } => Self::InvalidChain {
                chain_id: chain_id.to_string(),
                reason: format!("step `{step_id}` has unregistered type `{step_type}`"),
            },
            ExecutionError::DanglingEdge { from, to } => Self::InvalidChain {
                chain_id: chain_id.to_string(),
                reason: format!("step `{from}` points at undeclared step `{to}`"),
            },
        }
    }
}

impl From<ConfigError> for WorkflowError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
