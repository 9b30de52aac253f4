use crate::collaborators::StepServices;
use crate::orchestration::error::StepError;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

pub type StepParams = Map<String, Value>;

pub trait StateStep: Send + Sync {
    fn invoke(&self, state: &Value) -> Result<Value, StepError>;
}

pub trait ContextStateStep: Send + Sync {
    fn run(&self, context: &Value, state: &Value) -> Result<Value, StepError>;
}

impl<F> StateStep for F
where
    F: Fn(&Value) -> Result<Value, StepError> + Send + Sync,
{
    fn invoke(&self, state: &Value) -> Result<Value, StepError> {
        self(state)
    }
}

impl<F> ContextStateStep for F
where
    F: Fn(&Value, &Value) -> Result<Value, StepError> + Send + Sync,
{
    fn run(&self, context: &Value, state: &Value) -> Result<Value, StepError> {
        self(context, state)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepArity {
    State,
    ContextAndState,
}

pub enum StepInstance {
    State(Box<dyn StateStep>),
    ContextAndState(Box<dyn ContextStateStep>),
}

impl StepInstance {
    pub fn state<S: StateStep + 'static>(step: S) -> Self {
        Self::State(Box::new(step))
    }

    pub fn context_and_state<S: ContextStateStep + 'static>(step: S) -> Self {
        Self::ContextAndState(Box::new(step))
    }

    pub fn state_fn<F>(step: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, StepError> + Send + Sync + 'static,
    {
        Self::State(Box::new(step))
    }

    pub fn context_and_state_fn<F>(step: F) -> Self
    where
        F: Fn(&Value, &Value) -> Result<Value, StepError> + Send + Sync + 'static,
    {
        Self::ContextAndState(Box::new(step))
    }

    pub fn arity(&self) -> StepArity {
        match self {
            Self::State(_) => StepArity::State,
            Self::ContextAndState(_) => StepArity::ContextAndState,
        }
    }

    pub fn call(&self, context: &Value, state: &Value) -> Result<Value, StepError> {
        match self {
            Self::State(step) => step.invoke(state),
            Self::ContextAndState(step) => step.run(context, state),
        }
    }
}

impl std::fmt::Debug for StepInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StepInstance({:?})", self.arity())
    }
}

pub type StepFactory =
    Arc<dyn Fn(&StepParams, &StepServices) -> Result<StepInstance, StepError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StepBuildError {
    #[error("unregistered step type `{0}`")]
    UnknownType(String),
    #[error("step type `{step_type}` rejected its params: {source}")]
    Params {
        step_type: String,
        #[source]
        source: StepError,
    },
}

#[derive(Clone, Default)]
pub struct StepRegistry {
    factories: BTreeMap<String, StepFactory>,
    aliases: BTreeMap<String, String>,
    services: StepServices,
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("types", &self.factories.keys().collect::<Vec<_>>())
            .field("aliases", &self.aliases)
            .field("services", &self.services)
            .finish()
    }
}

impl StepRegistry {
    pub fn new(services: StepServices) -> Self {
        Self {
            factories: BTreeMap::new(),
            aliases: BTreeMap::new(),
            services,
        }
    }

    /// Registry preloaded with the built-in step types and their legacy aliases.
    pub fn with_builtin_steps(services: StepServices) -> Self {
        let mut registry = Self::new(services);
        crate::orchestration::builtin_steps::register_builtin_steps(&mut registry);
        registry
    }

    pub fn services(&self) -> &StepServices {
        &self.services
    }

    /// Registers (or replaces) the factory for `type_tag`.
    pub fn register<F>(&mut self, type_tag: &str, factory: F)
    where
        F: Fn(&StepParams, &StepServices) -> Result<StepInstance, StepError>
            + Send
            + Sync
            + 'static,
    {
        self.aliases.remove(type_tag);
        self.factories
            .insert(type_tag.to_string(), Arc::new(factory));
    }

    /// Makes `legacy` resolve to the already registered `canonical` type.
    pub fn register_alias(&mut self, legacy: &str, canonical: &str) -> Result<(), String> {
        if !self.factories.contains_key(canonical) {
            return Err(format!(
                "cannot alias `{legacy}` to unregistered step type `{canonical}`"
            ));
        }
        if self.factories.contains_key(legacy) {
            return Err(format!("`{legacy}` is already a registered step type"));
        }
        self.aliases
            .insert(legacy.to_string(), canonical.to_string());
        Ok(())
    }

    pub fn canonical_type<'a>(&'a self, type_tag: &'a str) -> Option<&'a str> {
        if let Some((name, _)) = self.factories.get_key_value(type_tag) {
            return Some(name.as_str());
        }
        self.aliases.get(type_tag).map(String::as_str)
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        self.canonical_type(type_tag).is_some()
    }

    pub fn build(
        &self,
        type_tag: &str,
        params: &StepParams,
    ) -> Result<StepInstance, StepBuildError> {
        let factory = self
            .canonical_type(type_tag)
            .and_then(|canonical| self.factories.get(canonical))
            .ok_or_else(|| StepBuildError::UnknownType(type_tag.to_string()))?;
        factory(params, &self.services).map_err(|source| StepBuildError::Params {
            step_type: type_tag.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> StepRegistry {
        let mut registry = StepRegistry::new(StepServices::default());
        registry.register("constant", |params, _| {
            let value = params.get("value").cloned().unwrap_or(Value::Null);
            Ok(StepInstance::state_fn(move |_| Ok(value.clone())))
        });
        registry.register("pair", |_, _| {
            Ok(StepInstance::context_and_state_fn(|context, state| {
                Ok(json!([context.clone(), state.clone()]))
            }))
        });
        registry
    }

    #[test]
    fn build_reports_declared_arity() {
        let registry = registry();
        let single = registry.build("constant", &Map::new()).expect("constant");
        let double = registry.build("pair", &Map::new()).expect("pair");
        assert_eq!(single.arity(), StepArity::State);
        assert_eq!(double.arity(), StepArity::ContextAndState);
        assert_eq!(
            double.call(&json!("ctx"), &json!("state")).expect("call"),
            json!(["ctx", "state"])
        );
    }

    #[test]
    fn aliases_resolve_to_canonical_factories() {
        let mut registry = registry();
        registry
            .register_alias("backend.helpers.Constant", "constant")
            .expect("alias");
        let params = json!({"value": 7});
        let step = registry
            .build("backend.helpers.Constant", params.as_object().expect("object"))
            .expect("build via alias");
        assert_eq!(step.call(&Value::Null, &Value::Null).expect("call"), json!(7));
        assert_eq!(
            registry.canonical_type("backend.helpers.Constant"),
            Some("constant")
        );
    }

    #[test]
    fn alias_to_unknown_type_is_rejected() {
        let mut registry = registry();
        assert!(registry.register_alias("legacy.Thing", "missing").is_err());
        assert!(registry.register_alias("pair", "constant").is_err());
    }

    #[test]
    fn unknown_types_fail_to_build() {
        match registry().build("nope", &Map::new()) {
            Err(StepBuildError::UnknownType(tag)) => assert_eq!(tag, "nope"),
            other => panic!("unexpected build result: {other:?}"),
        }
    }
}
