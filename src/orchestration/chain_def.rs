use crate::config::ChainKind;
use crate::orchestration::step_registry::{StepBuildError, StepParams, StepRegistry};
use crate::shared::ids::StepId;
use crate::shared::serde_ext::string_or_seq;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};

/// Keys the pipeline seeds into every chain's running state. Step ids may not
/// shadow them.
pub const RESERVED_STATE_KEYS: [&str; 4] = ["prompt", "task_id", "inputs", "metadata"];

#[derive(Debug, Clone, PartialEq)]
pub struct StepDef {
    pub id: StepId,
    pub step_type: String,
    pub params: StepParams,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeDef {
    pub step_type: String,
    pub params: StepParams,
    pub next: Vec<StepId>,
    pub terminal: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChainDefinition {
    Linear { steps: Vec<StepDef> },
    Graph {
        entry: StepId,
        nodes: BTreeMap<StepId, NodeDef>,
    },
}

#[derive(Deserialize)]
struct StepRaw {
    id: String,
    #[serde(rename = "type", alias = "class_path", alias = "class_path_or_type")]
    step_type: String,
    #[serde(default)]
    init_kwargs: Option<StepParams>,
    #[serde(default)]
    params: Option<StepParams>,
}

#[derive(Deserialize)]
struct LinearRaw {
    #[serde(default)]
    entry: Option<String>,
    #[serde(default)]
    steps: Vec<StepRaw>,
}

#[derive(Deserialize)]
struct NodeRaw {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", alias = "class_path", alias = "class_path_or_type")]
    step_type: String,
    #[serde(default)]
    init_kwargs: Option<StepParams>,
    #[serde(default)]
    params: Option<StepParams>,
    #[serde(default, deserialize_with = "string_or_seq")]
    next: Vec<String>,
    #[serde(default, alias = "end")]
    terminal: bool,
}

#[derive(Deserialize)]
struct GraphRaw {
    #[serde(default)]
    entry: Option<String>,
    #[serde(default)]
    nodes: BTreeMap<String, NodeRaw>,
}

/// `init_kwargs` wins unless it is absent or empty, in which case the legacy
/// `params` key is used.
fn normalize_params(init_kwargs: Option<StepParams>, params: Option<StepParams>) -> StepParams {
    init_kwargs
        .filter(|map| !map.is_empty())
        .or(params)
        .unwrap_or_default()
}

fn parse_step_id(raw: &str) -> Result<StepId, String> {
    StepId::parse(raw)
}

impl ChainDefinition {
    /// Parses a stored definition. `row_kind` is used when the definition does
    /// not carry its own `type`.
    pub fn from_value(value: &Value, row_kind: ChainKind) -> Result<Self, String> {
        let object = value
            .as_object()
            .ok_or_else(|| "chain definition must be a JSON object".to_string())?;
        let kind = match object.get("type") {
            Some(Value::String(raw)) => match raw.as_str() {
                "chain" => ChainKind::Chain,
                "json_graph" => ChainKind::JsonGraph,
                other => {
                    return Err(format!(
                        "definition type must be `chain` or `json_graph`, got `{other}`"
                    ))
                }
            },
            Some(other) => return Err(format!("definition `type` must be a string, got {other}")),
            None if object.contains_key("nodes") => ChainKind::JsonGraph,
            None => row_kind,
        };

        match kind {
            ChainKind::Chain => Self::parse_linear(value),
            ChainKind::JsonGraph => Self::parse_graph(value),
            ChainKind::Runnable => {
                Err("`runnable` rows carry no declarative definition".to_string())
            }
        }
    }

    fn parse_linear(value: &Value) -> Result<Self, String> {
        let raw: LinearRaw = serde_json::from_value(value.clone()).map_err(|err| err.to_string())?;
        let mut steps = Vec::with_capacity(raw.steps.len());
        for step in raw.steps {
            steps.push(StepDef {
                id: parse_step_id(&step.id)?,
                step_type: step.step_type.trim().to_string(),
                params: normalize_params(step.init_kwargs, step.params),
            });
        }
        if let (Some(entry), Some(first)) = (raw.entry.as_deref(), steps.first()) {
            if entry.trim() != first.id.as_str() {
                return Err(format!(
                    "linear chain entry `{entry}` must name the first step `{}`",
                    first.id
                ));
            }
        }
        Ok(Self::Linear { steps })
    }

    fn parse_graph(value: &Value) -> Result<Self, String> {
        let raw: GraphRaw = serde_json::from_value(value.clone()).map_err(|err| err.to_string())?;
        let mut nodes = BTreeMap::new();
        for (key, node) in raw.nodes {
            let id = parse_step_id(&key)?;
            if let Some(declared) = node.id.as_deref() {
                if declared.trim() != id.as_str() {
                    return Err(format!("node `{id}` declares mismatched id `{declared}`"));
                }
            }
            let next = node
                .next
                .iter()
                .map(|target| parse_step_id(target))
                .collect::<Result<Vec<_>, _>>()?;
            nodes.insert(
                id,
                NodeDef {
                    step_type: node.step_type.trim().to_string(),
                    params: normalize_params(node.init_kwargs, node.params),
                    next,
                    terminal: node.terminal,
                },
            );
        }
        let entry = match raw.entry {
            Some(entry) => parse_step_id(&entry)?,
            None if nodes.len() == 1 => nodes
                .keys()
                .next()
                .cloned()
                .ok_or_else(|| "graph has no nodes".to_string())?,
            None => return Err("graph with several nodes requires `entry`".to_string()),
        };
        Ok(Self::Graph { entry, nodes })
    }

    pub fn kind(&self) -> ChainKind {
        match self {
            Self::Linear { .. } => ChainKind::Chain,
            Self::Graph { .. } => ChainKind::JsonGraph,
        }
    }

    pub fn step_count(&self) -> usize {
        match self {
            Self::Linear { steps } => steps.len(),
            Self::Graph { nodes, .. } => nodes.len(),
        }
    }

    /// Schema checks that do not involve running anything. Cycles are left to
    /// the executor.
    pub fn validate(&self, steps: &StepRegistry) -> Result<(), String> {
        match self {
            Self::Linear { steps: defs } => {
                if defs.is_empty() {
                    return Err("chain must define at least one step".to_string());
                }
                let mut seen = HashSet::new();
                for def in defs {
                    if !seen.insert(def.id.as_str()) {
                        return Err(format!("duplicate step id `{}`", def.id));
                    }
                    validate_step(steps, def.id.as_str(), &def.step_type, &def.params)?;
                }
                Ok(())
            }
            Self::Graph { entry, nodes } => {
                if nodes.is_empty() {
                    return Err("graph must define at least one node".to_string());
                }
                if !nodes.contains_key(entry.as_str()) {
                    return Err(format!("entry `{entry}` is not a declared node"));
                }
                for (id, node) in nodes {
                    if node.next.len() > 1 {
                        return Err(format!(
                            "node `{id}` declares {} successors; at most one is supported",
                            node.next.len()
                        ));
                    }
                    for target in &node.next {
                        if !nodes.contains_key(target.as_str()) {
                            return Err(format!(
                                "node `{id}` points at undeclared node `{target}`"
                            ));
                        }
                    }
                    validate_step(steps, id.as_str(), &node.step_type, &node.params)?;
                }
                Ok(())
            }
        }
    }

    pub fn to_canonical_value(&self) -> Value {
        match self {
            Self::Linear { steps } => json!({
                "type": "chain",
                "steps": steps
                    .iter()
                    .map(|step| json!({
                        "id": step.id.as_str(),
                        "type": step.step_type,
                        "params": step.params,
                    }))
                    .collect::<Vec<_>>(),
            }),
            Self::Graph { entry, nodes } => {
                let nodes = nodes
                    .iter()
                    .map(|(id, node)| {
                        (
                            id.to_string(),
                            json!({
                                "type": node.step_type,
                                "params": node.params,
                                "next": node.next.iter().map(StepId::as_str).collect::<Vec<_>>(),
                                "terminal": node.terminal,
                            }),
                        )
                    })
                    .collect::<Map<_, _>>();
                json!({"type": "json_graph", "entry": entry.as_str(), "nodes": nodes})
            }
        }
    }

    /// Hex SHA-256 of the canonical form; equal definitions hash equally no
    /// matter which legacy keys they were written with.
    pub fn digest(&self) -> String {
        let bytes = serde_json::to_vec(&self.to_canonical_value()).unwrap_or_default();
        Sha256::digest(&bytes)
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }
}

fn validate_step(
    steps: &StepRegistry,
    id: &str,
    step_type: &str,
    params: &StepParams,
) -> Result<(), String> {
    if RESERVED_STATE_KEYS.contains(&id) {
        return Err(format!("step id `{id}` is reserved"));
    }
    match steps.build(step_type, params) {
        Ok(_) => Ok(()),
        Err(StepBuildError::UnknownType(tag)) => {
            Err(format!("step `{id}` has unregistered type `{tag}`"))
        }
        Err(err @ StepBuildError::Params { .. }) => Err(format!("step `{id}`: {err}")),
    }
}
