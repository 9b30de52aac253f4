use super::ConfigError;
use crate::orchestration::manifest::{FieldSpec, Manifest};
use crate::shared::ids::{ChainId, TaskId};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

fn default_enabled() -> bool {
    true
}

fn default_tenant() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainKind {
    #[default]
    Chain,
    JsonGraph,
    Runnable,
}

impl ChainKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chain => "chain",
            Self::JsonGraph => "json_graph",
            Self::Runnable => "runnable",
        }
    }

    pub fn is_declarative(self) -> bool {
        matches!(self, Self::Chain | Self::JsonGraph)
    }
}

impl std::fmt::Display for ChainKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One stored processor chain. The id and definition are only checked when
/// the registry admits the row, so a bad row can be skipped on its own.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainRow {
    pub chain_id: String,
    #[serde(rename = "type")]
    pub kind: ChainKind,
    pub version: Option<String>,
    pub enabled: bool,
    pub chain_json: Value,
    pub risk_level: Option<String>,
    pub metadata: Map<String, Value>,
    /// Set when the stored row could not be decoded; the registry skips it
    /// with this reason.
    #[serde(skip)]
    pub rejection: Option<String>,
}

#[derive(Deserialize)]
struct ChainRowRaw {
    chain_id: String,
    #[serde(rename = "type", default)]
    kind: ChainKind,
    #[serde(default, deserialize_with = "version_text")]
    version: Option<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    chain_json: Value,
    #[serde(default)]
    risk_level: Option<String>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

impl ChainRow {
    pub fn new(chain_id: impl Into<String>, kind: ChainKind, chain_json: Value) -> Self {
        Self {
            chain_id: chain_id.into(),
            kind,
            version: None,
            enabled: true,
            chain_json,
            risk_level: None,
            metadata: Map::new(),
            rejection: None,
        }
    }

    pub fn rejected(chain_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            rejection: Some(reason.into()),
            ..Self::new(chain_id, ChainKind::Chain, Value::Null)
        }
    }
}

// Versions show up both as `v2` and as a bare number.
fn version_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text),
        Some(other) => Some(other.to_string()),
    })
}

impl<'de> Deserialize<'de> for ChainRow {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = ChainRowRaw::deserialize(deserializer)?;
        // Older rows store the definition as an encoded JSON string.
        let chain_json = match raw.chain_json {
            Value::String(encoded) => serde_json::from_str(&encoded).map_err(|err| {
                D::Error::custom(format!(
                    "chain `{}` has undecodable `chain_json`: {err}",
                    raw.chain_id
                ))
            })?,
            other => other,
        };
        Ok(Self {
            chain_id: raw.chain_id,
            kind: raw.kind,
            version: raw.version,
            enabled: raw.enabled,
            chain_json,
            risk_level: raw.risk_level,
            metadata: raw.metadata,
            rejection: None,
        })
    }
}

/// One stored task manifest plus the phrases used to route to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestRow {
    pub task_id: TaskId,
    pub chain_id: ChainId,
    pub required_fields: Vec<FieldSpec>,
    pub phrase_examples: Vec<String>,
    pub enabled: bool,
    pub metadata: Map<String, Value>,
    pub tenant_id: String,
}

#[derive(Deserialize)]
struct ManifestRowRaw {
    #[serde(alias = "task")]
    task_id: TaskId,
    #[serde(default)]
    chain_id: Option<String>,
    #[serde(default)]
    processor_chain_id: Option<String>,
    #[serde(default)]
    output_type: Option<String>,
    #[serde(default)]
    required_fields: Vec<FieldSpec>,
    #[serde(default, deserialize_with = "crate::shared::serde_ext::string_or_seq")]
    phrase_examples: Vec<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    metadata: Map<String, Value>,
    #[serde(default = "default_tenant")]
    tenant_id: String,
}

impl<'de> Deserialize<'de> for ManifestRow {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = ManifestRowRaw::deserialize(deserializer)?;
        let chain = raw
            .chain_id
            .or(raw.processor_chain_id)
            .or(raw.output_type)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| {
                D::Error::custom(format!(
                    "task `{}` is missing `chain_id` (or legacy `processor_chain_id`)",
                    raw.task_id
                ))
            })?;
        let chain_id = ChainId::parse(&chain).map_err(D::Error::custom)?;
        Ok(Self {
            task_id: raw.task_id,
            chain_id,
            required_fields: raw.required_fields,
            phrase_examples: raw.phrase_examples,
            enabled: raw.enabled,
            metadata: raw.metadata,
            tenant_id: raw.tenant_id,
        })
    }
}

impl ManifestRow {
    pub fn to_manifest(&self) -> Result<Manifest, String> {
        Manifest::new(
            self.task_id.clone(),
            self.chain_id.clone(),
            self.required_fields.clone(),
            self.metadata.clone(),
        )
    }
}

/// Source of chain and manifest rows. Read at registry build/reload time and
/// when a routing index is rebuilt.
pub trait ConfigStore: Send + Sync {
    fn chain_rows(&self) -> Result<Vec<ChainRow>, ConfigError>;
    fn manifest_rows(&self) -> Result<Vec<ManifestRow>, ConfigError>;
}

#[derive(Debug, Default, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    chains: Vec<serde_yaml::Value>,
    #[serde(default)]
    manifests: Vec<serde_yaml::Value>,
}

/// YAML catalog with `chains:` and `manifests:` lists. The file is re-read on
/// every call. Chain rows that do not parse come back as rejected rows so the
/// registry can report them; manifest rows that do not parse are dropped with
/// a warning.
#[derive(Debug, Clone)]
pub struct CatalogFileStore {
    path: PathBuf,
}

impl CatalogFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<CatalogDocument, ConfigError> {
        let raw = fs::read_to_string(&self.path).map_err(|source| ConfigError::Read {
            path: self.path.display().to_string(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(CatalogDocument::default());
        }
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: self.path.display().to_string(),
            source,
        })
    }

    fn parse_chain_row(&self, index: usize, value: serde_yaml::Value) -> ChainRow {
        let chain_id = value
            .get("chain_id")
            .and_then(serde_yaml::Value::as_str)
            .map(str::to_string);
        let enabled = value.get("enabled").and_then(serde_yaml::Value::as_bool);
        match serde_yaml::from_value::<ChainRow>(value) {
            Ok(row) => row,
            Err(err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    index,
                    error = %err,
                    "rejecting unparseable chain row"
                );
                let chain_id = chain_id.unwrap_or_else(|| format!("chains[{index}]"));
                let mut row = ChainRow::rejected(chain_id, err.to_string());
                row.enabled = enabled.unwrap_or(true);
                row
            }
        }
    }

    fn parse_rows<T>(&self, kind: &str, values: Vec<serde_yaml::Value>) -> Vec<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        values
            .into_iter()
            .enumerate()
            .filter_map(|(index, value)| match serde_yaml::from_value::<T>(value) {
                Ok(row) => Some(row),
                Err(err) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        kind,
                        index,
                        error = %err,
                        "dropping unparseable catalog row"
                    );
                    None
                }
            })
            .collect()
    }
}

impl ConfigStore for CatalogFileStore {
    fn chain_rows(&self) -> Result<Vec<ChainRow>, ConfigError> {
        let document = self.read_document()?;
        Ok(document
            .chains
            .into_iter()
            .enumerate()
            .map(|(index, value)| self.parse_chain_row(index, value))
            .collect())
    }

    fn manifest_rows(&self) -> Result<Vec<ManifestRow>, ConfigError> {
        let document = self.read_document()?;
        Ok(self.parse_rows("manifest", document.manifests))
    }
}

/// In-memory rows, replaceable at runtime.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    chains: RwLock<Vec<ChainRow>>,
    manifests: RwLock<Vec<ManifestRow>>,
}

impl MemoryConfigStore {
    pub fn new(chains: Vec<ChainRow>, manifests: Vec<ManifestRow>) -> Self {
        Self {
            chains: RwLock::new(chains),
            manifests: RwLock::new(manifests),
        }
    }

    pub fn replace_chains(&self, rows: Vec<ChainRow>) {
        *self
            .chains
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = rows;
    }

    pub fn push_chain(&self, row: ChainRow) {
        self.chains
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(row);
    }

    pub fn replace_manifests(&self, rows: Vec<ManifestRow>) {
        *self
            .manifests
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = rows;
    }
}

impl ConfigStore for MemoryConfigStore {
    fn chain_rows(&self) -> Result<Vec<ChainRow>, ConfigError> {
        Ok(self
            .chains
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    fn manifest_rows(&self) -> Result<Vec<ManifestRow>, ConfigError> {
        Ok(self
            .manifests
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn manifest_row_accepts_legacy_column_names() {
        let row: ManifestRow = serde_yaml::from_str(
            r#"
task: draft_sow
processor_chain_id: doc_draft_chain
phrase_examples: I need a SOW
required_fields: [client, cost]
"#,
        )
        .expect("manifest row");
        assert_eq!(row.task_id.as_str(), "draft_sow");
        assert_eq!(row.chain_id.as_str(), "doc_draft_chain");
        assert_eq!(row.phrase_examples, vec!["I need a SOW".to_string()]);
        assert_eq!(row.tenant_id, "default");
        assert!(row.enabled);
    }

    #[test]
    fn manifest_row_without_any_chain_column_is_rejected() {
        let err = serde_yaml::from_str::<ManifestRow>("task_id: orphan")
            .expect_err("missing chain");
        assert!(err.to_string().contains("chain_id"), "{err}");
    }

    #[test]
    fn chain_row_decodes_string_encoded_definitions() {
        let row: ChainRow = serde_yaml::from_str(
            r#"
chain_id: echo_json
type: chain
chain_json: '{"type":"chain","steps":[{"id":"a","type":"echo"}]}'
"#,
        )
        .expect("chain row");
        assert_eq!(row.chain_json["steps"][0]["id"], "a");
        assert_eq!(row.kind, ChainKind::Chain);
    }

    #[test]
    fn catalog_file_store_rejects_broken_chain_rows_in_place() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("catalog.yaml");
        fs::write(
            &path,
            r#"
chains:
  - chain_id: good
    type: chain
    chain_json: {type: chain, steps: [{id: a, type: echo}]}
  - type: chain
manifests:
  - task_id: qa
    chain_id: policy_qna_chain
"#,
        )
        .expect("write catalog");

        let store = CatalogFileStore::new(&path);
        let chains = store.chain_rows().expect("chains");
        assert_eq!(chains.len(), 2);
        assert_eq!(chains[0].chain_id, "good");
        assert_eq!(chains[0].rejection, None);
        assert_eq!(chains[1].chain_id, "chains[1]");
        let reason = chains[1].rejection.as_deref().expect("rejection");
        assert!(reason.contains("chain_id"), "{reason}");
        assert_eq!(store.manifest_rows().expect("manifests").len(), 1);
    }

    #[test]
    fn catalog_file_store_reports_missing_file() {
        let dir = tempdir().expect("tempdir");
        let store = CatalogFileStore::new(dir.path().join("absent.yaml"));
        match store.chain_rows() {
            Err(ConfigError::Read { .. }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
