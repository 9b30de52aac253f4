use crate::config::{ChainRow, ConfigStore};
use crate::orchestration::chain_def::ChainDefinition;
use crate::orchestration::error::{ExecutionError, WorkflowError};
use crate::orchestration::executor::ChainExecutor;
use crate::orchestration::processors::{builtin_processors, NativeProcessor};
use crate::orchestration::step_registry::StepRegistry;
use crate::shared::ids::ChainId;
use crate::shared::logging::append_registry_log;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

pub const CONFIG_STORE_SERVICE: &str = "config store";

pub enum Executable {
    Native(Arc<dyn NativeProcessor>),
    Chain {
        definition: ChainDefinition,
        digest: String,
        executor: ChainExecutor,
    },
}

impl Executable {
    pub fn execute(&self, context: &Value) -> Result<Value, ExecutionError> {
        match self {
            Self::Native(processor) => processor.process(context),
            Self::Chain {
                definition,
                executor,
                ..
            } => executor.run(definition, context),
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Self::Native(_))
    }

    pub fn digest(&self) -> Option<&str> {
        match self {
            Self::Native(_) => None,
            Self::Chain { digest, .. } => Some(digest),
        }
    }
}

impl std::fmt::Debug for Executable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native(_) => f.write_str("Executable::Native"),
            Self::Chain {
                definition, digest, ..
            } => f
                .debug_struct("Executable::Chain")
                .field("kind", &definition.kind())
                .field("steps", &definition.step_count())
                .field("digest", digest)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedChain {
    pub chain_id: String,
    pub reason: String,
}

#[derive(Debug)]
pub struct RegistrySnapshot {
    generation: u64,
    entries: BTreeMap<ChainId, Arc<Executable>>,
    skipped: Vec<SkippedChain>,
}

impl RegistrySnapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, chain_id: &str) -> Option<Arc<Executable>> {
        self.entries.get(chain_id).cloned()
    }

    pub fn contains(&self, chain_id: &str) -> bool {
        self.entries.contains_key(chain_id)
    }

    pub fn chain_ids(&self) -> Vec<&str> {
        self.entries.keys().map(ChainId::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn skipped(&self) -> &[SkippedChain] {
        &self.skipped
    }

    fn external_digests(&self) -> BTreeMap<&str, &str> {
        self.entries
            .iter()
            .filter_map(|(id, executable)| executable.digest().map(|digest| (id.as_str(), digest)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReloadReport {
    pub generation: u64,
    pub registered: usize,
    pub skipped: Vec<SkippedChain>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

/// Readers clone the active snapshot under a read lock held only for that
/// clone. `reload` builds a complete snapshot under `reload_lock` and swaps
/// the pointer in one write; requests holding the old snapshot keep it.
pub struct ProcessorRegistry {
    store: Arc<dyn ConfigStore>,
    steps: Arc<StepRegistry>,
    builtins: Vec<(ChainId, Arc<Executable>)>,
    audit_root: Option<PathBuf>,
    active: RwLock<Arc<RegistrySnapshot>>,
    reload_lock: Mutex<()>,
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("active", &self.snapshot())
            .finish()
    }
}

impl ProcessorRegistry {
    /// Builds the first snapshot. An unreadable store is logged and leaves the
    /// registry with the built-ins only; `reload` can fill it in later.
    pub fn build(
        store: Arc<dyn ConfigStore>,
        steps: Arc<StepRegistry>,
        audit_root: Option<&Path>,
    ) -> Self {
        let builtins = builtin_processors(&steps)
            .into_iter()
            .map(|(id, processor)| (id, Arc::new(Executable::Native(processor))))
            .collect();
        let mut registry = Self {
            store,
            steps,
            builtins,
            audit_root: audit_root.map(Path::to_path_buf),
            active: RwLock::new(Arc::new(RegistrySnapshot {
                generation: 0,
                entries: BTreeMap::new(),
                skipped: Vec::new(),
            })),
            reload_lock: Mutex::new(()),
        };

        let rows = match registry.store.chain_rows() {
            Ok(rows) => rows,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    "config store unreadable; starting with built-in chains only"
                );
                registry.audit(
                    "warn",
                    "registry.store_unavailable",
                    &format!("starting with built-in chains only: {err}"),
                );
                Vec::new()
            }
        };
        let snapshot = registry.compile(1, rows, None);
        registry.audit(
            "info",
            "registry.built",
            &format!(
                "generation 1 registered {} chains, skipped {}",
                snapshot.len(),
                snapshot.skipped.len()
            ),
        );
        registry.active = RwLock::new(Arc::new(snapshot));
        registry
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    pub fn steps(&self) -> &Arc<StepRegistry> {
        &self.steps
    }

    /// The active mapping; hold on to it to see one consistent registry for a
    /// whole request.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.active
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn lookup(&self, chain_id: &str) -> Option<Arc<Executable>> {
        self.snapshot().get(chain_id)
    }

    pub fn reload(&self) -> Result<ReloadReport, WorkflowError> {
        let _guard = self
            .reload_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let rows = self.store.chain_rows().map_err(|err| {
            tracing::warn!(error = %err, "reload aborted; keeping previous registry");
            self.audit(
                "warn",
                "registry.reload_failed",
                &format!("keeping previous registry: {err}"),
            );
            WorkflowError::UpstreamUnavailable {
                service: CONFIG_STORE_SERVICE.to_string(),
                reason: err.to_string(),
            }
        })?;

        let previous = self.snapshot();
        let next = self.compile(previous.generation + 1, rows, Some(&previous));
        let report = diff_report(&previous, &next);

        *self
            .active
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(next);

        tracing::info!(
            generation = report.generation,
            registered = report.registered,
            skipped = report.skipped.len(),
            added = ?report.added,
            removed = ?report.removed,
            changed = ?report.changed,
            "processor registry reloaded"
        );
        self.audit(
            "info",
            "registry.reloaded",
            &format!(
                "generation {} registered {} chains, skipped {} (added {:?}, removed {:?}, changed {:?})",
                report.generation,
                report.registered,
                report.skipped.len(),
                report.added,
                report.removed,
                report.changed
            ),
        );
        Ok(report)
    }

    fn compile(
        &self,
        generation: u64,
        rows: Vec<ChainRow>,
        previous: Option<&RegistrySnapshot>,
    ) -> RegistrySnapshot {
        let mut entries = self
            .builtins
            .iter()
            .map(|(id, executable)| (id.clone(), executable.clone()))
            .collect::<BTreeMap<_, _>>();
        let mut skipped = Vec::new();

        for row in rows {
            if !row.enabled || (row.rejection.is_none() && !row.kind.is_declarative()) {
                tracing::debug!(
                    chain_id = %row.chain_id,
                    kind = %row.kind,
                    enabled = row.enabled,
                    "ignoring chain row"
                );
                continue;
            }
            match self.admit(&row, &entries, previous) {
                Ok((chain_id, executable)) => {
                    entries.insert(chain_id, executable);
                }
                Err(reason) => {
                    tracing::warn!(
                        chain_id = %row.chain_id,
                        reason = %reason,
                        "skipping chain definition"
                    );
                    self.audit(
                        "warn",
                        "registry.chain_skipped",
                        &format!("chain `{}` skipped: {reason}", row.chain_id),
                    );
                    skipped.push(SkippedChain {
                        chain_id: row.chain_id.clone(),
                        reason,
                    });
                }
            }
        }

        RegistrySnapshot {
            generation,
            entries,
            skipped,
        }
    }

    fn admit(
        &self,
        row: &ChainRow,
        entries: &BTreeMap<ChainId, Arc<Executable>>,
        previous: Option<&RegistrySnapshot>,
    ) -> Result<(ChainId, Arc<Executable>), String> {
        if let Some(reason) = &row.rejection {
            return Err(reason.clone());
        }
        let chain_id = ChainId::parse(&row.chain_id)?;
        if let Some(existing) = entries.get(chain_id.as_str()) {
            return Err(if existing.is_native() {
                "collides with a built-in chain".to_string()
            } else {
                "duplicate chain id; the first definition wins".to_string()
            });
        }

        let definition = ChainDefinition::from_value(&row.chain_json, row.kind)?;
        definition.validate(&self.steps)?;
        let digest = definition.digest();

        // Unchanged definitions keep their executable so lookups stay stable.
        if let Some(existing) = previous.and_then(|snapshot| snapshot.get(chain_id.as_str())) {
            if existing.digest() == Some(digest.as_str()) {
                return Ok((chain_id, existing));
            }
        }

        Ok((
            chain_id,
            Arc::new(Executable::Chain {
                definition,
                digest,
                executor: ChainExecutor::new(self.steps.clone()),
            }),
        ))
    }

    fn audit(&self, level: &str, event: &str, message: &str) {
        if let Some(root) = self.audit_root.as_deref() {
            append_registry_log(root, level, event, message);
        }
    }
}

fn diff_report(previous: &RegistrySnapshot, next: &RegistrySnapshot) -> ReloadReport {
    let before = previous.external_digests();
    let after = next.external_digests();
    let added = after
        .keys()
        .filter(|id| !before.contains_key(*id))
        .map(|id| id.to_string())
        .collect();
    let removed = before
        .keys()
        .filter(|id| !after.contains_key(*id))
        .map(|id| id.to_string())
        .collect();
    let changed = after
        .iter()
        .filter(|(id, digest)| before.get(*id).is_some_and(|old| old != *digest))
        .map(|(id, _)| id.to_string())
        .collect();
    ReloadReport {
        generation: next.generation,
        registered: next.len(),
        skipped: next.skipped.clone(),
        added,
        removed,
        changed,
    }
}
