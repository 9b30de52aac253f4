use crate::config::{ConfigError, ConfigStore, FallbackConfig, ManifestRow, RoutingConfig};
use crate::orchestration::error::WorkflowError;
use crate::orchestration::manifest::Manifest;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

pub const TASK_INDEX_SERVICE: &str = "task index";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{reason}")]
pub struct IndexError {
    pub reason: String,
}

impl IndexError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredManifest {
    pub manifest: Manifest,
    /// Higher is a better match.
    pub score: f32,
}

/// External similarity search over task manifests. Results are ranked best
/// first.
pub trait TaskIndex: Send + Sync {
    fn search(&self, prompt: &str) -> Result<Vec<ScoredManifest>, IndexError>;

    /// Re-reads manifests after the catalog changed. Indexes that query their
    /// backing store live have nothing to do.
    fn refresh(&self, _store: &dyn ConfigStore) -> Result<(), ConfigError> {
        Ok(())
    }
}

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "be", "can", "could", "do", "does", "for", "from", "have", "how",
    "i", "im", "in", "is", "it", "me", "my", "need", "of", "on", "or", "our", "please", "some",
    "that", "the", "this", "to", "want", "we", "what", "with", "would", "you", "your",
];

fn tokenize(input: &str) -> Vec<String> {
    input
        .to_ascii_lowercase()
        .replace('\'', "")
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty() && !STOP_WORDS.contains(token))
        .map(str::to_string)
        .collect()
}

type TermCounts = HashMap<String, usize>;

fn term_counts(tokens: Vec<String>) -> TermCounts {
    let mut counts = TermCounts::new();
    for token in tokens {
        *counts.entry(token).or_default() += 1;
    }
    counts
}

fn cosine(query: &TermCounts, doc: &TermCounts) -> f32 {
    if query.is_empty() || doc.is_empty() {
        return 0.0;
    }
    let dot = query
        .iter()
        .map(|(term, count)| (*count * doc.get(term).copied().unwrap_or(0)) as f32)
        .sum::<f32>();
    let norm = |counts: &TermCounts| {
        counts
            .values()
            .map(|count| (*count * *count) as f32)
            .sum::<f32>()
            .sqrt()
    };
    dot / (norm(query) * norm(doc))
}

#[derive(Debug)]
struct IndexedTask {
    manifest: Manifest,
    documents: Vec<TermCounts>,
}

/// In-process index scoring prompts against each manifest's phrase examples
/// and task id by term-frequency cosine similarity.
#[derive(Debug, Default)]
pub struct LexicalTaskIndex {
    tasks: RwLock<Arc<Vec<IndexedTask>>>,
}

impl LexicalTaskIndex {
    pub fn from_rows(rows: &[ManifestRow]) -> Self {
        Self {
            tasks: RwLock::new(Arc::new(index_rows(rows))),
        }
    }

    pub fn from_store(store: &dyn ConfigStore) -> Result<Self, ConfigError> {
        Ok(Self::from_rows(&store.manifest_rows()?))
    }

    /// Re-reads manifests from `store`; the previous index stays in place if
    /// the store cannot be read.
    pub fn rebuild_from(&self, store: &dyn ConfigStore) -> Result<usize, ConfigError> {
        let tasks = index_rows(&store.manifest_rows()?);
        let count = tasks.len();
        *self
            .tasks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(tasks);
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.current().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current().is_empty()
    }

    fn current(&self) -> Arc<Vec<IndexedTask>> {
        self.tasks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

fn index_rows(rows: &[ManifestRow]) -> Vec<IndexedTask> {
    let mut seen = HashSet::new();
    rows.iter()
        .filter(|row| row.enabled)
        .filter_map(|row| {
            if !seen.insert(row.task_id.as_str().to_string()) {
                tracing::warn!(task_id = %row.task_id, "duplicate task id; keeping the first row");
                return None;
            }
            let manifest = match row.to_manifest() {
                Ok(manifest) => manifest,
                Err(err) => {
                    tracing::warn!(task_id = %row.task_id, error = %err, "skipping task manifest");
                    return None;
                }
            };
            let documents = row
                .phrase_examples
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(row.task_id.as_str()))
                .map(|text| term_counts(tokenize(text)))
                .filter(|counts| !counts.is_empty())
                .collect();
            Some(IndexedTask {
                manifest,
                documents,
            })
        })
        .collect()
}

impl TaskIndex for LexicalTaskIndex {
    fn search(&self, prompt: &str) -> Result<Vec<ScoredManifest>, IndexError> {
        let query = term_counts(tokenize(prompt));
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let tasks = self.current();
        let mut scored = tasks
            .iter()
            .filter_map(|task| {
                let score = task
                    .documents
                    .iter()
                    .map(|doc| cosine(&query, doc))
                    .fold(0.0_f32, f32::max);
                (score > 0.0).then(|| ScoredManifest {
                    manifest: task.manifest.clone(),
                    score,
                })
            })
            .collect::<Vec<_>>();
        // Stable sort: ties keep catalog order.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(scored)
    }

    fn refresh(&self, store: &dyn ConfigStore) -> Result<(), ConfigError> {
        let count = self.rebuild_from(store)?;
        tracing::debug!(tasks = count, "task index rebuilt");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub manifest: Manifest,
    /// Best candidate's score, if the index returned any.
    pub score: Option<f32>,
    pub matched: bool,
}

pub struct IntentResolver {
    index: Arc<dyn TaskIndex>,
    min_similarity: f32,
    fallback: Manifest,
}

impl std::fmt::Debug for IntentResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentResolver")
            .field("min_similarity", &self.min_similarity)
            .field("fallback", &self.fallback.task_id)
            .finish()
    }
}

impl IntentResolver {
    pub fn new(
        index: Arc<dyn TaskIndex>,
        routing: &RoutingConfig,
        fallback: &FallbackConfig,
    ) -> Result<Self, WorkflowError> {
        let fallback = Manifest::fallback(fallback).map_err(WorkflowError::Config)?;
        Ok(Self {
            index,
            min_similarity: routing.min_similarity,
            fallback,
        })
    }

    pub fn fallback(&self) -> &Manifest {
        &self.fallback
    }

    pub fn refresh_index(&self, store: &dyn ConfigStore) -> Result<(), ConfigError> {
        self.index.refresh(store)
    }

    pub fn resolve(&self, prompt: &str) -> Result<Resolution, WorkflowError> {
        let candidates =
            self.index
                .search(prompt)
                .map_err(|err| WorkflowError::UpstreamUnavailable {
                    service: TASK_INDEX_SERVICE.to_string(),
                    reason: err.reason,
                })?;

        match candidates.into_iter().next() {
            Some(best) if best.score >= self.min_similarity => {
                tracing::debug!(
                    task_id = %best.manifest.task_id,
                    score = best.score,
                    "intent matched"
                );
                Ok(Resolution {
                    manifest: best.manifest,
                    score: Some(best.score),
                    matched: true,
                })
            }
            best => {
                let score = best.map(|candidate| candidate.score);
                tracing::debug!(
                    score = ?score,
                    threshold = self.min_similarity,
                    fallback = %self.fallback.task_id,
                    "no task cleared the similarity threshold"
                );
                Ok(Resolution {
                    manifest: self.fallback.clone(),
                    score,
                    matched: false,
                })
            }
        }
    }
}
