//! Result store: the latest value of each pipeline slot plus search history
//! and the report theme.
//!
//! Writes happen under a single `tokio::sync::RwLock`; the last write wins per
//! slot. When a backend is attached, every write is mirrored to it best-effort
//! after the lock is released, and a prior snapshot is loaded on startup.

pub mod handlers;
pub mod history;
pub mod snapshot;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::models::{ActionableSummary, FilterConfirmation, Ingredient};
use crate::pipeline::normalizer::{applied_filters_to_vec, normalize, normalize_as};
use crate::pipeline::orchestrator::PipelineReport;
use crate::pipeline::outcome::StageResult;
use crate::pipeline::schema::{describe, SchemaKind};
use crate::report::theme::ReportTheme;

use history::{HistoryEntry, SearchKind};
use snapshot::{keys, KeyValueStore, StoreError, SNAPSHOT_VERSION};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Results {
    pub submitted_prompt: Option<String>,
    pub ingredients: StageResult<Vec<Ingredient>>,
    pub actionable_summary: StageResult<ActionableSummary>,
    pub applied_filters: StageResult<Vec<FilterConfirmation>>,
    /// Most recent first.
    pub history: VecDeque<HistoryEntry>,
    pub report_theme: ReportTheme,
}

/// Upper bound on one batch of backend reads or writes.
const BACKEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Default)]
pub struct ResultStore {
    inner: Arc<RwLock<Results>>,
    persist_order: Arc<Mutex<()>>,
    backend: Option<Arc<dyn KeyValueStore>>,
}

impl ResultStore {
    /// Empty store with no persistence.
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store mirrored to `backend`, seeded from whatever snapshot it holds.
    pub async fn load(backend: Arc<dyn KeyValueStore>) -> Self {
        let loaded = tokio::time::timeout(BACKEND_TIMEOUT, read_snapshot(backend.as_ref())).await;
        let results = match loaded {
            Ok(Ok(Some(results))) => {
                info!(
                    "Loaded persisted results ({} history entries)",
                    results.history.len()
                );
                results
            }
            Ok(Ok(None)) => Results::default(),
            Ok(Err(e)) => {
                warn!("Could not load persisted results, starting empty: {e}");
                Results::default()
            }
            Err(_) => {
                warn!(
                    "Loading persisted results timed out after {}s, starting empty",
                    BACKEND_TIMEOUT.as_secs()
                );
                Results::default()
            }
        };

        Self {
            inner: Arc::new(RwLock::new(results)),
            persist_order: Arc::default(),
            backend: Some(backend),
        }
    }

    pub async fn snapshot(&self) -> Results {
        self.inner.read().await.clone()
    }

    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.inner.read().await.history.iter().cloned().collect()
    }

    pub async fn theme(&self) -> ReportTheme {
        self.inner.read().await.report_theme
    }

    /// Validated ingredients from the latest discovery run, if any.
    pub async fn validated_ingredients(&self) -> Option<Vec<Ingredient>> {
        self.inner.read().await.ingredients.structured().cloned()
    }

    /// Writes every slot of a finished run and prepends a history entry.
    pub async fn record_pipeline(
        &self,
        prompt: &str,
        kind: SearchKind,
        report: &PipelineReport,
    ) -> HistoryEntry {
        let entry = HistoryEntry::from_report(prompt, kind, report);

        self.update(|results| {
            results.submitted_prompt = Some(prompt.to_string());
            results.ingredients = report.ingredients.clone();
            results.actionable_summary = report.actionable_summary.clone();
            results.applied_filters = report.applied_filters.clone();
            results.history.push_front(entry.clone());
            (
                (),
                &[
                    keys::SUBMITTED_PROMPT,
                    keys::INGREDIENT_FOUND,
                    keys::AI_RESPONSE,
                    keys::ACTIONABLE_SUMMARY,
                    keys::ACTIVE_FILTERS_INFO,
                    keys::SEARCH_HISTORY,
                ],
            )
        })
        .await;

        entry
    }

    pub async fn record_summary(&self, summary: StageResult<ActionableSummary>) {
        self.update(|results| {
            results.actionable_summary = summary;
            ((), &[keys::ACTIONABLE_SUMMARY])
        })
        .await
    }

    pub async fn record_filters(&self, filters: StageResult<Vec<FilterConfirmation>>) {
        self.update(|results| {
            results.applied_filters = filters;
            ((), &[keys::ACTIVE_FILTERS_INFO])
        })
        .await
    }

    /// Discards the current ingredient results. Other slots and history stay.
    pub async fn clear_ingredients(&self) {
        self.update(|results| {
            results.ingredients = StageResult::NotRun;
            ((), &[keys::INGREDIENT_FOUND, keys::AI_RESPONSE])
        })
        .await
    }

    pub async fn set_theme(&self, theme: ReportTheme) {
        self.update(|results| {
            results.report_theme = theme;
            ((), &[keys::REPORT_THEME])
        })
        .await
    }

    /// Runs the normalizer again over the raw text of every unparsed slot.
    /// Returns how many slots now hold a structured value.
    pub async fn reparse(&self) -> usize {
        self.update(|results| {
            let mut recovered = 0;

            if let Some(raw) = unparsed_raw(&results.ingredients) {
                if let Ok((value, _)) =
                    normalize_as::<Vec<Ingredient>>(&raw, describe(SchemaKind::IngredientList))
                {
                    results.ingredients = StageResult::Structured { value, raw };
                    recovered += 1;
                }
            }

            if let Some(raw) = unparsed_raw(&results.actionable_summary) {
                if let Ok((value, _)) = normalize_as::<ActionableSummary>(
                    &raw,
                    describe(SchemaKind::ActionableSummary),
                ) {
                    results.actionable_summary = StageResult::Structured { value, raw };
                    recovered += 1;
                }
            }

            if let Some(raw) = unparsed_raw(&results.applied_filters) {
                if let Ok(normalized) =
                    normalize(&raw, describe(SchemaKind::FilterConfirmationMap))
                {
                    results.applied_filters = StageResult::Structured {
                        value: applied_filters_to_vec(&normalized.value),
                        raw,
                    };
                    recovered += 1;
                }
            }

            if recovered == 0 {
                return (0, &[]);
            }
            info!("Reparse recovered {recovered} slot(s)");
            (
                recovered,
                &[
                    keys::INGREDIENT_FOUND,
                    keys::AI_RESPONSE,
                    keys::ACTIONABLE_SUMMARY,
                    keys::ACTIVE_FILTERS_INFO,
                ],
            )
        })
        .await
    }

    /// Applies `mutate` under the write lock, then mirrors the slots it names.
    ///
    /// The lock is released before any backend I/O, so readers never wait on
    /// the backend. `persist_order` keeps mirrored writes in mutation order.
    async fn update<R>(
        &self,
        mutate: impl FnOnce(&mut Results) -> (R, &'static [&'static str]),
    ) -> R {
        let _ordered = self.persist_order.lock().await;

        let (out, writes) = {
            let mut results = self.inner.write().await;
            let (out, slots) = mutate(&mut results);
            let writes = match &self.backend {
                Some(_) if !slots.is_empty() => encode_slots(&results, slots),
                _ => Vec::new(),
            };
            (out, writes)
        };

        if let Some(backend) = &self.backend {
            if !writes.is_empty() {
                persist(backend.as_ref(), writes).await;
            }
        }
        out
    }
}

type SlotWrite = (&'static str, Result<Option<String>, StoreError>);

fn encode_slots(results: &Results, slots: &[&'static str]) -> Vec<SlotWrite> {
    slots
        .iter()
        .chain(std::iter::once(&keys::SNAPSHOT_VERSION))
        .map(|&key| (key, encode_slot(results, key)))
        .collect()
}

/// Mirrors encoded slots to the backend. Failures are logged, never returned.
async fn persist(backend: &dyn KeyValueStore, writes: Vec<SlotWrite>) {
    let apply = async {
        for (key, encoded) in writes {
            let outcome = match encoded {
                Ok(Some(json)) => backend.set(key, json).await,
                Ok(None) => backend.remove(key).await,
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                warn!("Failed to persist {key}: {e}");
            }
        }
    };

    if tokio::time::timeout(BACKEND_TIMEOUT, apply).await.is_err() {
        warn!(
            "Persisting results timed out after {}s",
            BACKEND_TIMEOUT.as_secs()
        );
    }
}

fn unparsed_raw<T>(slot: &StageResult<T>) -> Option<String> {
    match slot {
        StageResult::Unparsed { raw, .. } => Some(raw.clone()),
        _ => None,
    }
}

/// JSON for one persisted key, or `None` when the slot holds no value.
fn encode_slot(results: &Results, key: &str) -> Result<Option<String>, StoreError> {
    fn stage<T: Serialize>(slot: &StageResult<T>) -> Result<Option<String>, StoreError> {
        match slot {
            StageResult::NotRun => Ok(None),
            other => Ok(Some(serde_json::to_string(other)?)),
        }
    }

    match key {
        keys::SUBMITTED_PROMPT => Ok(results
            .submitted_prompt
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?),
        keys::INGREDIENT_FOUND => Ok(results
            .ingredients
            .structured()
            .map(serde_json::to_string)
            .transpose()?),
        keys::AI_RESPONSE => stage(&results.ingredients),
        keys::ACTIONABLE_SUMMARY => stage(&results.actionable_summary),
        keys::ACTIVE_FILTERS_INFO => stage(&results.applied_filters),
        keys::SEARCH_HISTORY => Ok(Some(serde_json::to_string(&results.history)?)),
        keys::REPORT_THEME => Ok(Some(serde_json::to_string(&results.report_theme)?)),
        keys::SNAPSHOT_VERSION => Ok(Some(SNAPSHOT_VERSION.to_string())),
        _ => Ok(None),
    }
}

async fn read_snapshot(backend: &dyn KeyValueStore) -> Result<Option<Results>, StoreError> {
    let version = backend.get(keys::SNAPSHOT_VERSION).await?;
    match version.as_deref().map(str::parse::<u32>) {
        None => return Ok(None),
        Some(Ok(v)) if v == SNAPSHOT_VERSION => {}
        _ => {
            warn!(
                "Ignoring persisted snapshot with version {:?} (expected {SNAPSHOT_VERSION})",
                version
            );
            return Ok(None);
        }
    }

    let ingredients = match read_slot(backend, keys::AI_RESPONSE).await? {
        Some(stage) => stage,
        // Only the validated list survived; its JSON stands in for the raw text
        None => match backend.get(keys::INGREDIENT_FOUND).await? {
            Some(json) => match serde_json::from_str::<Vec<Ingredient>>(&json) {
                Ok(value) => StageResult::Structured { value, raw: json },
                Err(e) => {
                    warn!("Discarding corrupt persisted {}: {e}", keys::INGREDIENT_FOUND);
                    StageResult::NotRun
                }
            },
            None => StageResult::NotRun,
        },
    };

    Ok(Some(Results {
        submitted_prompt: read_slot(backend, keys::SUBMITTED_PROMPT).await?,
        ingredients,
        actionable_summary: read_slot(backend, keys::ACTIONABLE_SUMMARY)
            .await?
            .unwrap_or_default(),
        applied_filters: read_slot(backend, keys::ACTIVE_FILTERS_INFO)
            .await?
            .unwrap_or_default(),
        history: read_slot(backend, keys::SEARCH_HISTORY)
            .await?
            .unwrap_or_default(),
        report_theme: read_slot(backend, keys::REPORT_THEME)
            .await?
            .unwrap_or_default(),
    }))
}

/// A corrupt value is treated as absent.
async fn read_slot<T: DeserializeOwned>(
    backend: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    let Some(json) = backend.get(key).await? else {
        return Ok(None);
    };
    match serde_json::from_str(&json) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!("Discarding corrupt persisted {key}: {e}");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::snapshot::MemoryStore;
    use super::*;

    /// Backend whose writes hang far longer than any request should wait.
    #[derive(Default)]
    struct StalledStore {
        write_started: Notify,
    }

    #[async_trait]
    impl KeyValueStore for StalledStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }

        async fn set(&self, _key: &str, _value: String) -> Result<(), StoreError> {
            self.write_started.notify_one();
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }

        async fn remove(&self, _key: &str) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn niacinamide() -> Ingredient {
        Ingredient {
            name: "Niacinamide".to_string(),
            function: "Brightening".to_string(),
            clinical_studies: None,
            market_trend_analysis: Some("Trending".to_string()),
        }
    }

    fn report() -> PipelineReport {
        PipelineReport::new(
            StageResult::Structured {
                value: vec![niacinamide()],
                raw: "```json\n[...]\n```".to_string(),
            },
            StageResult::Structured {
                value: ActionableSummary {
                    selling_points: vec!["Glow".to_string()],
                    ..Default::default()
                },
                raw: "{}".to_string(),
            },
            StageResult::NotRun,
        )
    }

    #[tokio::test]
    async fn test_history_is_most_recent_first() {
        let store = ResultStore::new();
        store
            .record_pipeline("first", SearchKind::Finder, &report())
            .await;
        store
            .record_pipeline("second", SearchKind::DeepSearch, &report())
            .await;

        let history = store.history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].prompt, "second");
        assert_eq!(history[1].prompt, "first");
        assert_eq!(
            store.snapshot().await.submitted_prompt.as_deref(),
            Some("second")
        );
    }

    #[tokio::test]
    async fn test_clear_ingredients_resets_only_that_slot() {
        let store = ResultStore::new();
        store
            .record_pipeline("serum", SearchKind::Finder, &report())
            .await;

        store.clear_ingredients().await;

        let results = store.snapshot().await;
        assert_eq!(results.ingredients, StageResult::NotRun);
        assert!(results.actionable_summary.is_structured());
        assert_eq!(results.history.len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_round_trips_through_backend() {
        let backend: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::default());
        let store = ResultStore::load(backend.clone()).await;
        store
            .record_pipeline("serum", SearchKind::Finder, &report())
            .await;
        store.set_theme(ReportTheme::Green).await;

        let reloaded = ResultStore::load(backend.clone()).await.snapshot().await;
        assert_eq!(reloaded, store.snapshot().await);
        assert_eq!(reloaded.report_theme, ReportTheme::Green);
        assert_eq!(
            backend.get(keys::SNAPSHOT_VERSION).await.unwrap(),
            Some(SNAPSHOT_VERSION.to_string())
        );
        assert_eq!(reloaded.history[0].response, report());
    }

    #[tokio::test]
    async fn test_version_mismatch_yields_empty_store() {
        let backend: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::default());
        backend
            .set(keys::SNAPSHOT_VERSION, "0".to_string())
            .await
            .unwrap();
        backend
            .set(keys::SUBMITTED_PROMPT, "\"old\"".to_string())
            .await
            .unwrap();

        let results = ResultStore::load(backend).await.snapshot().await;
        assert_eq!(results, Results::default());
    }

    #[tokio::test]
    async fn test_validated_list_alone_is_restored_as_structured() {
        let backend: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::default());
        let list = serde_json::to_string(&vec![niacinamide()]).unwrap();
        backend
            .set(keys::SNAPSHOT_VERSION, SNAPSHOT_VERSION.to_string())
            .await
            .unwrap();
        backend
            .set(keys::INGREDIENT_FOUND, list.clone())
            .await
            .unwrap();
        backend
            .set(keys::SEARCH_HISTORY, "not json".to_string())
            .await
            .unwrap();

        let results = ResultStore::load(backend).await.snapshot().await;
        assert_eq!(results.ingredients.structured(), Some(&vec![niacinamide()]));
        assert_eq!(results.ingredients.raw(), Some(list.as_str()));
        assert!(results.history.is_empty());
    }

    #[tokio::test]
    async fn test_clear_removes_persisted_ingredient_keys() {
        let backend: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::default());
        let store = ResultStore::load(backend.clone()).await;
        store
            .record_pipeline("serum", SearchKind::Finder, &report())
            .await;
        assert!(backend.get(keys::INGREDIENT_FOUND).await.unwrap().is_some());

        store.clear_ingredients().await;

        assert_eq!(backend.get(keys::INGREDIENT_FOUND).await.unwrap(), None);
        assert_eq!(backend.get(keys::AI_RESPONSE).await.unwrap(), None);
        assert!(backend.get(keys::SEARCH_HISTORY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reparse_recovers_parseable_raw_text() {
        let store = ResultStore::new();
        store
            .record_pipeline(
                "serum",
                SearchKind::Finder,
                &PipelineReport::new(
                    StageResult::Unparsed {
                        raw: "```json\n[{\"name\":\"Retinol\",\"function\":\"Renewal\"}]\n```"
                            .to_string(),
                        reason: "stale".to_string(),
                    },
                    StageResult::Unparsed {
                        raw: "still not json".to_string(),
                        reason: "bad".to_string(),
                    },
                    StageResult::NotRun,
                ),
            )
            .await;

        assert_eq!(store.reparse().await, 1);

        let results = store.snapshot().await;
        assert_eq!(results.ingredients.structured().unwrap()[0].name, "Retinol");
        assert_eq!(results.actionable_summary.state_name(), "unparsed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_do_not_wait_on_a_stalled_backend() {
        let backend = Arc::new(StalledStore::default());
        let store = ResultStore::load(backend.clone()).await;

        let writer = tokio::spawn({
            let store = store.clone();
            async move { store.set_theme(ReportTheme::Green).await }
        });
        backend.write_started.notified().await;

        let theme = tokio::time::timeout(Duration::from_secs(2), store.theme())
            .await
            .expect("read blocked behind backend write");
        assert_eq!(theme, ReportTheme::Green);

        tokio::time::timeout(Duration::from_secs(10), writer)
            .await
            .expect("backend write was not bounded")
            .unwrap();
    }
}
