//! Pipeline orchestrator: sequences completion calls where later stages
//! consume earlier validated results.
//!
//! Flow: ingredient discovery ∥ filter confirmation → actionable summary.
//!
//! Discovery and filter confirmation share no data, so they are issued
//! together and joined. The summary only runs once discovery has produced at
//! least one validated ingredient, and it receives that list serialized, never
//! the raw completion text. A failed stage never discards another stage's result.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::llm_client::{CompletionError, CompletionService};
use crate::models::{ActionableSummary, FilterConfirmation, Ingredient};
use crate::pipeline::normalizer::{applied_filters_to_vec, normalize, NormalizeError};
use crate::pipeline::outcome::{StageError, StageOutput, StageResult};
use crate::pipeline::prompts::{PromptKind, PromptRequest};
use crate::pipeline::schema::{describe, SchemaDescriptor};

/// Base delay for exponential backoff between retries: 1s, 2s, 4s...
const RETRY_BASE_DELAY_MS: u64 = 1000;
/// Backoff never grows past this, however many retries are configured.
const MAX_RETRY_DELAY_MS: u64 = 30_000;

// ────────────────────────────────────────────────────────────────────────────
// Settings and request types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub discovery_max_tokens: u32,
    pub summary_max_tokens: u32,
    pub filter_max_tokens: u32,
    /// Upper bound on a single completion call, retries excluded.
    pub call_timeout: Duration,
    pub max_retries: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            discovery_max_tokens: 500,
            summary_max_tokens: 500,
            filter_max_tokens: 500,
            call_timeout: Duration::from_secs(90),
            max_retries: 2,
        }
    }
}

/// A discovery run: the request text plus the filters the user switched on.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryRequest {
    pub prompt: String,
    pub filters: Vec<String>,
}

impl DiscoveryRequest {
    pub fn new(prompt: impl Into<String>, filters: Vec<String>) -> Self {
        Self {
            prompt: prompt.into(),
            filters: active_filters(filters),
        }
    }
}

/// Drops blank and duplicate filter names, keeping first-seen order.
pub fn active_filters(filters: Vec<String>) -> Vec<String> {
    let mut active: Vec<String> = Vec::new();
    for filter in filters {
        let filter = filter.trim().to_string();
        if !filter.is_empty() && !active.contains(&filter) {
            active.push(filter);
        }
    }
    active
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PipelineStatus {
    /// Every stage that ran produced a structured value.
    Complete,
    /// At least one stage failed after another succeeded.
    PartialFailure,
    /// No stage produced a structured value.
    Failed,
}

/// Everything one pipeline run produced, stage by stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub status: PipelineStatus,
    pub ingredients: StageResult<Vec<Ingredient>>,
    pub actionable_summary: StageResult<ActionableSummary>,
    pub applied_filters: StageResult<Vec<FilterConfirmation>>,
}

impl PipelineReport {
    pub fn new(
        ingredients: StageResult<Vec<Ingredient>>,
        actionable_summary: StageResult<ActionableSummary>,
        applied_filters: StageResult<Vec<FilterConfirmation>>,
    ) -> Self {
        let any_success = ingredients.is_structured()
            || actionable_summary.is_structured()
            || applied_filters.is_structured();
        let any_failure = ingredients.is_failure()
            || actionable_summary.is_failure()
            || applied_filters.is_failure();

        let status = match (any_success, any_failure) {
            (true, true) => PipelineStatus::PartialFailure,
            (true, false) => PipelineStatus::Complete,
            (false, _) => PipelineStatus::Failed,
        };

        Self {
            status,
            ingredients,
            actionable_summary,
            applied_filters,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Per-invocation state machine
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagePhase {
    Idle,
    Building,
    AwaitingCompletion,
    Normalizing,
    Succeeded,
    Failed,
}

impl StagePhase {
    pub fn can_advance_to(self, next: StagePhase) -> bool {
        use StagePhase::*;
        matches!(
            (self, next),
            (Idle, Building)
                | (Building, AwaitingCompletion)
                | (AwaitingCompletion, Normalizing)
                | (AwaitingCompletion, Failed)
                | (Normalizing, Succeeded)
                | (Normalizing, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, StagePhase::Succeeded | StagePhase::Failed)
    }
}

/// Tracks one stage invocation through its phases. A fresh tracker is made
/// per call, so a failed invocation leaves nothing behind.
#[derive(Debug)]
pub struct StageTracker {
    stage: &'static str,
    phase: StagePhase,
    transitions: Vec<StagePhase>,
}

impl StageTracker {
    pub fn new(stage: &'static str) -> Self {
        Self {
            stage,
            phase: StagePhase::Idle,
            transitions: vec![StagePhase::Idle],
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> StagePhase {
        self.phase
    }

    pub fn transitions(&self) -> &[StagePhase] {
        &self.transitions
    }

    pub fn advance(&mut self, next: StagePhase) {
        if !self.phase.can_advance_to(next) {
            warn!(
                "Stage {}: unexpected transition {:?} -> {:?}",
                self.stage, self.phase, next
            );
        }
        debug!("Stage {}: {:?} -> {:?}", self.stage, self.phase, next);
        self.phase = next;
        self.transitions.push(next);
        if next.is_terminal() {
            debug!("Stage {} finished: {:?}", self.stage, self.transitions());
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Orchestrator {
    llm: Arc<dyn CompletionService>,
    settings: PipelineSettings,
}

impl Orchestrator {
    pub fn new(llm: Arc<dyn CompletionService>, settings: PipelineSettings) -> Self {
        Self { llm, settings }
    }

    /// Runs the full chain and reports every stage, including partial success.
    pub async fn run(&self, request: &DiscoveryRequest) -> PipelineReport {
        info!(
            "Pipeline started ({} active filter(s))",
            request.filters.len()
        );

        let filters = async {
            if request.filters.is_empty() {
                StageResult::NotRun
            } else {
                StageResult::from_stage(
                    self.run_filter_confirmation(&request.filters, &request.prompt)
                        .await,
                )
            }
        };

        let (discovery, applied_filters) =
            tokio::join!(self.run_ingredient_discovery(request), filters);
        let ingredients = StageResult::from_stage(discovery);

        let actionable_summary = match ingredients.structured() {
            Some(list) if !list.is_empty() => {
                StageResult::from_stage(self.run_actionable_summary(list).await)
            }
            Some(_) => StageResult::skipped("ingredient discovery returned no ingredients"),
            None => StageResult::skipped(
                "ingredient discovery did not produce validated ingredients",
            ),
        };

        let report = PipelineReport::new(ingredients, actionable_summary, applied_filters);
        info!(
            "Pipeline finished: status={:?} ingredients={} summary={} filters={}",
            report.status,
            report.ingredients.state_name(),
            report.actionable_summary.state_name(),
            report.applied_filters.state_name()
        );
        report
    }

    /// Stage 1: suggests ingredients for the request.
    pub async fn run_ingredient_discovery(
        &self,
        request: &DiscoveryRequest,
    ) -> Result<StageOutput<Vec<Ingredient>>, StageError> {
        let kind = PromptKind::IngredientDiscovery {
            request: &request.prompt,
            filters: &request.filters,
        };
        self.run_stage(
            "ingredient_discovery",
            &kind,
            self.settings.discovery_max_tokens,
            |value| serde_json::from_value(value).map_err(|e| e.to_string()),
        )
        .await
    }

    /// Stage 2: summarizes a validated ingredient batch into actionable insights.
    pub async fn run_actionable_summary(
        &self,
        ingredients: &[Ingredient],
    ) -> Result<StageOutput<ActionableSummary>, StageError> {
        let analysis = serde_json::to_string_pretty(ingredients)?;
        let kind = PromptKind::ActionableSummary {
            analysis: &analysis,
        };
        self.run_stage(
            "actionable_summary",
            &kind,
            self.settings.summary_max_tokens,
            |value| serde_json::from_value(value).map_err(|e| e.to_string()),
        )
        .await
    }

    /// Confirms each active filter against the ingredients suggested for `request`.
    pub async fn run_filter_confirmation(
        &self,
        filters: &[String],
        request: &str,
    ) -> Result<StageOutput<Vec<FilterConfirmation>>, StageError> {
        let kind = PromptKind::FilterConfirmation { filters, request };
        self.run_stage(
            "filter_confirmation",
            &kind,
            self.settings.filter_max_tokens,
            |value| Ok(applied_filters_to_vec(&value)),
        )
        .await
    }

    async fn run_stage<T>(
        &self,
        stage: &'static str,
        kind: &PromptKind<'_>,
        max_tokens: u32,
        convert: impl FnOnce(Value) -> Result<T, String>,
    ) -> Result<StageOutput<T>, StageError> {
        let mut tracker = StageTracker::new(stage);

        tracker.advance(StagePhase::Building);
        let request = PromptRequest::new(kind);
        let schema = describe(request.expected_schema);

        tracker.advance(StagePhase::AwaitingCompletion);
        let raw = match self
            .complete_with_retry(stage, &request.prompt_text, max_tokens, schema)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracker.advance(StagePhase::Failed);
                warn!("Stage {stage} failed upstream: {e}");
                return Err(e.into());
            }
        };

        tracker.advance(StagePhase::Normalizing);
        let typed = normalize(&raw, schema).and_then(|normalized| {
            convert(normalized.value).map_err(|detail| NormalizeError::Shape {
                schema: schema.kind.as_str(),
                detail,
                raw: raw.clone(),
            })
        });

        match typed {
            Ok(value) => {
                tracker.advance(StagePhase::Succeeded);
                Ok(StageOutput { value, raw })
            }
            Err(e) => {
                tracker.advance(StagePhase::Failed);
                Err(e.into())
            }
        }
    }

    /// Calls the completion service, retrying retryable failures with
    /// exponential backoff. Each attempt is bounded by `call_timeout`.
    async fn complete_with_retry(
        &self,
        stage: &'static str,
        prompt: &str,
        max_tokens: u32,
        schema: &SchemaDescriptor,
    ) -> Result<String, CompletionError> {
        let mut attempt = 0;
        loop {
            let result = tokio::time::timeout(
                self.settings.call_timeout,
                self.llm.complete(prompt, schema, max_tokens),
            )
            .await
            .unwrap_or_else(|_| {
                Err(CompletionError::Unavailable(format!(
                    "no response within {}s",
                    self.settings.call_timeout.as_secs()
                )))
            });

            match result {
                Err(e) if e.is_retryable() && attempt < self.settings.max_retries => {
                    attempt += 1;
                    let delay = retry_delay(attempt);
                    warn!(
                        "Stage {stage} attempt {attempt} failed ({e}), retrying after {}ms...",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

/// Delay before retry number `attempt` (1-based).
fn retry_delay(attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    Duration::from_millis((RETRY_BASE_DELAY_MS << shift).min(MAX_RETRY_DELAY_MS))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pipeline::schema::SchemaKind;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// Scripted completion backend: replies are queued per schema kind and
    /// every call is recorded.
    #[derive(Default)]
    pub(crate) struct ScriptedCompletions {
        replies: Mutex<HashMap<SchemaKind, VecDeque<Result<String, CompletionError>>>>,
        calls: Mutex<Vec<(SchemaKind, String)>>,
    }

    impl ScriptedCompletions {
        pub(crate) fn reply(self, kind: SchemaKind, text: &str) -> Self {
            self.push(kind, Ok(text.to_string()))
        }

        pub(crate) fn fail(self, kind: SchemaKind, error: CompletionError) -> Self {
            self.push(kind, Err(error))
        }

        fn push(self, kind: SchemaKind, reply: Result<String, CompletionError>) -> Self {
            self.replies
                .lock()
                .unwrap()
                .entry(kind)
                .or_default()
                .push_back(reply);
            self
        }

        pub(crate) fn calls_for(&self, kind: SchemaKind) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(k, _)| *k == kind)
                .map(|(_, prompt)| prompt.clone())
                .collect()
        }
    }

    #[async_trait]
    impl CompletionService for ScriptedCompletions {
        async fn complete(
            &self,
            prompt: &str,
            schema: &SchemaDescriptor,
            _max_output_tokens: u32,
        ) -> Result<String, CompletionError> {
            self.calls
                .lock()
                .unwrap()
                .push((schema.kind, prompt.to_string()));
            self.replies
                .lock()
                .unwrap()
                .get_mut(&schema.kind)
                .and_then(|queue| queue.pop_front())
                .unwrap_or_else(|| {
                    Err(CompletionError::Unavailable(format!(
                        "no scripted reply for {}",
                        schema.kind.as_str()
                    )))
                })
        }
    }

    pub(crate) const INGREDIENTS: &str = "```json\n[{\"name\":\"Niacinamide\",\"function\":\"Brightening\",\"clinicalStudies\":\"N/A\",\"marketTrendAnalysis\":\"Trending on TikTok\"}]\n```";
    pub(crate) const SUMMARY: &str = r#"{"sellingPoints":["Visible brightening"],"marketOpportunities":["Glass skin trend"],"nextSteps":["Stability test"]}"#;
    pub(crate) const FILTERS: &str = r#"{"appliedFilters":{"vegan":{"status":true,"explanation":"All suggested ingredients satisfy this filter."}}}"#;

    fn no_retry() -> PipelineSettings {
        PipelineSettings {
            max_retries: 0,
            ..Default::default()
        }
    }

    fn orchestrator(
        scripted: ScriptedCompletions,
        settings: PipelineSettings,
    ) -> (Orchestrator, Arc<ScriptedCompletions>) {
        let scripted = Arc::new(scripted);
        (Orchestrator::new(scripted.clone(), settings), scripted)
    }

    fn request(filters: &[&str]) -> DiscoveryRequest {
        DiscoveryRequest::new(
            "Suggest 1 key ingredients for a water-based skin product.",
            filters.iter().map(|f| f.to_string()).collect(),
        )
    }

    #[tokio::test]
    async fn test_full_chain_produces_all_three_slots() {
        let (orchestrator, scripted) = orchestrator(
            ScriptedCompletions::default()
                .reply(SchemaKind::IngredientList, INGREDIENTS)
                .reply(SchemaKind::ActionableSummary, SUMMARY)
                .reply(SchemaKind::FilterConfirmationMap, FILTERS),
            no_retry(),
        );

        let report = orchestrator.run(&request(&["vegan"])).await;

        assert_eq!(report.status, PipelineStatus::Complete);
        let ingredients = report.ingredients.structured().unwrap();
        assert_eq!(ingredients[0].name, "Niacinamide");
        assert_eq!(report.ingredients.raw(), Some(INGREDIENTS));

        let summary = report.actionable_summary.structured().unwrap();
        assert!(summary.cautions.is_empty());
        assert_eq!(summary.selling_points, vec!["Visible brightening"]);

        let filters = report.applied_filters.structured().unwrap();
        assert_eq!(filters[0].name, "vegan");
        assert_eq!(filters[0].status, Some(true));

        // Stage 2 receives stage 1's own validated output
        let summary_prompts = scripted.calls_for(SchemaKind::ActionableSummary);
        assert_eq!(summary_prompts.len(), 1);
        assert!(summary_prompts[0].contains("\"name\": \"Niacinamide\""));
        assert!(!summary_prompts[0].contains("```"));
    }

    #[tokio::test]
    async fn test_stage_one_rejection_never_invokes_summary() {
        let (orchestrator, scripted) = orchestrator(
            ScriptedCompletions::default().fail(
                SchemaKind::IngredientList,
                CompletionError::Rejected {
                    status: 401,
                    message: "Invalid API key".to_string(),
                },
            ),
            no_retry(),
        );

        let report = orchestrator.run(&request(&[])).await;

        assert_eq!(report.status, PipelineStatus::Failed);
        assert!(matches!(report.ingredients, StageResult::Failed { .. }));
        assert!(matches!(
            report.actionable_summary,
            StageResult::Skipped { .. }
        ));
        assert!(scripted.calls_for(SchemaKind::ActionableSummary).is_empty());
        assert_eq!(report.applied_filters, StageResult::NotRun);
    }

    #[tokio::test]
    async fn test_unparseable_discovery_skips_summary_and_keeps_raw() {
        let raw = "Here are great ingredients: Niacinamide and Retinol.";
        let (orchestrator, scripted) = orchestrator(
            ScriptedCompletions::default().reply(SchemaKind::IngredientList, raw),
            no_retry(),
        );

        let report = orchestrator.run(&request(&[])).await;

        assert_eq!(report.ingredients.state_name(), "unparsed");
        assert_eq!(report.ingredients.raw(), Some(raw));
        assert!(scripted.calls_for(SchemaKind::ActionableSummary).is_empty());
    }

    #[tokio::test]
    async fn test_empty_discovery_skips_summary() {
        let (orchestrator, scripted) = orchestrator(
            ScriptedCompletions::default().reply(SchemaKind::IngredientList, "[]"),
            no_retry(),
        );

        let report = orchestrator.run(&request(&[])).await;

        assert_eq!(report.ingredients.structured(), Some(&vec![]));
        assert!(matches!(
            report.actionable_summary,
            StageResult::Skipped { .. }
        ));
        assert!(scripted.calls_for(SchemaKind::ActionableSummary).is_empty());
    }

    #[tokio::test]
    async fn test_filter_failure_keeps_discovery_result() {
        let (orchestrator, _) = orchestrator(
            ScriptedCompletions::default()
                .reply(SchemaKind::IngredientList, INGREDIENTS)
                .reply(SchemaKind::ActionableSummary, SUMMARY)
                .fail(
                    SchemaKind::FilterConfirmationMap,
                    CompletionError::Unavailable("connection reset".to_string()),
                ),
            no_retry(),
        );

        let report = orchestrator.run(&request(&["vegan"])).await;

        assert_eq!(report.status, PipelineStatus::PartialFailure);
        assert!(report.ingredients.is_structured());
        assert!(report.actionable_summary.is_structured());
        assert!(matches!(
            report.applied_filters,
            StageResult::Failed { ref code, .. } if code == "UPSTREAM_UNAVAILABLE"
        ));
    }

    #[tokio::test]
    async fn test_summary_failure_keeps_discovery_result() {
        let (orchestrator, _) = orchestrator(
            ScriptedCompletions::default()
                .reply(SchemaKind::IngredientList, INGREDIENTS)
                .reply(SchemaKind::ActionableSummary, "{\"sellingPoints\": ["),
            no_retry(),
        );

        let report = orchestrator.run(&request(&[])).await;

        assert_eq!(report.status, PipelineStatus::PartialFailure);
        assert!(report.ingredients.is_structured());
        assert_eq!(report.actionable_summary.state_name(), "unparsed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failure_is_retried_then_succeeds() {
        let (orchestrator, scripted) = orchestrator(
            ScriptedCompletions::default()
                .fail(
                    SchemaKind::IngredientList,
                    CompletionError::Rejected {
                        status: 429,
                        message: "rate limited".to_string(),
                    },
                )
                .reply(SchemaKind::IngredientList, INGREDIENTS),
            PipelineSettings::default(),
        );

        let output = orchestrator
            .run_ingredient_discovery(&request(&[]))
            .await
            .unwrap();

        assert_eq!(output.value.len(), 1);
        assert_eq!(scripted.calls_for(SchemaKind::IngredientList).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_failure_is_not_retried() {
        let (orchestrator, scripted) = orchestrator(
            ScriptedCompletions::default().fail(
                SchemaKind::IngredientList,
                CompletionError::Rejected {
                    status: 400,
                    message: "bad request".to_string(),
                },
            ),
            PipelineSettings::default(),
        );

        let err = orchestrator
            .run_ingredient_discovery(&request(&[]))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "UPSTREAM_REJECTED");
        assert_eq!(scripted.calls_for(SchemaKind::IngredientList).len(), 1);
    }

    struct HangingCompletions;

    #[async_trait]
    impl CompletionService for HangingCompletions {
        async fn complete(
            &self,
            _prompt: &str,
            _schema: &SchemaDescriptor,
            _max_output_tokens: u32,
        ) -> Result<String, CompletionError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_upstream_times_out_as_unavailable() {
        let orchestrator = Orchestrator::new(
            Arc::new(HangingCompletions),
            PipelineSettings {
                call_timeout: Duration::from_secs(5),
                ..no_retry()
            },
        );

        let err = orchestrator
            .run_ingredient_discovery(&request(&[]))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "UPSTREAM_UNAVAILABLE");
    }

    #[test]
    fn test_retry_delay_doubles_then_caps() {
        assert_eq!(retry_delay(1), Duration::from_secs(1));
        assert_eq!(retry_delay(2), Duration::from_secs(2));
        assert_eq!(retry_delay(3), Duration::from_secs(4));
        assert_eq!(retry_delay(6), Duration::from_secs(30));
        assert_eq!(retry_delay(70), Duration::from_secs(30));
        assert_eq!(retry_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_phase_transitions() {
        use StagePhase::*;
        assert!(Idle.can_advance_to(Building));
        assert!(AwaitingCompletion.can_advance_to(Failed));
        assert!(Normalizing.can_advance_to(Succeeded));
        assert!(!Idle.can_advance_to(Normalizing));
        assert!(!Succeeded.can_advance_to(Building));
        assert!(Failed.is_terminal());
    }

    #[test]
    fn test_tracker_records_happy_path() {
        let mut tracker = StageTracker::new("test");
        for phase in [
            StagePhase::Building,
            StagePhase::AwaitingCompletion,
            StagePhase::Normalizing,
            StagePhase::Succeeded,
        ] {
            tracker.advance(phase);
        }
        assert_eq!(tracker.phase(), StagePhase::Succeeded);
        assert_eq!(tracker.transitions().len(), 5);
    }

    #[test]
    fn test_active_filters_trims_and_dedups() {
        let filters = active_filters(vec![
            " vegan ".to_string(),
            "".to_string(),
            "vegan".to_string(),
            "fragrance-free".to_string(),
        ]);
        assert_eq!(filters, vec!["vegan", "fragrance-free"]);
    }
}
