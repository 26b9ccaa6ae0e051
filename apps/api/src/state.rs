use crate::pipeline::orchestrator::Orchestrator;
use crate::store::ResultStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Owns the completion client; the only path to the upstream service.
    pub orchestrator: Orchestrator,
    pub store: ResultStore,
}
