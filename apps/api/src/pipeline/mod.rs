// Ingredient pipeline: prompt building, completion, normalization, chaining.
// All completion calls go through llm_client; handlers only see StageResult slots.

pub mod handlers;
pub mod normalizer;
pub mod orchestrator;
pub mod outcome;
pub mod prompts;
pub mod schema;
