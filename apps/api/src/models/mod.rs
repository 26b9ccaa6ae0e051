pub mod ingredient;

pub use ingredient::{ActionableSummary, FilterConfirmation, FilterVerdict, Ingredient};
