//! Translation engine boundary.

pub mod engine;
#[cfg(feature = "marian")]
pub mod marian;

pub use engine::{MockTranslator, PassthroughTranslator, TranslationEngine};
#[cfg(feature = "marian")]
pub use marian::MarianTranslator;
