//! Reference steps shipped with the crate.
//!
//! These exercise the core abstractions; domain steps that talk to external
//! ASR/TTS/LLM services live in the embedding application and implement the
//! same [`crate::step::Step`] trait.

pub mod duplicator;
pub mod prompt_source;
pub mod sentence;

pub use duplicator::DuplicatorStep;
pub use prompt_source::{ATTR_PROMPT_UPDATE, PromptSourceStep};
pub use sentence::SentenceAssemblerStep;
