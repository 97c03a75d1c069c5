//! Cairo wrapper programs around a single hint.
//!
//! Programs are built as a syntax tree ([`ast`]) and serialized in one pass
//! ([`render`]). Randomized inputs are placeholders in the tree and are bound
//! at render time, so the hint body is never touched by substitution.

pub mod ast;
pub mod render;
pub mod synth;
pub mod types;

pub use synth::{synthesize, Confidence, Placeholder, SynthesisError, SynthesizedProgram};
