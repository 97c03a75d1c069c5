//! Differential fuzzing of Cairo hint execution.
//!
//! Hints from a whitelist are analyzed for the `ids.*` variables they read
//! and write, wrapped in a minimal Cairo program whose inputs are filled with
//! random field elements, compiled once, and run on two VM engines whose
//! final memories must agree.

use sha2::{Digest, Sha256};

pub mod analyzer;
pub mod catalog;
pub mod config;
pub mod felt;
pub mod fuzzer;
pub mod oracle;
pub mod program;
pub mod report;
pub mod transcript;
pub mod values;
pub mod vm;

pub fn digest_sha2(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}
