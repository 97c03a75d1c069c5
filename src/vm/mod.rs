//! Boundary to the engines under test and the compiler that feeds them.
//!
//! The fuzzer never looks inside a compiled program or an engine. It hands
//! source text to a [`Compiler`], hands the resulting [`Artifact`] to each
//! [`Engine`], and compares what comes back.

pub mod memory;
pub mod process;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::digest_sha2;
use memory::MemorySnapshot;

/// A compiled program, opaque to the fuzzer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    bytes: Vec<u8>,
    digest: [u8; 32],
}

impl Artifact {
    pub fn new(bytes: Vec<u8>) -> Self {
        let digest = digest_sha2(&bytes);
        Self { bytes, digest }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn digest(&self) -> [u8; 32] {
        self.digest
    }

    /// Short hex prefix of the digest, for log lines.
    pub fn short_id(&self) -> String {
        self.digest[..6].iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("compiler rejected the program: {message}")]
    Rejected { message: String },
    #[error("compiler did not finish within {0:?}")]
    Timeout(Duration),
    #[error("compiler could not be run: {0}")]
    Io(#[from] std::io::Error),
}

/// Turns program text into an executable artifact.
pub trait Compiler: Send + Sync {
    fn compile(&self, source: &str, timeout: Duration) -> Result<Artifact, CompileError>;
}

/// Coarse category of an engine failure. Two engines failing the same
/// program must agree on the class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    UnknownHint,
    HintFailure,
    RangeCheck,
    UnknownMemoryCell,
    InconsistentMemory,
    AssertEqFailed,
    /// The engine died: signal, panic, or unreadable output.
    Crash,
    Timeout,
    /// The engine could not be started at all.
    Unavailable,
    Unclassified,
}

/// Lower-case message fragments and the class they indicate. First match wins.
pub const ERROR_CLASS_TABLE: &[(&str, ErrorClass)] = &[
    ("unknown hint", ErrorClass::UnknownHint),
    ("unknownhint", ErrorClass::UnknownHint),
    ("not whitelisted", ErrorClass::UnknownHint),
    ("got an exception while executing a hint", ErrorClass::HintFailure),
    ("hint error", ErrorClass::HintFailure),
    ("hinterror", ErrorClass::HintFailure),
    ("range_check", ErrorClass::RangeCheck),
    ("range-check", ErrorClass::RangeCheck),
    ("range check", ErrorClass::RangeCheck),
    ("rangecheck", ErrorClass::RangeCheck),
    ("unknown value for memory cell", ErrorClass::UnknownMemoryCell),
    ("unknown memory cell", ErrorClass::UnknownMemoryCell),
    ("unknownmemorycell", ErrorClass::UnknownMemoryCell),
    ("inconsistent memory", ErrorClass::InconsistentMemory),
    ("inconsistentmemory", ErrorClass::InconsistentMemory),
    ("assert_eq", ErrorClass::AssertEqFailed),
    ("diffassertvalues", ErrorClass::AssertEqFailed),
    ("panicked at", ErrorClass::Crash),
    ("segmentation fault", ErrorClass::Crash),
];

impl ErrorClass {
    /// Classifies a failure message with [`ERROR_CLASS_TABLE`].
    pub fn classify(message: &str) -> Self {
        let lowered = message.to_lowercase();
        ERROR_CLASS_TABLE
            .iter()
            .find(|(needle, _)| lowered.contains(needle))
            .map_or(ErrorClass::Unclassified, |(_, class)| *class)
    }

    /// Failures of the harness rather than of the program under test.
    pub fn is_infrastructure(self) -> bool {
        matches!(self, ErrorClass::Timeout | ErrorClass::Unavailable)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorClass::UnknownHint => "unknown_hint",
            ErrorClass::HintFailure => "hint_failure",
            ErrorClass::RangeCheck => "range_check",
            ErrorClass::UnknownMemoryCell => "unknown_memory_cell",
            ErrorClass::InconsistentMemory => "inconsistent_memory",
            ErrorClass::AssertEqFailed => "assert_eq_failed",
            ErrorClass::Crash => "crash",
            ErrorClass::Timeout => "timeout",
            ErrorClass::Unavailable => "unavailable",
            ErrorClass::Unclassified => "unclassified",
        };
        f.write_str(name)
    }
}

/// Result of running one artifact on one engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Ok(MemorySnapshot),
    Err { class: ErrorClass, message: String },
}

impl ExecutionOutcome {
    pub fn failure(class: ErrorClass, message: impl Into<String>) -> Self {
        ExecutionOutcome::Err {
            class,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ExecutionOutcome::Ok(_))
    }
}

/// One virtual machine implementation under test.
pub trait Engine: Send + Sync {
    fn name(&self) -> &str;

    /// Runs `artifact` from a fresh memory layout. Implementations must not
    /// share mutable state between runs.
    fn run(&self, artifact: &Artifact, timeout: Duration) -> ExecutionOutcome;
}

/// Which side of the comparison an engine sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineSlot {
    A,
    B,
}

impl EngineSlot {
    pub const BOTH: [EngineSlot; 2] = [EngineSlot::A, EngineSlot::B];
}

/// The two engines being compared.
#[derive(Clone)]
pub struct EnginePair {
    a: Arc<dyn Engine>,
    b: Arc<dyn Engine>,
}

impl EnginePair {
    pub fn new(a: Arc<dyn Engine>, b: Arc<dyn Engine>) -> Self {
        Self { a, b }
    }

    pub fn get(&self, slot: EngineSlot) -> &dyn Engine {
        match slot {
            EngineSlot::A => self.a.as_ref(),
            EngineSlot::B => self.b.as_ref(),
        }
    }

    pub fn names(&self) -> [String; 2] {
        EngineSlot::BOTH.map(|slot| self.get(slot).name().to_string())
    }
}
