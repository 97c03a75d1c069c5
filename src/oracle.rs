//! Differential execution and the equivalence oracle.
//!
//! Both engines run the same artifact concurrently with nothing shared
//! between them. Their outcomes are compared by [`compare`]; a finding is
//! only reported once a second run shows both engines reproduce their own
//! behaviour.

use std::time::Duration;
use tracing::{debug, warn};

use crate::felt::Felt;
use crate::program::Confidence;
use crate::vm::memory::Address;
use crate::vm::{Artifact, CompileError, EnginePair, EngineSlot, ErrorClass, ExecutionOutcome};

/// What the two engines disagreed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindingDetail {
    /// Both runs succeeded with different final memory.
    MemoryMismatch {
        address: Address,
        a: Option<Felt>,
        b: Option<Felt>,
        differing_cells: usize,
    },
    /// One engine accepted the program and the other rejected it.
    InconsistentOutcome {
        failed: EngineSlot,
        class: ErrorClass,
        message: String,
    },
    DivergentErrorClass {
        a: ErrorClass,
        b: ErrorClass,
        a_message: String,
        b_message: String,
    },
    /// The compiler rejected a program expected to compile.
    CompileRejected { message: String },
}

impl FindingDetail {
    pub fn kind(&self) -> &'static str {
        match self {
            FindingDetail::MemoryMismatch { .. } => "memory_mismatch",
            FindingDetail::InconsistentOutcome { .. } => "inconsistent_outcome",
            FindingDetail::DivergentErrorClass { .. } => "divergent_error_class",
            FindingDetail::CompileRejected { .. } => "compile_rejected",
        }
    }
}

/// Why an iteration proved nothing either way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InconclusiveReason {
    EngineTimeout(EngineSlot),
    EngineUnavailable { slot: EngineSlot, message: String },
    CompileTimeout,
    CompilerIo(String),
    /// A program built from approximated types did not compile.
    ApproximateRejected(String),
    /// An engine produced a different outcome on a second run.
    NonDeterministic(EngineSlot),
}

impl InconclusiveReason {
    pub fn label(&self) -> &'static str {
        match self {
            InconclusiveReason::EngineTimeout(_) => "engine_timeout",
            InconclusiveReason::EngineUnavailable { .. } => "engine_unavailable",
            InconclusiveReason::CompileTimeout => "compile_timeout",
            InconclusiveReason::CompilerIo(_) => "compiler_io",
            InconclusiveReason::ApproximateRejected(_) => "approximate_rejected",
            InconclusiveReason::NonDeterministic(_) => "non_deterministic",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Finding(FindingDetail),
    Inconclusive(InconclusiveReason),
}

fn infrastructure_failure(
    slot: EngineSlot,
    outcome: &ExecutionOutcome,
) -> Option<InconclusiveReason> {
    match outcome {
        ExecutionOutcome::Err {
            class: ErrorClass::Timeout,
            ..
        } => Some(InconclusiveReason::EngineTimeout(slot)),
        ExecutionOutcome::Err {
            class: ErrorClass::Unavailable,
            message,
        } => Some(InconclusiveReason::EngineUnavailable {
            slot,
            message: message.clone(),
        }),
        _ => None,
    }
}

/// The equivalence rule over one pair of outcomes.
pub fn compare(a: &ExecutionOutcome, b: &ExecutionOutcome) -> Verdict {
    if let Some(reason) = infrastructure_failure(EngineSlot::A, a)
        .or_else(|| infrastructure_failure(EngineSlot::B, b))
    {
        return Verdict::Inconclusive(reason);
    }

    match (a, b) {
        (ExecutionOutcome::Ok(left), ExecutionOutcome::Ok(right)) => {
            let differences = left.differences(right);
            match differences.first() {
                None => Verdict::Pass,
                Some(first) => Verdict::Finding(FindingDetail::MemoryMismatch {
                    address: first.address,
                    a: first.left.clone(),
                    b: first.right.clone(),
                    differing_cells: differences.len(),
                }),
            }
        }
        (ExecutionOutcome::Ok(_), ExecutionOutcome::Err { class, message }) => {
            Verdict::Finding(FindingDetail::InconsistentOutcome {
                failed: EngineSlot::B,
                class: *class,
                message: message.clone(),
            })
        }
        (ExecutionOutcome::Err { class, message }, ExecutionOutcome::Ok(_)) => {
            Verdict::Finding(FindingDetail::InconsistentOutcome {
                failed: EngineSlot::A,
                class: *class,
                message: message.clone(),
            })
        }
        (
            ExecutionOutcome::Err {
                class: a_class,
                message: a_message,
            },
            ExecutionOutcome::Err {
                class: b_class,
                message: b_message,
            },
        ) => {
            if a_class == b_class {
                Verdict::Pass
            } else {
                Verdict::Finding(FindingDetail::DivergentErrorClass {
                    a: *a_class,
                    b: *b_class,
                    a_message: a_message.clone(),
                    b_message: b_message.clone(),
                })
            }
        }
    }
}

/// Verdict for a program the compiler would not build.
pub fn compile_verdict(error: &CompileError, confidence: Confidence) -> Verdict {
    match (error, confidence) {
        (CompileError::Rejected { message }, Confidence::Exact) => {
            Verdict::Finding(FindingDetail::CompileRejected {
                message: message.clone(),
            })
        }
        (CompileError::Rejected { message }, Confidence::Approximate) => {
            Verdict::Inconclusive(InconclusiveReason::ApproximateRejected(message.clone()))
        }
        (CompileError::Timeout(_), _) => Verdict::Inconclusive(InconclusiveReason::CompileTimeout),
        (CompileError::Io(err), _) => {
            Verdict::Inconclusive(InconclusiveReason::CompilerIo(err.to_string()))
        }
    }
}

/// Whether two runs of one engine agree. Failure messages may mention
/// per-run paths, so failures only need to agree on their class.
fn reproduces(first: &ExecutionOutcome, second: &ExecutionOutcome) -> bool {
    match (first, second) {
        (ExecutionOutcome::Ok(left), ExecutionOutcome::Ok(right)) => left == right,
        (ExecutionOutcome::Err { class: left, .. }, ExecutionOutcome::Err { class: right, .. }) => {
            left == right
        }
        _ => false,
    }
}

/// Outcome of one differential run.
#[derive(Debug, Clone)]
pub struct Judgement {
    pub a: ExecutionOutcome,
    pub b: ExecutionOutcome,
    pub verdict: Verdict,
}

/// Runs one artifact on both engines and judges the result.
#[derive(Clone)]
pub struct DifferentialExecutor {
    engines: EnginePair,
    timeout: Duration,
    confirm_findings: bool,
}

impl DifferentialExecutor {
    pub fn new(engines: EnginePair, timeout: Duration) -> Self {
        Self {
            engines,
            timeout,
            confirm_findings: true,
        }
    }

    /// Disables the second run that confirms findings.
    pub fn without_confirmation(mut self) -> Self {
        self.confirm_findings = false;
        self
    }

    pub fn engines(&self) -> &EnginePair {
        &self.engines
    }

    /// Runs both engines concurrently.
    pub fn execute(&self, artifact: &Artifact) -> (ExecutionOutcome, ExecutionOutcome) {
        rayon::join(
            || self.engines.get(EngineSlot::A).run(artifact, self.timeout),
            || self.engines.get(EngineSlot::B).run(artifact, self.timeout),
        )
    }

    pub fn judge(&self, artifact: &Artifact) -> Judgement {
        let (a, b) = self.execute(artifact);
        let mut verdict = compare(&a, &b);

        if self.confirm_findings && matches!(verdict, Verdict::Finding(_)) {
            let (again_a, again_b) = self.execute(artifact);
            let unstable = if !reproduces(&a, &again_a) {
                Some(EngineSlot::A)
            } else if !reproduces(&b, &again_b) {
                Some(EngineSlot::B)
            } else {
                None
            };
            if let Some(slot) = unstable {
                let reason = InconclusiveReason::NonDeterministic(slot);
                warn!(
                    artifact = %artifact.short_id(),
                    reason = reason.label(),
                    "finding did not reproduce"
                );
                verdict = Verdict::Inconclusive(reason);
            }
        }
        debug!(artifact = %artifact.short_id(), verdict = ?verdict, "judged artifact");

        Judgement { a, b, verdict }
    }

    /// Runs `artifact` twice on each engine and returns the first engine
    /// whose runs disagree.
    pub fn self_check(&self, artifact: &Artifact) -> Option<EngineSlot> {
        EngineSlot::BOTH.into_iter().find(|slot| {
            let engine = self.engines.get(*slot);
            let first = engine.run(artifact, self.timeout);
            let second = engine.run(artifact, self.timeout);
            !reproduces(&first, &second)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::memory::MemorySnapshot;
    use crate::vm::Engine;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn snapshot(cells: &[(u64, u64)]) -> MemorySnapshot {
        let mut snapshot = MemorySnapshot::new();
        for (address, value) in cells {
            snapshot.insert_cell(*address, Felt::from(*value));
        }
        snapshot
    }

    fn err(class: ErrorClass) -> ExecutionOutcome {
        ExecutionOutcome::failure(class, format!("{class}"))
    }

    #[test]
    fn equal_memory_passes() {
        let a = ExecutionOutcome::Ok(snapshot(&[(1, 2), (2, 3)]));
        assert_eq!(compare(&a, &a.clone()), Verdict::Pass);
    }

    #[test]
    fn memory_mismatch_reports_first_cell() {
        let a = ExecutionOutcome::Ok(snapshot(&[(1, 2), (2, 3), (3, 4)]));
        let b = ExecutionOutcome::Ok(snapshot(&[(1, 2), (2, 9), (4, 4)]));
        assert_eq!(
            compare(&a, &b),
            Verdict::Finding(FindingDetail::MemoryMismatch {
                address: 2,
                a: Some(Felt::from(3u64)),
                b: Some(Felt::from(9u64)),
                differing_cells: 3,
            })
        );
    }

    #[test]
    fn one_sided_failure_is_a_finding() {
        let ok = ExecutionOutcome::Ok(snapshot(&[(1, 1)]));
        let failed = err(ErrorClass::HintFailure);
        assert!(matches!(
            compare(&ok, &failed),
            Verdict::Finding(FindingDetail::InconsistentOutcome { failed: EngineSlot::B, .. })
        ));
        assert!(matches!(
            compare(&failed, &ok),
            Verdict::Finding(FindingDetail::InconsistentOutcome { failed: EngineSlot::A, .. })
        ));
    }

    #[test]
    fn error_classes_must_agree() {
        let range = err(ErrorClass::RangeCheck);
        assert_eq!(compare(&range, &range.clone()), Verdict::Pass);
        assert!(matches!(
            compare(&range, &err(ErrorClass::AssertEqFailed)),
            Verdict::Finding(FindingDetail::DivergentErrorClass { .. })
        ));
    }

    #[test]
    fn infrastructure_failures_are_inconclusive() {
        let ok = ExecutionOutcome::Ok(snapshot(&[(1, 1)]));
        assert_eq!(
            compare(&ok, &err(ErrorClass::Timeout)),
            Verdict::Inconclusive(InconclusiveReason::EngineTimeout(EngineSlot::B))
        );
        assert!(matches!(
            compare(&err(ErrorClass::Unavailable), &err(ErrorClass::RangeCheck)),
            Verdict::Inconclusive(InconclusiveReason::EngineUnavailable { slot: EngineSlot::A, .. })
        ));
    }

    #[test]
    fn compile_errors_depend_on_confidence() {
        let rejected = CompileError::Rejected { message: "bad".into() };
        assert!(matches!(
            compile_verdict(&rejected, Confidence::Exact),
            Verdict::Finding(FindingDetail::CompileRejected { .. })
        ));
        assert!(matches!(
            compile_verdict(&rejected, Confidence::Approximate),
            Verdict::Inconclusive(InconclusiveReason::ApproximateRejected(_))
        ));
        assert_eq!(
            compile_verdict(&CompileError::Timeout(Duration::from_secs(1)), Confidence::Exact),
            Verdict::Inconclusive(InconclusiveReason::CompileTimeout)
        );
    }

    struct Fixed(ExecutionOutcome);

    impl Engine for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn run(&self, _: &Artifact, _: Duration) -> ExecutionOutcome {
            self.0.clone()
        }
    }

    /// Returns a different memory value on every run.
    struct Flaky(AtomicUsize);

    impl Engine for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn run(&self, _: &Artifact, _: Duration) -> ExecutionOutcome {
            let run = self.0.fetch_add(1, Ordering::SeqCst) as u64;
            ExecutionOutcome::Ok(snapshot(&[(1, run)]))
        }
    }

    #[test]
    fn findings_are_confirmed() {
        let artifact = Artifact::new(vec![1]);
        let stable = DifferentialExecutor::new(
            EnginePair::new(
                Arc::new(Fixed(ExecutionOutcome::Ok(snapshot(&[(1, 5)])))),
                Arc::new(Fixed(ExecutionOutcome::Ok(snapshot(&[(1, 6)])))),
            ),
            Duration::from_secs(1),
        );
        assert!(matches!(stable.judge(&artifact).verdict, Verdict::Finding(_)));
        assert_eq!(stable.self_check(&artifact), None);

        let flaky = DifferentialExecutor::new(
            EnginePair::new(
                Arc::new(Fixed(ExecutionOutcome::Ok(snapshot(&[(1, 100)])))),
                Arc::new(Flaky(AtomicUsize::new(0))),
            ),
            Duration::from_secs(1),
        );
        assert_eq!(
            flaky.judge(&artifact).verdict,
            Verdict::Inconclusive(InconclusiveReason::NonDeterministic(EngineSlot::B))
        );
        assert_eq!(flaky.self_check(&artifact), Some(EngineSlot::B));
        assert!(matches!(
            flaky.without_confirmation().judge(&artifact).verdict,
            Verdict::Finding(FindingDetail::MemoryMismatch { .. })
        ));
    }
}
