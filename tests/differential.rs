#[cfg(test)]
mod tests {
    use hintdiff::catalog::HintCatalog;
    use hintdiff::felt::Felt;
    use hintdiff::fuzzer::{plan_iteration, Fuzzer, IterationOutcome, RunBudget};
    use hintdiff::oracle::{DifferentialExecutor, InconclusiveReason, Verdict};
    use hintdiff::program::Confidence;
    use hintdiff::report::{read_findings, DetailRecord, FindingsLog};
    use hintdiff::vm::memory::MemorySnapshot;
    use hintdiff::vm::{
        Artifact, CompileError, Compiler, Engine, EnginePair, ErrorClass, ExecutionOutcome,
    };
    use regex::Regex;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    const SLOPE_HINT: &str = "\
from starkware.cairo.common.cairo_secp.secp_utils import SECP_P, pack
x0 = pack(ids.pt0.x, PRIME)
y0 = pack(ids.pt0.y, PRIME)
x1 = pack(ids.pt1.x, PRIME)
y1 = pack(ids.pt1.y, PRIME)
value = line_slope(point1=(x0, y0), point2=(x1, y1), p=SECP_P)
ids.slope.d0, ids.slope.d1, ids.slope.d2 = split(value)";

    const SPLIT_HINT: &str = "ids.res.d0, ids.res.d1, ids.res.d2 = split(ids.value)";

    const HALF: u128 = 1 << 127;

    /// The "artifact" is the program text itself.
    struct EchoCompiler;

    impl Compiler for EchoCompiler {
        fn compile(&self, source: &str, _: Duration) -> Result<Artifact, CompileError> {
            Ok(Artifact::new(source.as_bytes().to_vec()))
        }
    }

    struct RejectingCompiler;

    impl Compiler for RejectingCompiler {
        fn compile(&self, _: &str, _: Duration) -> Result<Artifact, CompileError> {
            Err(CompileError::Rejected {
                message: "Unknown identifier 'split'".into(),
            })
        }
    }

    /// Stands in for a VM: every input limb is copied to memory, followed by
    /// three output limbs derived from the inputs.
    struct ScriptedEngine {
        name: &'static str,
        /// Carries a bogus unit into the middle output limb whenever an input
        /// limb sits in the upper half of the range.
        carry_bug: bool,
    }

    impl ScriptedEngine {
        fn limbs(source: &str) -> Vec<u128> {
            let construct = Regex::new(r"d[012]=(\d+)").unwrap();
            let scalar = Regex::new(r"let \w+ = (\d+);").unwrap();
            construct
                .captures_iter(source)
                .chain(scalar.captures_iter(source))
                .map(|c| c[1].parse().unwrap())
                .collect()
        }
    }

    impl Engine for ScriptedEngine {
        fn name(&self) -> &str {
            self.name
        }

        fn run(&self, artifact: &Artifact, _: Duration) -> ExecutionOutcome {
            let source = String::from_utf8(artifact.bytes().to_vec()).unwrap();
            let limbs = Self::limbs(&source);

            let mut memory = MemorySnapshot::new();
            for (address, limb) in limbs.iter().enumerate() {
                memory.insert_cell(address as u64 + 1, Felt::from(*limb));
            }
            let base = limbs.len() as u64 + 1;
            let mut out = [0u128; 3];
            for (i, limb) in limbs.iter().enumerate() {
                out[i % 3] = out[i % 3].wrapping_add(*limb >> 2);
            }
            if self.carry_bug && limbs.iter().any(|l| *l >= HALF) {
                out[1] = out[1].wrapping_add(1);
            }
            for (offset, limb) in out.into_iter().enumerate() {
                memory.insert_cell(base + offset as u64, Felt::from(limb));
            }
            ExecutionOutcome::Ok(memory)
        }
    }

    /// Fails every run with a fixed class.
    struct FailingEngine(ErrorClass);

    impl Engine for FailingEngine {
        fn name(&self) -> &str {
            "failing"
        }

        fn run(&self, _: &Artifact, _: Duration) -> ExecutionOutcome {
            ExecutionOutcome::failure(self.0, "Error: failed")
        }
    }

    fn engines(b: impl Engine + 'static) -> EnginePair {
        EnginePair::new(
            Arc::new(ScriptedEngine {
                name: "reference",
                carry_bug: false,
            }),
            Arc::new(b),
        )
    }

    fn fuzzer(hints: &[&str], compiler: impl Compiler + 'static, pair: EnginePair) -> Fuzzer {
        Fuzzer::new(
            Arc::new(HintCatalog::from_snippets(hints.iter().copied())),
            Arc::new(compiler),
            DifferentialExecutor::new(pair, Duration::from_secs(5)),
        )
    }

    fn budget(iterations: u64) -> RunBudget {
        RunBudget {
            iterations,
            workers: 4,
            deadline: None,
        }
    }

    #[test]
    fn test_slope_program_shape() {
        let catalog = HintCatalog::from_snippets([SLOPE_HINT]);
        let (program, values) = plan_iteration(&catalog, 11, None).unwrap();
        assert_eq!(program.placeholders.len(), 6);
        assert_eq!(values.len(), 6);
        assert!(program.text.contains("let slope = fuzz_hint(pt0, pt1);"));
        assert!(program.text.contains("local slope: BigInt3;"));
        // the accessed .x/.y fields are coerced into a bigint for pack()
        assert_eq!(program.confidence, Confidence::Approximate);
        let roots: Vec<_> = program
            .placeholders
            .iter()
            .map(|p| p.binding.root_name.as_str())
            .collect();
        assert_eq!(roots, ["pt0", "pt0", "pt0", "pt1", "pt1", "pt1"]);
        assert_eq!(
            program.output_schema.iter().map(|r| r.root_name.as_str()).collect::<Vec<_>>(),
            ["slope"; 3]
        );
    }

    #[test]
    fn test_slope_mismatch_reports_first_limb() {
        let fuzzer = fuzzer(
            &[SLOPE_HINT],
            EchoCompiler,
            engines(ScriptedEngine {
                name: "patched",
                carry_bug: true,
            }),
        );
        let catalog = HintCatalog::from_snippets([SLOPE_HINT]);
        let seed = (0..64)
            .find(|seed| {
                let (_, values) = plan_iteration(&catalog, *seed, None).unwrap();
                values.iter().any(|v| v.value >= HALF)
            })
            .unwrap();

        match fuzzer.run_iteration(seed, None) {
            IterationOutcome::Finding(record) => {
                assert_eq!(record.seed, seed);
                assert_eq!(record.generated_values.len(), 6);
                assert!(!record.program_text.contains("$fuzz_"));
                match &record.detail {
                    DetailRecord::MemoryMismatch {
                        address,
                        differing_cells,
                        ..
                    } => {
                        // six input cells, then d0, d1, d2 of slope
                        assert_eq!(*address, 8);
                        assert_eq!(*differing_cells, 1);
                    }
                    other => panic!("unexpected detail {other:?}"),
                }
            }
            other => panic!("expected a finding, got {other:?}"),
        }
    }

    #[test]
    fn test_consistent_pair_never_reports() {
        let fuzzer = fuzzer(
            &[SLOPE_HINT, SPLIT_HINT],
            EchoCompiler,
            engines(ScriptedEngine {
                name: "twin",
                carry_bug: false,
            }),
        );
        let summary = fuzzer.run(7, budget(200)).unwrap();
        assert_eq!(summary.iterations, 200);
        assert_eq!(summary.passed, 200);
        assert_eq!(summary.findings, 0);
    }

    #[test]
    fn test_engine_is_deterministic() {
        let catalog = HintCatalog::from_snippets([SLOPE_HINT]);
        let (program, values) = plan_iteration(&catalog, 3, None).unwrap();
        let artifact = EchoCompiler
            .compile(&program.instantiate(&values).unwrap(), Duration::from_secs(1))
            .unwrap();
        let engine = ScriptedEngine {
            name: "reference",
            carry_bug: false,
        };
        let first = engine.run(&artifact, Duration::from_secs(1));
        assert!(first.is_ok());
        assert_eq!(first, engine.run(&artifact, Duration::from_secs(1)));

        let executor = DifferentialExecutor::new(
            engines(ScriptedEngine {
                name: "patched",
                carry_bug: true,
            }),
            Duration::from_secs(1),
        );
        assert_eq!(executor.self_check(&artifact), None);
    }

    #[test]
    fn test_findings_log_replays() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("findings.jsonl");
        let log = Arc::new(FindingsLog::open(&path).unwrap());
        let fuzzer = fuzzer(
            &[SLOPE_HINT, SPLIT_HINT],
            EchoCompiler,
            engines(ScriptedEngine {
                name: "patched",
                carry_bug: true,
            }),
        )
        .with_findings(log);

        let summary = fuzzer.run(42, budget(40)).unwrap();
        assert!(summary.findings > 0);

        let records = read_findings(&path).unwrap();
        assert_eq!(records.len() as u64, summary.findings);
        for record in records.iter().take(5) {
            match fuzzer.run_iteration(record.seed, Some(record.hint_id)) {
                IterationOutcome::Finding(replayed) => {
                    assert_eq!(replayed.program_text, record.program_text);
                    assert_eq!(replayed.generated_values, record.generated_values);
                }
                other => panic!("replay of seed {} gave {other:?}", record.seed),
            }
        }
    }

    #[test]
    fn test_error_outcomes() {
        let same = fuzzer(
            &[SPLIT_HINT],
            EchoCompiler,
            EnginePair::new(
                Arc::new(FailingEngine(ErrorClass::RangeCheck)),
                Arc::new(FailingEngine(ErrorClass::RangeCheck)),
            ),
        );
        assert_eq!(same.run_iteration(1, None), IterationOutcome::Pass);

        let divergent = fuzzer(
            &[SPLIT_HINT],
            EchoCompiler,
            EnginePair::new(
                Arc::new(FailingEngine(ErrorClass::RangeCheck)),
                Arc::new(FailingEngine(ErrorClass::HintFailure)),
            ),
        );
        match divergent.run_iteration(1, None) {
            IterationOutcome::Finding(record) => {
                assert!(matches!(record.detail, DetailRecord::DivergentErrorClass { .. }))
            }
            other => panic!("unexpected {other:?}"),
        }

        let one_sided = fuzzer(
            &[SPLIT_HINT],
            EchoCompiler,
            engines(FailingEngine(ErrorClass::HintFailure)),
        );
        match one_sided.run_iteration(1, None) {
            IterationOutcome::Finding(record) => {
                assert!(matches!(record.detail, DetailRecord::InconsistentOutcome { .. }))
            }
            other => panic!("unexpected {other:?}"),
        }

        let timeout = fuzzer(
            &[SPLIT_HINT],
            EchoCompiler,
            engines(FailingEngine(ErrorClass::Timeout)),
        );
        assert!(matches!(
            timeout.run_iteration(1, None),
            IterationOutcome::Inconclusive(InconclusiveReason::EngineTimeout(_))
        ));
    }

    #[test]
    fn test_compile_rejection_depends_on_confidence() {
        let pair = || engines(ScriptedEngine { name: "twin", carry_bug: false });

        let exact = fuzzer(&[SPLIT_HINT], RejectingCompiler, pair());
        match exact.run_iteration(0, None) {
            IterationOutcome::Finding(record) => {
                assert!(matches!(record.detail, DetailRecord::CompileRejected { .. }))
            }
            other => panic!("unexpected {other:?}"),
        }

        let approximate = fuzzer(&[SLOPE_HINT], RejectingCompiler, pair());
        assert!(matches!(
            approximate.run_iteration(0, None),
            IterationOutcome::Inconclusive(InconclusiveReason::ApproximateRejected(_))
        ));
    }

    #[test]
    fn test_skips_are_counted() {
        let fuzzer = fuzzer(
            &["memory[ap] = 1", "ids.flag = ids.a.low"],
            EchoCompiler,
            engines(ScriptedEngine { name: "twin", carry_bug: false }),
        );
        let summary = fuzzer.run(5, budget(50)).unwrap();
        assert_eq!(summary.skipped_total(), 50);
        assert_eq!(
            summary.skipped.get("no_references").copied().unwrap_or(0)
                + summary.skipped.get("unreturnable_output").copied().unwrap_or(0),
            50
        );
    }

    #[test]
    fn test_cancellation_commits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("findings.jsonl");
        let fuzzer = fuzzer(
            &[SLOPE_HINT],
            EchoCompiler,
            engines(ScriptedEngine {
                name: "patched",
                carry_bug: true,
            }),
        )
        .with_findings(Arc::new(FindingsLog::open(&path).unwrap()));

        fuzzer.cancel_flag().store(true, Ordering::Relaxed);
        let summary = fuzzer.run(1, budget(25)).unwrap();
        assert_eq!(summary.cancelled, 25);
        assert!(read_findings(&path).unwrap().is_empty());
    }

    #[test]
    fn test_deadline_cancels_run() {
        let fuzzer = fuzzer(
            &[SPLIT_HINT],
            EchoCompiler,
            engines(ScriptedEngine {
                name: "twin",
                carry_bug: false,
            }),
        );
        let summary = fuzzer
            .run(
                1,
                RunBudget {
                    iterations: 10,
                    workers: 2,
                    deadline: Some(Duration::ZERO),
                },
            )
            .unwrap();
        assert_eq!(summary.cancelled, 10);
    }

    #[test]
    fn test_deadline_only_ends_its_own_run() {
        let fuzzer = fuzzer(
            &[SPLIT_HINT],
            EchoCompiler,
            engines(ScriptedEngine {
                name: "twin",
                carry_bug: false,
            }),
        );
        let expired = RunBudget {
            iterations: 3,
            workers: 1,
            deadline: Some(Duration::ZERO),
        };
        assert_eq!(fuzzer.run(1, expired).unwrap().cancelled, 3);

        let summary = fuzzer.run(1, budget(3)).unwrap();
        assert_eq!(summary.cancelled, 0);
        assert_eq!(summary.passed, 3);
        assert_eq!(fuzzer.run_iteration(5, None), IterationOutcome::Pass);
        assert!(!fuzzer.cancel_flag().load(Ordering::Relaxed));
    }

    #[test]
    fn test_judge_exposes_both_outcomes() {
        let executor = DifferentialExecutor::new(
            engines(FailingEngine(ErrorClass::AssertEqFailed)),
            Duration::from_secs(1),
        );
        let judgement = executor.judge(&Artifact::new(b"let x = 5;".to_vec()));
        assert!(judgement.a.is_ok());
        assert!(!judgement.b.is_ok());
        assert!(matches!(judgement.verdict, Verdict::Finding(_)));
    }
}
