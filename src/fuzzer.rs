//! The fuzz loop.
//!
//! An iteration is self-contained: its seed picks a hint and the values for
//! every placeholder, the program is compiled once, and the artifact is
//! judged on both engines. Iterations share nothing but the read-only
//! catalog and the findings log, so they run in parallel on a rayon pool.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug_span, error, info, warn};

use crate::analyzer::{analyze, AnalysisError};
use crate::catalog::{HintCatalog, HintEntry, HintId};
use crate::oracle::{compile_verdict, DifferentialExecutor, InconclusiveReason, Verdict};
use crate::program::{synthesize, Confidence, SynthesisError, SynthesizedProgram};
use crate::report::{FindingRecord, FindingsLog};
use crate::transcript::iteration_seed;
use crate::values::{GeneratedValue, ValueGenerator};
use crate::vm::Compiler;

#[derive(Debug, Error)]
pub enum FuzzError {
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Why an iteration never reached the engines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    EmptyCatalog,
    UnknownHint(HintId),
    Analysis(AnalysisError),
    Synthesis(SynthesisError),
}

impl SkipReason {
    /// The hint the iteration had selected, when one was.
    pub fn hint_id(&self) -> Option<HintId> {
        match self {
            SkipReason::EmptyCatalog => None,
            SkipReason::UnknownHint(id) => Some(*id),
            SkipReason::Analysis(
                AnalysisError::NoReferences { hint_id }
                | AnalysisError::InconsistentArity { hint_id, .. },
            ) => Some(*hint_id),
            SkipReason::Synthesis(
                SynthesisError::UnreturnableOutput { hint_id, .. }
                | SynthesisError::UnresolvableType { hint_id, .. }
                | SynthesisError::ReservedIdentifier { hint_id, .. },
            ) => Some(*hint_id),
            SkipReason::Synthesis(
                SynthesisError::UnboundPlaceholder(_) | SynthesisError::UnknownPlaceholder(_),
            ) => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::EmptyCatalog => "empty_catalog",
            SkipReason::UnknownHint(_) => "unknown_hint",
            SkipReason::Analysis(AnalysisError::NoReferences { .. }) => "no_references",
            SkipReason::Analysis(AnalysisError::InconsistentArity { .. }) => "inconsistent_arity",
            SkipReason::Synthesis(SynthesisError::UnreturnableOutput { .. }) => {
                "unreturnable_output"
            }
            SkipReason::Synthesis(SynthesisError::UnresolvableType { .. }) => "unresolvable_type",
            SkipReason::Synthesis(SynthesisError::ReservedIdentifier { .. }) => {
                "reserved_identifier"
            }
            SkipReason::Synthesis(
                SynthesisError::UnboundPlaceholder(_) | SynthesisError::UnknownPlaceholder(_),
            ) => "placeholder_binding",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::EmptyCatalog => write!(f, "the hint catalog is empty"),
            SkipReason::UnknownHint(id) => write!(f, "no hint with id {id}"),
            SkipReason::Analysis(err) => err.fmt(f),
            SkipReason::Synthesis(err) => err.fmt(f),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    Pass,
    Inconclusive(InconclusiveReason),
    Finding(Box<FindingRecord>),
    Skipped(SkipReason),
    Cancelled,
}

/// Outcome counts of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FuzzSummary {
    pub iterations: u64,
    pub passed: u64,
    pub findings: u64,
    pub cancelled: u64,
    pub inconclusive: BTreeMap<&'static str, u64>,
    pub skipped: BTreeMap<&'static str, u64>,
}

impl FuzzSummary {
    pub fn record(mut self, outcome: &IterationOutcome) -> Self {
        self.iterations += 1;
        match outcome {
            IterationOutcome::Pass => self.passed += 1,
            IterationOutcome::Finding(_) => self.findings += 1,
            IterationOutcome::Cancelled => self.cancelled += 1,
            IterationOutcome::Inconclusive(reason) => {
                *self.inconclusive.entry(reason.label()).or_default() += 1
            }
            IterationOutcome::Skipped(reason) => {
                *self.skipped.entry(reason.label()).or_default() += 1
            }
        }
        self
    }

    pub fn merge(mut self, other: Self) -> Self {
        self.iterations += other.iterations;
        self.passed += other.passed;
        self.findings += other.findings;
        self.cancelled += other.cancelled;
        for (label, count) in other.inconclusive {
            *self.inconclusive.entry(label).or_default() += count;
        }
        for (label, count) in other.skipped {
            *self.skipped.entry(label).or_default() += count;
        }
        self
    }

    pub fn inconclusive_total(&self) -> u64 {
        self.inconclusive.values().sum()
    }

    pub fn skipped_total(&self) -> u64 {
        self.skipped.values().sum()
    }
}

/// How much work one call to [`Fuzzer::run`] may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunBudget {
    pub iterations: u64,
    /// 0 lets rayon pick one thread per core.
    pub workers: usize,
    pub deadline: Option<Duration>,
}

/// Wall-clock limit of one run.
struct Deadline {
    at: Instant,
    reached: AtomicBool,
}

impl Deadline {
    fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            reached: AtomicBool::new(false),
        }
    }

    fn passed(&self) -> bool {
        if self.reached.load(Ordering::Relaxed) {
            return true;
        }
        if Instant::now() < self.at {
            return false;
        }
        if !self.reached.swap(true, Ordering::Relaxed) {
            info!("deadline reached, cancelling remaining iterations");
        }
        true
    }
}

/// Analyzes and synthesizes the program for one hint.
pub fn prepare(entry: &HintEntry) -> Result<SynthesizedProgram, SkipReason> {
    let signature = analyze(entry).map_err(SkipReason::Analysis)?;
    synthesize(entry, &signature).map_err(SkipReason::Synthesis)
}

/// The program and values iteration `seed` runs. The seed's stream picks
/// the hint first, so overriding it with `hint` leaves the values unchanged.
pub fn plan_iteration(
    catalog: &HintCatalog,
    seed: u64,
    hint: Option<HintId>,
) -> Result<(SynthesizedProgram, Vec<GeneratedValue>), SkipReason> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let selected = catalog.select(&mut rng).map(|entry| entry.id);
    let hint_id = hint.or(selected).ok_or(SkipReason::EmptyCatalog)?;
    let entry = catalog.get(hint_id).ok_or(SkipReason::UnknownHint(hint_id))?;
    let program = prepare(entry)?;
    let values = ValueGenerator::new(rng).generate(&program.placeholder_ids());
    Ok((program, values))
}

pub struct Fuzzer {
    catalog: Arc<HintCatalog>,
    compiler: Arc<dyn Compiler>,
    executor: DifferentialExecutor,
    findings: Option<Arc<FindingsLog>>,
    compile_timeout: Duration,
    cancel: Arc<AtomicBool>,
}

impl Fuzzer {
    pub fn new(
        catalog: Arc<HintCatalog>,
        compiler: Arc<dyn Compiler>,
        executor: DifferentialExecutor,
    ) -> Self {
        Self {
            catalog,
            compiler,
            executor,
            findings: None,
            compile_timeout: Duration::from_secs(60),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_findings(mut self, log: Arc<FindingsLog>) -> Self {
        self.findings = Some(log);
        self
    }

    pub fn with_compile_timeout(mut self, timeout: Duration) -> Self {
        self.compile_timeout = timeout;
        self
    }

    /// Flag that stops every run once set. Iterations in flight finish
    /// their current step and commit nothing further. A deadline never sets
    /// it; deadlines only end the run they belong to.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn should_stop(&self, deadline: Option<&Deadline>) -> bool {
        self.cancel.load(Ordering::Relaxed) || deadline.is_some_and(Deadline::passed)
    }

    /// Runs `budget.iterations` iterations whose seeds derive from
    /// `master_seed`.
    pub fn run(&self, master_seed: u64, budget: RunBudget) -> Result<FuzzSummary, FuzzError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(budget.workers)
            .thread_name(|index| format!("hintdiff-worker-{index}"))
            .build()?;
        let deadline = budget.deadline.map(Deadline::after);
        info!(
            master_seed,
            iterations = budget.iterations,
            workers = pool.current_num_threads(),
            hints = self.catalog.len(),
            "starting fuzz run"
        );

        let summary = pool.install(|| {
            (0..budget.iterations)
                .into_par_iter()
                .map(|index| {
                    self.iterate(iteration_seed(master_seed, index), None, deadline.as_ref())
                })
                .fold(FuzzSummary::default, |summary, outcome| summary.record(&outcome))
                .reduce(FuzzSummary::default, FuzzSummary::merge)
        });

        info!(
            iterations = summary.iterations,
            passed = summary.passed,
            findings = summary.findings,
            inconclusive = summary.inconclusive_total(),
            skipped = summary.skipped_total(),
            cancelled = summary.cancelled,
            "fuzz run finished"
        );
        Ok(summary)
    }

    /// Runs the single iteration identified by `seed`. `hint` overrides the
    /// selected hint without changing the values drawn.
    pub fn run_iteration(&self, seed: u64, hint: Option<HintId>) -> IterationOutcome {
        self.iterate(seed, hint, None)
    }

    fn iterate(
        &self,
        seed: u64,
        hint: Option<HintId>,
        deadline: Option<&Deadline>,
    ) -> IterationOutcome {
        let _span = debug_span!("iteration", seed).entered();
        if self.should_stop(deadline) {
            return IterationOutcome::Cancelled;
        }

        let (program, values) = match plan_iteration(&self.catalog, seed, hint) {
            Ok(prepared) => prepared,
            Err(reason) => {
                info!(
                    hint_id = ?reason.hint_id(),
                    reason = reason.label(),
                    detail = %reason,
                    "skipping iteration"
                );
                return IterationOutcome::Skipped(reason);
            }
        };
        let hint_id = program.hint_id;
        let text = match program.instantiate(&values) {
            Ok(text) => text,
            Err(err) => {
                let reason = SkipReason::Synthesis(err);
                info!(hint_id, reason = reason.label(), detail = %reason, "skipping iteration");
                return IterationOutcome::Skipped(reason);
            }
        };

        if self.should_stop(deadline) {
            return IterationOutcome::Cancelled;
        }
        let verdict = match self.compiler.compile(&text, self.compile_timeout) {
            Ok(artifact) => {
                if self.should_stop(deadline) {
                    return IterationOutcome::Cancelled;
                }
                self.executor.judge(&artifact).verdict
            }
            Err(err) => {
                let verdict = compile_verdict(&err, program.confidence);
                if program.confidence == Confidence::Approximate {
                    warn!(
                        hint_id,
                        error = %err,
                        "program with approximated types did not compile"
                    );
                }
                verdict
            }
        };

        match verdict {
            Verdict::Pass => IterationOutcome::Pass,
            Verdict::Inconclusive(reason) => {
                warn!(hint_id, seed, reason = reason.label(), "inconclusive iteration");
                IterationOutcome::Inconclusive(reason)
            }
            Verdict::Finding(detail) => {
                let record = FindingRecord::new(
                    hint_id,
                    seed,
                    &values,
                    text,
                    self.executor.engines().names(),
                    &detail,
                );
                if let Some(log) = &self.findings {
                    if let Err(err) = log.append(&record) {
                        error!(hint_id, seed, error = %err, "failed to persist finding");
                    }
                }
                IterationOutcome::Finding(Box::new(record))
            }
        }
    }
}

/// Analysis and synthesis result for one catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageEntry {
    pub hint_id: HintId,
    pub result: Result<Confidence, SkipReason>,
}

/// Runs analysis and synthesis over every catalog entry.
pub fn coverage(catalog: &HintCatalog) -> Vec<CoverageEntry> {
    catalog
        .entries()
        .par_iter()
        .map(|entry| CoverageEntry {
            hint_id: entry.id,
            result: prepare(entry).map(|program| program.confidence),
        })
        .collect()
}
