use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing::subscriber::set_global_default;
use tracing_subscriber::EnvFilter;

use hintdiff::catalog::{HintCatalog, HintId};
use hintdiff::config::FuzzConfig;
use hintdiff::fuzzer::{coverage, plan_iteration, Fuzzer, IterationOutcome, RunBudget};
use hintdiff::oracle::DifferentialExecutor;
use hintdiff::program::render::placeholder_token;
use hintdiff::report::FindingsLog;
use hintdiff::vm::process::{ProcessCompiler, ProcessEngine};
use hintdiff::vm::EnginePair;

#[derive(Parser)]
#[command(
    name = "hintdiff",
    about = "Differential fuzzer for Cairo hints across two VM engines"
)]
struct Cli {
    #[command(flatten)]
    shared: SharedArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct SharedArgs {
    /// TOML config file. Defaults apply when absent.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Hint whitelist file or directory, overriding the config.
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the fuzz loop.
    Run {
        #[arg(long)]
        iterations: Option<u64>,
        /// Master seed; random when absent.
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Stop after this many seconds.
        #[arg(long)]
        deadline_secs: Option<u64>,
        #[arg(long)]
        findings: Option<PathBuf>,
        /// Commit findings without re-running both engines.
        #[arg(long)]
        no_confirm: bool,
    },
    /// Re-run a single iteration from its seed.
    Replay {
        #[arg(long)]
        seed: u64,
        #[arg(long)]
        hint: Option<HintId>,
    },
    /// Print the program synthesized for a hint.
    Synth {
        #[arg(long)]
        hint: HintId,
        /// Bind placeholders with the values this iteration seed draws.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Analyze and synthesize every hint and report which ones are skipped.
    Coverage,
    /// Print the default configuration as TOML.
    GenerateConfig,
}

fn load_config(shared: &SharedArgs) -> anyhow::Result<FuzzConfig> {
    let mut config = match &shared.config {
        Some(path) => FuzzConfig::load(path)?,
        None => FuzzConfig::default(),
    };
    if let Some(catalog) = &shared.catalog {
        config.catalog = catalog.clone();
    }
    Ok(config)
}

fn load_catalog(config: &FuzzConfig) -> anyhow::Result<Arc<HintCatalog>> {
    let catalog = HintCatalog::load(&config.catalog)
        .with_context(|| format!("Failed to load hint catalog {}", config.catalog.display()))?;
    info!(hints = catalog.len(), path = %config.catalog.display(), "loaded hint catalog");
    Ok(Arc::new(catalog))
}

fn build_fuzzer(config: &FuzzConfig, catalog: Arc<HintCatalog>) -> Fuzzer {
    let engines = EnginePair::new(
        Arc::new(ProcessEngine::new(
            config.engine_a.name.clone(),
            config.engine_a.command.clone(),
        )),
        Arc::new(ProcessEngine::new(
            config.engine_b.name.clone(),
            config.engine_b.command.clone(),
        )),
    );
    let mut executor = DifferentialExecutor::new(engines, config.timeout());
    if !config.confirm_findings {
        executor = executor.without_confirmation();
    }
    Fuzzer::new(
        catalog,
        Arc::new(ProcessCompiler::new(config.compiler.clone())),
        executor,
    )
    .with_compile_timeout(config.compile_timeout())
}

fn main() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .finish();
    set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            iterations,
            seed,
            workers,
            timeout_ms,
            deadline_secs,
            findings,
            no_confirm,
        } => {
            let mut config = load_config(&cli.shared)?;
            config.iterations = iterations.unwrap_or(config.iterations);
            config.seed = seed.or(config.seed);
            config.workers = workers.unwrap_or(config.workers);
            config.timeout_ms = timeout_ms.unwrap_or(config.timeout_ms);
            config.deadline_secs = deadline_secs.or(config.deadline_secs);
            config.findings = findings.unwrap_or(config.findings);
            config.confirm_findings &= !no_confirm;
            config.validate()?;

            let catalog = load_catalog(&config)?;
            let log = FindingsLog::open(&config.findings)?;
            let fuzzer = build_fuzzer(&config, catalog).with_findings(Arc::new(log));
            let master_seed = config.seed.unwrap_or_else(rand::random);
            let summary = fuzzer.run(
                master_seed,
                RunBudget {
                    iterations: config.iterations,
                    workers: config.workers,
                    deadline: config.deadline(),
                },
            )?;
            println!("master seed: {master_seed}");
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Command::Replay { seed, hint } => {
            let config = load_config(&cli.shared)?;
            let catalog = load_catalog(&config)?;
            let fuzzer = build_fuzzer(&config, catalog);
            match fuzzer.run_iteration(seed, hint) {
                IterationOutcome::Finding(record) => {
                    println!("{}", serde_json::to_string_pretty(&record)?);
                }
                IterationOutcome::Pass => println!("pass"),
                IterationOutcome::Inconclusive(reason) => println!("inconclusive: {reason:?}"),
                IterationOutcome::Skipped(reason) => println!("skipped: {reason}"),
                IterationOutcome::Cancelled => println!("cancelled"),
            }
        }

        Command::Synth { hint, seed } => {
            let config = load_config(&cli.shared)?;
            let catalog = load_catalog(&config)?;
            let (program, values) = match plan_iteration(&catalog, seed.unwrap_or(0), Some(hint)) {
                Ok(planned) => planned,
                Err(reason) => bail!("hint {hint} cannot be synthesized: {reason}"),
            };
            println!("// hint {hint}, confidence {:?}", program.confidence);
            for placeholder in &program.placeholders {
                let binding = &placeholder.binding;
                let path: String = binding.field_path.iter().map(|f| format!(".{f}")).collect();
                println!("// {} -> {}{path}", placeholder_token(placeholder.id), binding.root_name);
            }
            match seed {
                Some(_) => print!("{}", program.instantiate(&values)?),
                None => print!("{}", program.text),
            }
        }

        Command::Coverage => {
            let config = load_config(&cli.shared)?;
            let catalog = load_catalog(&config)?;
            let report = coverage(&catalog);
            let mut supported = 0;
            for entry in &report {
                match &entry.result {
                    Ok(confidence) => {
                        supported += 1;
                        println!("{:>5}  ok    {confidence:?}", entry.hint_id);
                    }
                    Err(reason) => {
                        println!("{:>5}  skip  {}: {reason}", entry.hint_id, reason.label())
                    }
                }
            }
            println!("{supported}/{} hints synthesized", report.len());
        }

        Command::GenerateConfig => {
            let config = FuzzConfig::default();
            let config_toml = config
                .to_toml()
                .context("Failed to serialize default configuration to TOML.")?;
            println!("{config_toml}");
        }
    }

    Ok(())
}
