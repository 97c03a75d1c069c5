//! Compiler and engines backed by external commands.
//!
//! Each call gets its own temporary directory holding the program source,
//! the compiled artifact and the memory dump, so concurrent runs never share
//! files. Command arguments are templates over `{source}`, `{artifact}` and
//! `{memory}`.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

use super::memory::MemorySnapshot;
use super::{Artifact, CompileError, Compiler, Engine, ErrorClass, ExecutionOutcome};

const SOURCE_FILE: &str = "program.cairo";
const ARTIFACT_FILE: &str = "program.json";
const MEMORY_FILE: &str = "memory.bin";
const STDOUT_FILE: &str = "stdout.log";
const STDERR_FILE: &str = "stderr.log";

/// Longest failure message kept from a child's output.
const MAX_MESSAGE_BYTES: usize = 4096;

/// A program and its argument templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandTemplate {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Substitutes every `{name}` in the arguments with the matching path.
    fn expand(&self, dir: &Path) -> Vec<String> {
        let vars = [
            ("{source}", dir.join(SOURCE_FILE)),
            ("{artifact}", dir.join(ARTIFACT_FILE)),
            ("{memory}", dir.join(MEMORY_FILE)),
        ];
        self.args
            .iter()
            .map(|arg| {
                vars.iter().fold(arg.clone(), |acc, (key, path)| {
                    acc.replace(key, &path.to_string_lossy())
                })
            })
            .collect()
    }
}

enum ChildExit {
    Finished { status: ExitStatus, output: String },
    TimedOut,
}

/// Runs `template` in `dir`, killing it once `timeout` elapses.
fn run_child(template: &CommandTemplate, dir: &Path, timeout: Duration) -> io::Result<ChildExit> {
    let stdout = File::create(dir.join(STDOUT_FILE))?;
    let stderr = File::create(dir.join(STDERR_FILE))?;
    let mut child = Command::new(&template.program)
        .args(template.expand(dir))
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .spawn()?;

    let status = match child.wait_timeout(timeout)? {
        Some(status) => status,
        None => {
            // the child may have exited between the timeout and the kill
            let _ = child.kill();
            child.wait()?;
            return Ok(ChildExit::TimedOut);
        }
    };

    let mut output = fs::read_to_string(dir.join(STDERR_FILE)).unwrap_or_default();
    let stdout = fs::read_to_string(dir.join(STDOUT_FILE)).unwrap_or_default();
    if !stdout.trim().is_empty() {
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&stdout);
    }
    Ok(ChildExit::Finished {
        status,
        output: truncate_message(output.trim()),
    })
}

fn truncate_message(message: &str) -> String {
    if message.len() <= MAX_MESSAGE_BYTES {
        return message.to_string();
    }
    let mut end = MAX_MESSAGE_BYTES;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &message[..end])
}

fn describe_status(status: ExitStatus) -> String {
    status
        .code()
        .map_or_else(|| "killed by signal".to_string(), |code| format!("exit status {code}"))
}

/// Compiles by running an external compiler command.
#[derive(Debug, Clone)]
pub struct ProcessCompiler {
    template: CommandTemplate,
}

impl ProcessCompiler {
    pub fn new(template: CommandTemplate) -> Self {
        Self { template }
    }
}

impl Compiler for ProcessCompiler {
    fn compile(&self, source: &str, timeout: Duration) -> Result<Artifact, CompileError> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join(SOURCE_FILE), source)?;

        match run_child(&self.template, dir.path(), timeout)? {
            ChildExit::TimedOut => Err(CompileError::Timeout(timeout)),
            ChildExit::Finished { status, output } if !status.success() => {
                Err(CompileError::Rejected {
                    message: format!("{}: {output}", describe_status(status)),
                })
            }
            ChildExit::Finished { .. } => {
                let bytes = fs::read(dir.path().join(ARTIFACT_FILE))?;
                let artifact = Artifact::new(bytes);
                debug!(artifact = %artifact.short_id(), "compiled program");
                Ok(artifact)
            }
        }
    }
}

/// Runs artifacts with an external engine command that dumps its final
/// memory to `{memory}`.
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    name: String,
    template: CommandTemplate,
}

impl ProcessEngine {
    pub fn new(name: impl Into<String>, template: CommandTemplate) -> Self {
        Self {
            name: name.into(),
            template,
        }
    }

    fn execute(&self, artifact: &Artifact, timeout: Duration) -> io::Result<ExecutionOutcome> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join(ARTIFACT_FILE), artifact.bytes())?;

        let (status, output) = match run_child(&self.template, dir.path(), timeout)? {
            ChildExit::TimedOut => {
                return Ok(ExecutionOutcome::failure(
                    ErrorClass::Timeout,
                    format!("no result within {timeout:?}"),
                ))
            }
            ChildExit::Finished { status, output } => (status, output),
        };

        if !status.success() {
            let class = match ErrorClass::classify(&output) {
                ErrorClass::Unclassified if status.code().is_none() => ErrorClass::Crash,
                class => class,
            };
            return Ok(ExecutionOutcome::failure(
                class,
                format!("{}: {output}", describe_status(status)),
            ));
        }

        let outcome = match fs::read(dir.path().join(MEMORY_FILE)) {
            Ok(bytes) => match MemorySnapshot::decode(&bytes) {
                Ok(snapshot) => {
                    let unreduced = snapshot.cells().find(|(_, v)| !v.is_canonical());
                    if let Some((address, value)) = unreduced {
                        warn!(
                            engine = %self.name,
                            address,
                            %value,
                            "engine wrote a value outside the field"
                        );
                    }
                    debug!(
                        engine = %self.name,
                        cells = snapshot.len(),
                        range = ?snapshot.written_range(),
                        "engine run finished"
                    );
                    ExecutionOutcome::Ok(snapshot)
                }
                Err(err) => ExecutionOutcome::failure(ErrorClass::Crash, err.to_string()),
            },
            Err(err) => ExecutionOutcome::failure(
                ErrorClass::Crash,
                format!("engine exited cleanly without a memory dump: {err}"),
            ),
        };
        Ok(outcome)
    }
}

impl Engine for ProcessEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, artifact: &Artifact, timeout: Duration) -> ExecutionOutcome {
        self.execute(artifact, timeout).unwrap_or_else(|err| {
            ExecutionOutcome::failure(
                ErrorClass::Unavailable,
                format!("could not run `{}`: {err}", self.template.program),
            )
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::felt::Felt;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn shell(script: &str) -> CommandTemplate {
        CommandTemplate::new("sh", &["-c", script])
    }

    #[test]
    fn expands_placeholders() {
        let template =
            CommandTemplate::new("x", &["--in={source}", "{artifact}", "{memory}", "plain"]);
        let args = template.expand(Path::new("/work"));
        assert_eq!(
            args,
            vec![
                "--in=/work/program.cairo".to_string(),
                "/work/program.json".to_string(),
                "/work/memory.bin".to_string(),
                "plain".to_string(),
            ]
        );
    }

    #[test]
    fn compiler_produces_artifact() {
        let compiler = ProcessCompiler::new(shell("cp {source} {artifact}"));
        let artifact = compiler.compile("func main() {\n}\n", TIMEOUT).unwrap();
        assert_eq!(artifact.bytes(), b"func main() {\n}\n");
    }

    #[test]
    fn compiler_rejection_keeps_message() {
        let compiler = ProcessCompiler::new(shell("echo 'Unknown identifier foo' >&2; exit 1"));
        match compiler.compile("", TIMEOUT) {
            Err(CompileError::Rejected { message }) => {
                assert!(message.contains("Unknown identifier foo"), "{message}");
                assert!(message.contains("exit status 1"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn compiler_timeout() {
        let compiler = ProcessCompiler::new(CommandTemplate::new("sleep", &["5"]));
        let result = compiler.compile("", Duration::from_millis(100));
        assert!(matches!(result, Err(CompileError::Timeout(_))));
    }

    #[test]
    fn engine_reads_memory_dump() {
        let mut snapshot = MemorySnapshot::new();
        snapshot.insert_cell(1, Felt::from(7u64));
        snapshot.insert_cell(2, Felt::from(u128::MAX));
        let artifact = Artifact::new(snapshot.encode());

        let engine = ProcessEngine::new("copy", shell("cp {artifact} {memory}"));
        assert_eq!(engine.name(), "copy");
        assert_eq!(engine.run(&artifact, TIMEOUT), ExecutionOutcome::Ok(snapshot));
    }

    #[test]
    fn engine_failures_are_classified() {
        let artifact = Artifact::new(Vec::new());
        let engine = ProcessEngine::new(
            "failing",
            shell("echo 'Value 5 is out of range check bounds' >&2; exit 1"),
        );
        match engine.run(&artifact, TIMEOUT) {
            ExecutionOutcome::Err { class, .. } => assert_eq!(class, ErrorClass::RangeCheck),
            other => panic!("unexpected {other:?}"),
        }

        let silent = ProcessEngine::new("silent", shell("true"));
        assert!(matches!(
            silent.run(&artifact, TIMEOUT),
            ExecutionOutcome::Err { class: ErrorClass::Crash, .. }
        ));

        let torn = ProcessEngine::new("torn", shell("printf abc > {memory}"));
        assert!(matches!(
            torn.run(&artifact, TIMEOUT),
            ExecutionOutcome::Err { class: ErrorClass::Crash, .. }
        ));
    }

    #[test]
    fn engine_timeout_and_missing_binary() {
        let artifact = Artifact::new(Vec::new());
        let slow = ProcessEngine::new("slow", CommandTemplate::new("sleep", &["5"]));
        assert!(matches!(
            slow.run(&artifact, Duration::from_millis(100)),
            ExecutionOutcome::Err { class: ErrorClass::Timeout, .. }
        ));

        let missing =
            ProcessEngine::new("missing", CommandTemplate::new("/nonexistent/engine", &[]));
        assert!(matches!(
            missing.run(&artifact, TIMEOUT),
            ExecutionOutcome::Err { class: ErrorClass::Unavailable, .. }
        ));
    }

    #[test]
    fn long_messages_are_truncated() {
        let long = "é".repeat(MAX_MESSAGE_BYTES);
        let truncated = truncate_message(&long);
        assert!(truncated.len() <= MAX_MESSAGE_BYTES + 3);
        assert!(truncated.ends_with("..."));
    }
}
