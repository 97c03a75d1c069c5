//! Findings log.
//!
//! Every confirmed finding is appended as one JSON object per line, carrying
//! enough to replay the iteration from its seed or to re-run the program
//! text by hand.

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::info;

use crate::catalog::HintId;
use crate::felt::Felt;
use crate::oracle::FindingDetail;
use crate::program::ast::PlaceholderId;
use crate::values::GeneratedValue;
use crate::vm::memory::Address;
use crate::vm::{EngineSlot, ErrorClass};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("findings log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize finding: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("findings log {path}, line {line}: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// A placeholder value. Values do not fit JSON numbers, so they are decimal
/// strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRecord {
    pub placeholder: PlaceholderId,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineNames {
    pub a: String,
    pub b: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetailRecord {
    MemoryMismatch {
        address: Address,
        a: Option<String>,
        b: Option<String>,
        differing_cells: usize,
    },
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
    CompileRejected {
        message: String,
    },
}

impl From<&FindingDetail> for DetailRecord {
    fn from(detail: &FindingDetail) -> Self {
        let felt = |value: &Option<Felt>| value.as_ref().map(Felt::to_string);
        match detail {
            FindingDetail::MemoryMismatch {
                address,
                a,
                b,
                differing_cells,
            } => DetailRecord::MemoryMismatch {
                address: *address,
                a: felt(a),
                b: felt(b),
                differing_cells: *differing_cells,
            },
            FindingDetail::InconsistentOutcome {
                failed,
                class,
                message,
            } => DetailRecord::InconsistentOutcome {
                failed: *failed,
                class: *class,
                message: message.clone(),
            },
            FindingDetail::DivergentErrorClass {
                a,
                b,
                a_message,
                b_message,
            } => DetailRecord::DivergentErrorClass {
                a: *a,
                b: *b,
                a_message: a_message.clone(),
                b_message: b_message.clone(),
            },
            FindingDetail::CompileRejected { message } => DetailRecord::CompileRejected {
                message: message.clone(),
            },
        }
    }
}

/// One line of the findings log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingRecord {
    pub hint_id: HintId,
    /// Iteration seed; `hintdiff replay --seed` reproduces the iteration.
    pub seed: u64,
    pub generated_values: Vec<ValueRecord>,
    pub program_text: String,
    pub engines: EngineNames,
    pub detail: DetailRecord,
}

impl FindingRecord {
    pub fn new(
        hint_id: HintId,
        seed: u64,
        values: &[GeneratedValue],
        program_text: String,
        [a, b]: [String; 2],
        detail: &FindingDetail,
    ) -> Self {
        Self {
            hint_id,
            seed,
            generated_values: values
                .iter()
                .map(|v| ValueRecord {
                    placeholder: v.placeholder,
                    value: v.value.to_string(),
                })
                .collect(),
            program_text,
            engines: EngineNames { a, b },
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.detail {
            DetailRecord::MemoryMismatch { .. } => "memory_mismatch",
            DetailRecord::InconsistentOutcome { .. } => "inconsistent_outcome",
            DetailRecord::DivergentErrorClass { .. } => "divergent_error_class",
            DetailRecord::CompileRejected { .. } => "compile_rejected",
        }
    }
}

/// Append-only JSON Lines sink shared by all workers.
pub struct FindingsLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FindingsLog {
    /// Opens `path` for appending, creating it if needed.
    pub fn open(path: &Path) -> Result<Self, ReportError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| ReportError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes one record as a single line. Concurrent appends never interleave.
    pub fn append(&self, record: &FindingRecord) -> Result<(), ReportError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let written = match writer.write_all(line.as_bytes()) {
            Ok(()) => writer.flush(),
            Err(err) => Err(err),
        };
        written.map_err(|source| ReportError::Io {
            path: self.path.clone(),
            source,
        })?;
        drop(writer);
        info!(
            hint_id = record.hint_id,
            seed = record.seed,
            kind = record.kind(),
            path = %self.path.display(),
            "finding recorded"
        );
        Ok(())
    }
}

/// Reads every record of a findings log.
pub fn read_findings(path: &Path) -> Result<Vec<FindingRecord>, ReportError> {
    let io_error = |source: std::io::Error| ReportError::Io {
        path: path.to_path_buf(),
        source,
    };
    let reader = BufReader::new(File::open(path).map_err(io_error)?);
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(io_error)?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|source| ReportError::Parse {
            path: path.to_path_buf(),
            line: index + 1,
            source,
        })?;
        records.push(record);
    }
    Ok(records)
}
