//! Static analysis of hint snippets.
//!
//! Discovers every `ids.*` reference chain in a hint and classifies each
//! referenced root variable as an input (read by the hint) or an output
//! (written by the hint). A root that is written anywhere is an output, even
//! if it is also read, so the synthesized program returns its final value.

pub mod scan;

use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::catalog::{HintEntry, HintId};
use scan::ScannedLine;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error("hint {hint_id} references no ids.* variables")]
    NoReferences { hint_id: HintId },
    #[error("hint {hint_id} accesses `{root}` with differing field depths {arities:?}")]
    InconsistentArity {
        hint_id: HintId,
        root: String,
        arities: Vec<usize>,
    },
}

/// Direction of data flow between the Cairo program and the hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Input,
    Output,
}

/// A single `ids.<root>.<field_path>` access with the role of its root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableRef {
    pub root_name: String,
    pub field_path: Vec<String>,
    pub role: Role,
}

/// All accesses of one root variable, reduced to a single role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootVariable {
    pub name: String,
    pub role: Role,
    /// Deduplicated, sorted. A bare `ids.<root>` access is the empty path.
    pub field_paths: Vec<Vec<String>>,
    /// The root appears inside the arguments of a `pack(...)` call.
    pub packed: bool,
}

impl RootVariable {
    /// Depth of every field path of this root.
    pub fn arity(&self) -> usize {
        self.field_paths.first().map_or(0, Vec::len)
    }

    pub fn refs(&self) -> impl Iterator<Item = VariableRef> + '_ {
        self.field_paths.iter().map(|path| VariableRef {
            root_name: self.name.clone(),
            field_path: path.clone(),
            role: self.role,
        })
    }
}

/// The input/output partition of one hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HintSignature {
    pub hint_id: HintId,
    /// Sorted by root name.
    pub roots: Vec<RootVariable>,
}

impl HintSignature {
    pub fn inputs(&self) -> impl Iterator<Item = &RootVariable> {
        self.roots.iter().filter(|root| root.role == Role::Input)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &RootVariable> {
        self.roots.iter().filter(|root| root.role == Role::Output)
    }

    pub fn root(&self, name: &str) -> Option<&RootVariable> {
        self.roots.iter().find(|root| root.name == name)
    }
}

#[derive(Default)]
struct RootUsage {
    written: bool,
    packed: bool,
    paths: BTreeSet<Vec<String>>,
}

/// Classifies the variables referenced by `entry`.
pub fn analyze(entry: &HintEntry) -> Result<HintSignature, AnalysisError> {
    let mut usage: BTreeMap<String, RootUsage> = BTreeMap::new();

    let mut depth = 0;
    for line in &entry.source_lines {
        let scanned = ScannedLine::with_depth(line, depth);
        depth = scanned.closing_depth();
        let references = scanned.references();
        if references.is_empty() {
            continue;
        }
        let operator = scanned.assignment_operator();
        let packs = scanned.pack_arguments();

        for reference in references {
            let written = operator
                .as_ref()
                .is_some_and(|op| reference.span.end <= op.start);
            let packed = packs
                .iter()
                .any(|args| args.start <= reference.span.start && reference.span.end <= args.end);

            let root = usage.entry(reference.root).or_default();
            root.written |= written;
            root.packed |= packed;
            root.paths.insert(reference.fields);
        }
    }

    if usage.is_empty() {
        return Err(AnalysisError::NoReferences { hint_id: entry.id });
    }

    let mut roots = Vec::with_capacity(usage.len());
    for (name, root) in usage {
        let arities: BTreeSet<usize> = root.paths.iter().map(Vec::len).collect();
        if arities.len() > 1 {
            return Err(AnalysisError::InconsistentArity {
                hint_id: entry.id,
                root: name,
                arities: arities.into_iter().collect(),
            });
        }
        roots.push(RootVariable {
            name,
            role: if root.written { Role::Output } else { Role::Input },
            field_paths: root.paths.into_iter().collect(),
            packed: root.packed,
        });
    }

    Ok(HintSignature {
        hint_id: entry.id,
        roots,
    })
}
