//! Wrapper program synthesis.
//!
//! Given the input/output partition of a hint, builds a program in which
//! `main` constructs every input from placeholders and calls a helper whose
//! body is the unmodified hint, with every output declared as a local the
//! hint fills in and the helper returns.

use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use super::ast::{Expr, Function, Param, Pattern, PlaceholderId, Program, Statement, StructDef};
use super::render::{render, Bindings};
use super::types::{resolve_shape, CairoType, Shape, GENERATED_STRUCT_PREFIX, VOCABULARY};
use crate::analyzer::{HintSignature, Role, RootVariable, VariableRef};
use crate::catalog::{HintEntry, HintId};
use crate::values::GeneratedValue;

pub const ENTRY_FUNCTION: &str = "main";
pub const HINT_FUNCTION: &str = "fuzz_hint";

/// Cairo 0 keywords and builtin names a hint variable may not shadow.
const CAIRO_RESERVED: &[&str] = &[
    "alloc_locals", "and", "ap", "as", "assert", "call", "cast", "codeoffset", "const", "dw",
    "else", "felt", "fp", "from", "func", "if", "import", "jmp", "let", "local", "member",
    "namespace", "new", "nondet", "pc", "rel", "abs", "ret", "return", "static_assert",
    "struct", "tempvar", "using", "with", "with_attr",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisError {
    #[error("hint {hint_id}: output `{root}` has no fields and cannot be returned")]
    UnreturnableOutput { hint_id: HintId, root: String },
    #[error("hint {hint_id}: cannot resolve a type for `{root}`: {detail}")]
    UnresolvableType {
        hint_id: HintId,
        root: String,
        detail: String,
    },
    #[error("hint {hint_id}: identifier `{name}` collides with a reserved name")]
    ReservedIdentifier { hint_id: HintId, name: String },
    #[error("no value bound to placeholder {0}")]
    UnboundPlaceholder(PlaceholderId),
    #[error("value supplied for unknown placeholder {0}")]
    UnknownPlaceholder(PlaceholderId),
}

/// Whether the program is believed to compile by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Confidence {
    /// Every root matched the vocabulary exactly.
    Exact,
    /// At least one root was coerced or given a generated struct.
    Approximate,
}

/// A randomized input slot and the input leaf it initializes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub id: PlaceholderId,
    pub binding: VariableRef,
}

#[derive(Debug, Clone)]
pub struct SynthesizedProgram {
    pub hint_id: HintId,
    pub program: Program,
    /// Rendered with placeholder tokens.
    pub text: String,
    pub placeholders: Vec<Placeholder>,
    pub input_schema: Vec<VariableRef>,
    pub output_schema: Vec<VariableRef>,
    pub confidence: Confidence,
}

impl SynthesizedProgram {
    pub fn placeholder_ids(&self) -> Vec<PlaceholderId> {
        self.placeholders.iter().map(|p| p.id).collect()
    }

    /// Renders the program with every placeholder replaced by its value.
    pub fn instantiate(&self, values: &[GeneratedValue]) -> Result<String, SynthesisError> {
        let known: BTreeSet<PlaceholderId> = self.placeholders.iter().map(|p| p.id).collect();
        let mut bound = BTreeMap::new();
        for value in values {
            if !known.contains(&value.placeholder) {
                return Err(SynthesisError::UnknownPlaceholder(value.placeholder));
            }
            bound.insert(value.placeholder, value.value);
        }
        render(&self.program, Bindings::Values(&bound)).map_err(SynthesisError::UnboundPlaceholder)
    }
}

fn check_identifier(hint_id: HintId, name: &str) -> Result<(), SynthesisError> {
    let reserved = CAIRO_RESERVED.contains(&name)
        || VOCABULARY.contains(&name)
        || name.starts_with(GENERATED_STRUCT_PREFIX)
        || name == ENTRY_FUNCTION
        || name == HINT_FUNCTION;
    if reserved {
        return Err(SynthesisError::ReservedIdentifier {
            hint_id,
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Builds the value expression for an input of type `ty`, allocating one
/// placeholder per felt leaf.
fn input_value(
    ty: &CairoType,
    root: &str,
    path: &mut Vec<String>,
    placeholders: &mut Vec<Placeholder>,
) -> Expr {
    if *ty == CairoType::Felt {
        let id = placeholders.len();
        placeholders.push(Placeholder {
            id,
            binding: VariableRef {
                root_name: root.to_string(),
                field_path: path.clone(),
                role: Role::Input,
            },
        });
        return Expr::Placeholder(id);
    }
    let fields = ty
        .members()
        .into_iter()
        .map(|(member, member_ty)| {
            path.push(member.clone());
            let value = input_value(&member_ty, root, path, placeholders);
            path.pop();
            (member, value)
        })
        .collect();
    Expr::Construct {
        ty: ty.name().to_string(),
        fields,
    }
}

/// Builds the wrapper program for `entry`, whose analysis is `signature`.
pub fn synthesize(
    entry: &HintEntry,
    signature: &HintSignature,
) -> Result<SynthesizedProgram, SynthesisError> {
    let hint_id = signature.hint_id;
    let mut confidence = Confidence::Exact;
    let mut generated: Vec<Vec<String>> = Vec::new();
    let mut typed: Vec<(&RootVariable, CairoType)> = Vec::with_capacity(signature.roots.len());

    for root in &signature.roots {
        check_identifier(hint_id, &root.name)?;
        let ty = match resolve_shape(root) {
            Shape::Known { ty, exact } => {
                if !exact {
                    confidence = Confidence::Approximate;
                }
                ty
            }
            Shape::Generated { members } => {
                for member in &members {
                    check_identifier(hint_id, member)?;
                }
                confidence = Confidence::Approximate;
                let index = match generated.iter().position(|m| *m == members) {
                    Some(index) => index,
                    None => {
                        generated.push(members.clone());
                        generated.len() - 1
                    }
                };
                CairoType::Generated {
                    name: format!("{GENERATED_STRUCT_PREFIX}{index}"),
                    members,
                }
            }
            Shape::Unresolvable { detail } => {
                return Err(SynthesisError::UnresolvableType {
                    hint_id,
                    root: root.name.clone(),
                    detail,
                });
            }
        };
        if root.role == Role::Output && ty == CairoType::Felt {
            return Err(SynthesisError::UnreturnableOutput {
                hint_id,
                root: root.name.clone(),
            });
        }
        typed.push((root, ty));
    }

    let mut used: BTreeSet<CairoType> = typed
        .iter()
        .map(|(_, ty)| ty.clone())
        .filter(|ty| *ty != CairoType::Felt)
        .collect();
    if used.contains(&CairoType::SecpPoint) {
        used.insert(CairoType::BigInt3);
    }
    let structs = used
        .iter()
        .map(|ty| StructDef {
            name: ty.name().to_string(),
            members: ty
                .members()
                .into_iter()
                .map(|(member, member_ty)| (member, member_ty.name().to_string()))
                .collect(),
        })
        .collect();

    let inputs: Vec<_> = typed.iter().filter(|(r, _)| r.role == Role::Input).collect();
    let outputs: Vec<_> = typed.iter().filter(|(r, _)| r.role == Role::Output).collect();

    let mut placeholders = Vec::new();
    let mut main_body = Vec::new();
    for (root, ty) in &inputs {
        let value = input_value(ty, &root.name, &mut Vec::new(), &mut placeholders);
        main_body.push(Statement::Let {
            pattern: Pattern::Single(root.name.clone()),
            value,
        });
    }
    let call = Expr::Call {
        function: HINT_FUNCTION.to_string(),
        args: inputs.iter().map(|(r, _)| Expr::Ident(r.name.clone())).collect(),
    };
    let output_names: Vec<String> = outputs.iter().map(|(r, _)| r.name.clone()).collect();
    main_body.push(match output_names.as_slice() {
        [] => Statement::Expr(call),
        [single] => Statement::Let {
            pattern: Pattern::Single(single.clone()),
            value: call,
        },
        many => Statement::Let {
            pattern: Pattern::Tuple(many.to_vec()),
            value: call,
        },
    });
    main_body.push(Statement::Return(Vec::new()));

    let mut hint_body = vec![Statement::AllocLocals];
    for (root, ty) in &outputs {
        hint_body.push(Statement::Local {
            name: root.name.clone(),
            ty: ty.name().to_string(),
        });
    }
    hint_body.push(Statement::Hint(entry.source_lines.clone()));
    hint_body.push(Statement::Return(
        output_names.iter().cloned().map(Expr::Ident).collect(),
    ));

    let program = Program {
        structs,
        functions: vec![
            Function {
                name: ENTRY_FUNCTION.to_string(),
                params: Vec::new(),
                returns: Vec::new(),
                body: main_body,
            },
            Function {
                name: HINT_FUNCTION.to_string(),
                params: inputs
                    .iter()
                    .map(|(r, ty)| Param {
                        name: r.name.clone(),
                        ty: ty.name().to_string(),
                    })
                    .collect(),
                returns: outputs.iter().map(|(_, ty)| ty.name().to_string()).collect(),
                body: hint_body,
            },
        ],
    };

    // Token rendering binds every placeholder, so this cannot fail.
    let text = render(&program, Bindings::Tokens).map_err(SynthesisError::UnboundPlaceholder)?;

    Ok(SynthesizedProgram {
        hint_id,
        program,
        text,
        placeholders,
        input_schema: signature.inputs().flat_map(RootVariable::refs).collect(),
        output_schema: signature.outputs().flat_map(RootVariable::refs).collect(),
        confidence,
    })
}
