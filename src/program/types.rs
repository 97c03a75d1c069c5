//! Cairo types the synthesizer can declare for hint variables.

use std::collections::BTreeSet;

use crate::analyzer::RootVariable;

/// Limb names of the three-limb bigint representation.
pub const LIMBS: [&str; 3] = ["d0", "d1", "d2"];
const UINT256_FIELDS: [&str; 2] = ["low", "high"];
const POINT_FIELDS: [&str; 2] = ["x", "y"];

/// Prefix of struct names generated for field sets outside the vocabulary.
pub const GENERATED_STRUCT_PREFIX: &str = "FuzzStruct";

/// Names of every vocabulary struct, in declaration order.
pub const VOCABULARY: [&str; 4] = ["BigInt3", "Uint256", "EcPoint", "SecpPoint"];

/// Variant order is declaration order: dependencies before dependents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CairoType {
    Felt,
    /// `{d0, d1, d2}`, the secp bigint.
    BigInt3,
    /// `{low, high}`.
    Uint256,
    /// `{x, y}` with felt coordinates.
    EcPoint,
    /// `{x, y}` with bigint coordinates.
    SecpPoint,
    /// Felt-only struct declared just for this program.
    Generated { name: String, members: Vec<String> },
}

impl CairoType {
    pub fn name(&self) -> &str {
        match self {
            CairoType::Felt => "felt",
            CairoType::BigInt3 => VOCABULARY[0],
            CairoType::Uint256 => VOCABULARY[1],
            CairoType::EcPoint => VOCABULARY[2],
            CairoType::SecpPoint => VOCABULARY[3],
            CairoType::Generated { name, .. } => name,
        }
    }

    /// Members in declaration order; empty for `felt`.
    pub fn members(&self) -> Vec<(String, CairoType)> {
        let felts = |names: &[&str]| {
            names
                .iter()
                .map(|n| (n.to_string(), CairoType::Felt))
                .collect::<Vec<_>>()
        };
        match self {
            CairoType::Felt => Vec::new(),
            CairoType::BigInt3 => felts(&LIMBS),
            CairoType::Uint256 => felts(&UINT256_FIELDS),
            CairoType::EcPoint => felts(&POINT_FIELDS),
            CairoType::SecpPoint => POINT_FIELDS
                .iter()
                .map(|n| (n.to_string(), CairoType::BigInt3))
                .collect(),
            CairoType::Generated { members, .. } => members
                .iter()
                .map(|n| (n.clone(), CairoType::Felt))
                .collect(),
        }
    }

    /// Number of felts a value of this type occupies.
    pub fn leaf_count(&self) -> usize {
        match self {
            CairoType::Felt => 1,
            other => other.members().iter().map(|(_, ty)| ty.leaf_count()).sum(),
        }
    }
}

/// Result of matching a root's observed field shape against the vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    Known { ty: CairoType, exact: bool },
    /// Depth-one field set outside the vocabulary.
    Generated { members: Vec<String> },
    Unresolvable { detail: String },
}

fn subset_of(fields: &BTreeSet<&str>, allowed: &[&str]) -> bool {
    fields.iter().all(|f| allowed.contains(f))
}

/// Matches the field shape of `root` to a Cairo type.
pub fn resolve_shape(root: &RootVariable) -> Shape {
    let known = |ty, exact| Shape::Known { ty, exact };
    let outer: BTreeSet<&str> = root
        .field_paths
        .iter()
        .filter_map(|path| path.first().map(String::as_str))
        .collect();

    match root.arity() {
        0 if root.packed => known(CairoType::BigInt3, true),
        0 => known(CairoType::Felt, true),
        1 if subset_of(&outer, &LIMBS) => known(CairoType::BigInt3, true),
        // pack() only accepts bigints; the accessed fields cannot be honoured
        1 if root.packed => known(CairoType::BigInt3, false),
        1 if subset_of(&outer, &UINT256_FIELDS) => known(CairoType::Uint256, true),
        1 if subset_of(&outer, &POINT_FIELDS) => known(CairoType::EcPoint, true),
        1 => Shape::Generated {
            members: outer.into_iter().map(str::to_owned).collect(),
        },
        2 => {
            let inner: BTreeSet<&str> = root
                .field_paths
                .iter()
                .filter_map(|path| path.get(1).map(String::as_str))
                .collect();
            if subset_of(&outer, &POINT_FIELDS) && subset_of(&inner, &LIMBS) {
                known(CairoType::SecpPoint, true)
            } else {
                Shape::Unresolvable {
                    detail: format!(
                        "nested fields {:?}.{:?} match no known struct",
                        outer, inner
                    ),
                }
            }
        }
        depth => Shape::Unresolvable {
            detail: format!("field paths of depth {depth} are not supported"),
        },
    }
}
