//! Memory snapshots recorded by an engine run.
//!
//! Engines dump their relocated memory as a flat sequence of records, each an
//! 8-byte little-endian address followed by a 32-byte little-endian value.
//! Unwritten cells are simply absent.

use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::felt::{Felt, FELT_BYTES};

/// Relocated memory address.
pub type Address = u64;

const ADDRESS_BYTES: usize = 8;
/// Size of one dump record.
pub const RECORD_BYTES: usize = ADDRESS_BYTES + FELT_BYTES;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryDecodeError {
    #[error("memory dump of {len} bytes ends inside a record at offset {offset}")]
    Truncated { offset: usize, len: usize },
    #[error("address {0} is written twice in the memory dump")]
    DuplicateAddress(Address),
}

/// One cell where two snapshots disagree. `None` means the cell is unwritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellDifference {
    pub address: Address,
    pub left: Option<Felt>,
    pub right: Option<Felt>,
}

/// Final memory of one execution, address to value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemorySnapshot {
    cells: BTreeMap<Address, Felt>,
}

impl MemorySnapshot {
    /// Creates an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the value of one cell, replacing any previous value.
    pub fn insert_cell(&mut self, address: Address, value: Felt) {
        self.cells.insert(address, value);
    }

    /// Number of written cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Written cells in ascending address order.
    pub fn cells(&self) -> impl Iterator<Item = (Address, &Felt)> {
        self.cells.iter().map(|(address, value)| (*address, value))
    }

    /// Lowest and highest written address.
    pub fn written_range(&self) -> Option<(Address, Address)> {
        let first = self.cells.keys().next()?;
        let last = self.cells.keys().next_back()?;
        Some((*first, *last))
    }

    /// Parses an engine memory dump.
    pub fn decode(bytes: &[u8]) -> Result<Self, MemoryDecodeError> {
        if bytes.len() % RECORD_BYTES != 0 {
            return Err(MemoryDecodeError::Truncated {
                offset: bytes.len() - bytes.len() % RECORD_BYTES,
                len: bytes.len(),
            });
        }
        let mut snapshot = Self::new();
        for record in bytes.chunks_exact(RECORD_BYTES) {
            let mut address = [0u8; ADDRESS_BYTES];
            address.copy_from_slice(&record[..ADDRESS_BYTES]);
            let address = Address::from_le_bytes(address);

            let mut value = [0u8; FELT_BYTES];
            value.copy_from_slice(&record[ADDRESS_BYTES..]);

            if snapshot.cells.insert(address, Felt::from_le_bytes(&value)).is_some() {
                return Err(MemoryDecodeError::DuplicateAddress(address));
            }
        }
        Ok(snapshot)
    }

    /// Serializes to the engine dump format, in address order.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.cells.len() * RECORD_BYTES);
        for (address, value) in &self.cells {
            out.extend_from_slice(&address.to_le_bytes());
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    /// Every cell of either snapshot whose value differs, in address order.
    pub fn differences(&self, other: &Self) -> Vec<CellDifference> {
        let addresses: BTreeSet<Address> = self
            .cells
            .keys()
            .chain(other.cells.keys())
            .copied()
            .collect();
        addresses
            .into_iter()
            .filter_map(|address| {
                let left = self.cells.get(&address);
                let right = other.cells.get(&address);
                (left != right).then(|| CellDifference {
                    address,
                    left: left.cloned(),
                    right: right.cloned(),
                })
            })
            .collect()
    }
}
