//! Shared machine-readable contracts for the cell lineage correction engine.
//!
//! Everything here is plain serde data so that shells, scripts and any
//! viewer front end can exchange operations and results as JSON.

use serde::{Deserialize, Serialize};

/// 1-based index of an image in the tracked sequence.
pub type StepNum = u32;
/// Tracked cell identifier. `0` is reserved as the "no parent" marker.
pub type CellId = i64;
pub type OpId = String;

pub const ROOT_PARENT: CellId = 0;
pub const PROTOCOL_VERSION: &str = "v1";

/// What to do when a rename targets an id that is already present at a
/// step being rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    #[default]
    Reject,
    /// The renamed record replaces the existing one; the displaced record
    /// drops out of the index.
    Merge,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    RenameCell {
        step: StepNum,
        old_id: CellId,
        new_id: CellId,
    },
    ReparentCell {
        step: StepNum,
        cell_id: CellId,
        new_parent_id: CellId,
    },
    ChangeCellInfo {
        step: StepNum,
        cell_id: CellId,
        new_id: CellId,
        new_parent_id: CellId,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RenameCell { .. } => "RenameCell",
            Self::ReparentCell { .. } => "ReparentCell",
            Self::ChangeCellInfo { .. } => "ChangeCellInfo",
        }
    }

    pub fn step(&self) -> StepNum {
        match self {
            Self::RenameCell { step, .. }
            | Self::ReparentCell { step, .. }
            | Self::ChangeCellInfo { step, .. } => *step,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpResult {
    pub op_id: OpId,
    /// Steps whose entries were modified, ascending.
    pub changed_steps: Vec<StepNum>,
    /// Number of (step, cell) entries whose id or parent changed.
    pub changed_cells: usize,
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub run_id: String,
    pub ops: Vec<Operation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub run_id: String,
    pub op: Operation,
    pub result: OpResult,
}

/// One label the viewer draws on top of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayLabel {
    pub cell_id: CellId,
    pub x_px: i64,
    pub y_px: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    SchemaMismatch,
    CellNotFound,
    DuplicateCellId,
    IdentityCollision,
    UnmappedRow,
    DanglingParent,
    InvalidInput,
    Io,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub protocol_version: String,
    pub supported_operations: Vec<String>,
    pub collision_policies: Vec<CollisionPolicy>,
    pub default_um_per_pixel: f64,
}
