//! Lineage correction engine.
//!
//! Every correction is applied to a working copy of the index and only swapped
//! in once it fully succeeded, so a rejected operation leaves the index as it was.

use crate::error::{LineageError, Result};
use crate::lineage_index::LineageIndex;
use crate::position::DEFAULT_UM_PER_PIXEL;
use crate::record_table::RecordTable;
use lineage_protocol::{
    Batch, Capabilities, CellId, CollisionPolicy, OpId, OpResult, Operation, OperationRecord,
    PROTOCOL_VERSION, StepNum,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineParameters {
    pub collision_policy: CollisionPolicy,
    /// Reject any load or correction that leaves a parent reference dangling.
    pub strict_parents: bool,
}

pub trait Engine {
    fn apply(&mut self, op: Operation) -> Result<OpResult>;
    fn apply_batch(&mut self, batch: Batch) -> Result<Vec<OpResult>>;
    fn snapshot(&self) -> &LineageIndex;
}

#[derive(Debug, Default)]
struct Changes {
    steps: BTreeSet<StepNum>,
    cells: usize,
    messages: Vec<String>,
}

impl Changes {
    fn absorb(&mut self, other: Changes) {
        self.steps.extend(other.steps);
        self.cells += other.cells;
        self.messages.extend(other.messages);
    }
}

#[derive(Debug, Clone)]
pub struct CorrectionEngine {
    index: LineageIndex,
    parameters: EngineParameters,
    journal: Vec<OperationRecord>,
    op_counter: u64,
}

impl CorrectionEngine {
    pub fn new(index: LineageIndex, parameters: EngineParameters) -> Result<Self> {
        if parameters.strict_parents {
            index.validate_parents()?;
        }
        Ok(Self {
            index,
            parameters,
            journal: vec![],
            op_counter: 0,
        })
    }

    pub fn load(
        table: &RecordTable,
        expected_steps: Option<usize>,
        parameters: EngineParameters,
    ) -> Result<Self> {
        Self::new(LineageIndex::from_table(table, expected_steps)?, parameters)
    }

    pub fn index(&self) -> &LineageIndex {
        &self.index
    }

    pub fn operation_log(&self) -> &[OperationRecord] {
        &self.journal
    }

    pub fn capabilities() -> Capabilities {
        Capabilities {
            protocol_version: PROTOCOL_VERSION.to_string(),
            supported_operations: vec![
                "RenameCell".to_string(),
                "ReparentCell".to_string(),
                "ChangeCellInfo".to_string(),
            ],
            collision_policies: vec![CollisionPolicy::Reject, CollisionPolicy::Merge],
            default_um_per_pixel: DEFAULT_UM_PER_PIXEL,
        }
    }

    pub fn rename_cell(
        &mut self,
        step: StepNum,
        old_id: CellId,
        new_id: CellId,
    ) -> Result<OpResult> {
        self.apply(Operation::RenameCell {
            step,
            old_id,
            new_id,
        })
    }

    pub fn reparent_cell(
        &mut self,
        step: StepNum,
        cell_id: CellId,
        new_parent_id: CellId,
    ) -> Result<OpResult> {
        self.apply(Operation::ReparentCell {
            step,
            cell_id,
            new_parent_id,
        })
    }

    pub fn change_cell_info(
        &mut self,
        step: StepNum,
        cell_id: CellId,
        new_id: CellId,
        new_parent_id: CellId,
    ) -> Result<OpResult> {
        self.apply(Operation::ChangeCellInfo {
            step,
            cell_id,
            new_id,
            new_parent_id,
        })
    }

    fn next_op_id(&mut self) -> OpId {
        self.op_counter += 1;
        format!("op-{}", self.op_counter)
    }

    fn run_op(&self, index: &mut LineageIndex, op: &Operation) -> Result<Changes> {
        let changes = match *op {
            Operation::RenameCell {
                step,
                old_id,
                new_id,
            } => rename_in(index, step, old_id, new_id, self.parameters.collision_policy)?,
            Operation::ReparentCell {
                step,
                cell_id,
                new_parent_id,
            } => reparent_in(index, step, cell_id, new_parent_id)?,
            Operation::ChangeCellInfo {
                step,
                cell_id,
                new_id,
                new_parent_id,
            } => {
                let mut changes = Changes::default();
                if new_id != cell_id {
                    changes.absorb(rename_in(
                        index,
                        step,
                        cell_id,
                        new_id,
                        self.parameters.collision_policy,
                    )?);
                }
                let current_parent = index
                    .cell(step, new_id)
                    .map(|c| c.parent_id())
                    .ok_or(LineageError::CellNotFound {
                        step,
                        cell_id: new_id,
                    })?;
                if new_parent_id != current_parent {
                    changes.absorb(reparent_in(index, step, new_id, new_parent_id)?);
                }
                if changes.messages.is_empty() {
                    changes
                        .messages
                        .push(format!("Cell {cell_id} at step {step} is unchanged"));
                }
                changes
            }
        };
        if self.parameters.strict_parents {
            index.validate_parents()?;
        }
        Ok(changes)
    }

    fn finish(&mut self, run_id: &str, op: Operation, changes: Changes) -> OpResult {
        let result = OpResult {
            op_id: self.next_op_id(),
            changed_steps: changes.steps.into_iter().collect(),
            changed_cells: changes.cells,
            messages: changes.messages,
        };
        self.journal.push(OperationRecord {
            run_id: run_id.to_string(),
            op,
            result: result.clone(),
        });
        result
    }
}

impl Engine for CorrectionEngine {
    fn apply(&mut self, op: Operation) -> Result<OpResult> {
        let mut working = self.index.clone();
        let changes = self.run_op(&mut working, &op).map_err(|e| {
            tracing::warn!(op = op.name(), step = op.step(), error = %e, "correction rejected");
            e
        })?;
        self.index = working;
        Ok(self.finish("interactive", op, changes))
    }

    fn apply_batch(&mut self, batch: Batch) -> Result<Vec<OpResult>> {
        let mut working = self.index.clone();
        let mut staged = Vec::with_capacity(batch.ops.len());
        for op in batch.ops {
            match self.run_op(&mut working, &op) {
                Ok(changes) => staged.push((op, changes)),
                Err(e) => {
                    tracing::warn!(
                        run_id = %batch.run_id,
                        op = op.name(),
                        error = %e,
                        "batch rejected"
                    );
                    return Err(e);
                }
            }
        }
        self.index = working;
        Ok(staged
            .into_iter()
            .map(|(op, changes)| self.finish(&batch.run_id, op, changes))
            .collect())
    }

    fn snapshot(&self) -> &LineageIndex {
        &self.index
    }
}

fn require_cell(index: &LineageIndex, step: StepNum, cell_id: CellId) -> Result<()> {
    match index.cell(step, cell_id) {
        Some(_) => Ok(()),
        None => Err(LineageError::CellNotFound { step, cell_id }),
    }
}

fn rename_in(
    index: &mut LineageIndex,
    step: StepNum,
    old_id: CellId,
    new_id: CellId,
    policy: CollisionPolicy,
) -> Result<Changes> {
    require_cell(index, step, old_id)?;
    let mut changes = Changes::default();
    if old_id == new_id {
        changes
            .messages
            .push(format!("Cell {old_id} at step {step} is unchanged"));
        return Ok(changes);
    }
    if policy == CollisionPolicy::Reject {
        if let Some(entry) = index
            .steps()
            .filter(|e| e.step() >= step)
            .find(|e| e.contains(old_id) && e.contains(new_id))
        {
            return Err(LineageError::IdentityCollision {
                step: entry.step(),
                cell_id: new_id,
            });
        }
    }

    for entry in index.steps_from_mut(step) {
        let at = entry.step();
        let cells = entry.cells_mut();
        let mut touched = 0usize;
        let moved = match cells.remove(&old_id) {
            Some(record) => {
                if let Some(displaced) = cells.insert(new_id, record) {
                    tracing::warn!(
                        step = at,
                        cell_id = new_id,
                        row = displaced.row_index(),
                        "merged over existing cell"
                    );
                    changes.messages.push(format!(
                        "Step {at}: cell {new_id} (row {}) was replaced",
                        displaced.row_index()
                    ));
                }
                touched += 1;
                true
            }
            None => false,
        };
        for (cell_id, cell) in cells.iter_mut() {
            if cell.parent_id == old_id {
                cell.parent_id = new_id;
                if !(moved && *cell_id == new_id) {
                    touched += 1;
                }
            }
        }
        if touched > 0 {
            tracing::debug!(step = at, cells = touched, old_id, new_id, "renamed");
            changes.steps.insert(at);
            changes.cells += touched;
        }
    }
    changes.messages.push(format!(
        "Renamed cell {old_id} to {new_id} from step {step} on ({} step(s) changed)",
        changes.steps.len()
    ));
    Ok(changes)
}

fn reparent_in(
    index: &mut LineageIndex,
    step: StepNum,
    cell_id: CellId,
    new_parent_id: CellId,
) -> Result<Changes> {
    require_cell(index, step, cell_id)?;
    let mut changes = Changes::default();
    for entry in index.steps_from_mut(step) {
        let at = entry.step();
        if let Some(cell) = entry.cells_mut().get_mut(&cell_id) {
            if cell.parent_id != new_parent_id {
                cell.parent_id = new_parent_id;
                changes.steps.insert(at);
                changes.cells += 1;
            }
        }
    }
    tracing::debug!(
        step,
        cell_id,
        new_parent_id,
        steps = changes.steps.len(),
        "reparented"
    );
    changes.messages.push(format!(
        "Set parent of cell {cell_id} to {new_parent_id} from step {step} on ({} step(s) changed)",
        changes.steps.len()
    ));
    Ok(changes)
}
