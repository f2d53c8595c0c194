//! Step-indexed view of the tracking table.
//!
//! `LineageIndex` maps every step in `[1, total_steps]` to the cells present at
//! that step. It is built once from a [`RecordTable`] and afterwards only
//! changed through the correction engine.

use crate::error::{LineageError, Result};
use crate::position::Position;
use crate::record_table::{CellRecord, RecordTable};
use lineage_protocol::{CellId, ROOT_PARENT, StepNum};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet, btree_map::Entry};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellEntry {
    row_index: usize,
    pub(crate) parent_id: CellId,
    position: Position,
}

impl CellEntry {
    /// Row of the source table this entry is written back to. Never changes.
    pub fn row_index(&self) -> usize {
        self.row_index
    }

    pub fn parent_id(&self) -> CellId {
        self.parent_id
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn is_root(&self) -> bool {
        self.parent_id == ROOT_PARENT
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepEntry {
    step: StepNum,
    cells: BTreeMap<CellId, CellEntry>,
}

impl StepEntry {
    fn new(step: StepNum) -> Self {
        Self {
            step,
            cells: BTreeMap::new(),
        }
    }

    pub fn step(&self) -> StepNum {
        self.step
    }

    pub fn get(&self, cell_id: CellId) -> Option<&CellEntry> {
        self.cells.get(&cell_id)
    }

    pub fn contains(&self, cell_id: CellId) -> bool {
        self.cells.contains_key(&cell_id)
    }

    /// Cell ids in ascending order.
    pub fn cell_ids(&self) -> impl Iterator<Item = CellId> + '_ {
        self.cells.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CellId, &CellEntry)> {
        self.cells.iter().map(|(id, entry)| (*id, entry))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub(crate) fn cells_mut(&mut self) -> &mut BTreeMap<CellId, CellEntry> {
        &mut self.cells
    }
}

/// A parent reference that does not resolve to an earlier (or same-step) cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DanglingParent {
    pub step: StepNum,
    pub cell_id: CellId,
    pub parent_id: CellId,
}

impl From<DanglingParent> for LineageError {
    fn from(d: DanglingParent) -> Self {
        LineageError::DanglingParent {
            step: d.step,
            cell_id: d.cell_id,
            parent_id: d.parent_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineageIndex {
    total_steps: StepNum,
    steps: BTreeMap<StepNum, StepEntry>,
}

/// Next step after moving `delta` steps from `current`, wrapping within `[1, total_steps]`.
pub fn step_after(current: StepNum, delta: i64, total_steps: StepNum) -> StepNum {
    if total_steps == 0 {
        return current;
    }
    let zero_based = i64::from(current) - 1 + delta;
    (zero_based.rem_euclid(i64::from(total_steps)) + 1) as StepNum
}

impl LineageIndex {
    /// Builds the index from a table. When `expected_steps` is given (the number of
    /// images), the table's declared step total has to match it.
    pub fn from_table(table: &RecordTable, expected_steps: Option<usize>) -> Result<Self> {
        let total_steps = match expected_steps {
            Some(expected) => table.check_step_count(expected)?,
            None => table.declared_steps()?,
        };
        let index = Self::from_records(table.records()?, total_steps)?;
        tracing::debug!(
            steps = index.total_steps,
            cells = index.cell_count(),
            "built lineage index"
        );
        Ok(index)
    }

    pub fn from_records(
        records: impl IntoIterator<Item = CellRecord>,
        total_steps: StepNum,
    ) -> Result<Self> {
        let mut steps: BTreeMap<StepNum, StepEntry> =
            (1..=total_steps).map(|s| (s, StepEntry::new(s))).collect();
        for record in records {
            let Some(entry) = steps.get_mut(&record.step) else {
                return Err(LineageError::SchemaMismatch(format!(
                    "row {}: step {} is outside 1..={total_steps}",
                    record.row_index, record.step
                )));
            };
            match entry.cells.entry(record.cell_id) {
                Entry::Occupied(existing) => {
                    return Err(LineageError::DuplicateCellId {
                        step: record.step,
                        cell_id: record.cell_id,
                        first_row: existing.get().row_index,
                        second_row: record.row_index,
                    });
                }
                Entry::Vacant(slot) => {
                    slot.insert(CellEntry {
                        row_index: record.row_index,
                        parent_id: record.parent_id,
                        position: record.position,
                    });
                }
            }
        }
        Ok(Self { total_steps, steps })
    }

    pub fn total_steps(&self) -> StepNum {
        self.total_steps
    }

    pub fn contains_step(&self, step: StepNum) -> bool {
        self.steps.contains_key(&step)
    }

    pub fn step(&self, step: StepNum) -> Option<&StepEntry> {
        self.steps.get(&step)
    }

    pub fn steps(&self) -> impl Iterator<Item = &StepEntry> {
        self.steps.values()
    }

    pub fn cell(&self, step: StepNum, cell_id: CellId) -> Option<&CellEntry> {
        self.steps.get(&step).and_then(|e| e.get(cell_id))
    }

    /// Number of (step, cell) entries; equals the table's row count after loading.
    pub fn cell_count(&self) -> usize {
        self.steps.values().map(StepEntry::len).sum()
    }

    /// Steps at which `cell_id` is present, ascending.
    pub fn occurrences(&self, cell_id: CellId) -> Vec<StepNum> {
        self.steps
            .values()
            .filter(|e| e.contains(cell_id))
            .map(StepEntry::step)
            .collect()
    }

    pub(crate) fn steps_from_mut(
        &mut self,
        step: StepNum,
    ) -> impl Iterator<Item = &mut StepEntry> {
        self.steps.range_mut(step..).map(|(_, entry)| entry)
    }

    /// All parent references that are non-root and do not name a cell present at
    /// the same or an earlier step, plus cells that are their own parent.
    pub fn dangling_parents(&self) -> Vec<DanglingParent> {
        let mut seen: HashSet<CellId> = HashSet::new();
        let mut out = vec![];
        for entry in self.steps.values() {
            seen.extend(entry.cell_ids());
            for (cell_id, cell) in entry.iter() {
                if cell.is_root() {
                    continue;
                }
                if cell.parent_id == cell_id || !seen.contains(&cell.parent_id) {
                    out.push(DanglingParent {
                        step: entry.step,
                        cell_id,
                        parent_id: cell.parent_id,
                    });
                }
            }
        }
        out
    }

    pub fn validate_parents(&self) -> Result<()> {
        match self.dangling_parents().into_iter().next() {
            Some(dangling) => Err(dangling.into()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(step: StepNum, cell_id: CellId, parent_id: CellId, row_index: usize) -> CellRecord {
        CellRecord {
            step,
            cell_id,
            parent_id,
            position: Position::new(row_index as f64, 0.0),
            row_index,
        }
    }

    #[test]
    fn test_step_after_wraps_both_ways() {
        assert_eq!(step_after(1, 1, 3), 2);
        assert_eq!(step_after(3, 1, 3), 1);
        assert_eq!(step_after(1, -1, 3), 3);
        assert_eq!(step_after(2, -1, 3), 1);
        assert_eq!(step_after(1, 7, 3), 2);
        assert_eq!(step_after(1, 1, 1), 1);
        assert_eq!(step_after(4, 1, 0), 4);
    }

    #[test]
    fn test_index_groups_records_by_step() {
        let index = LineageIndex::from_records(
            vec![rec(1, 1, 0, 0), rec(1, 2, 0, 1), rec(3, 1, 0, 2)],
            3,
        )
        .unwrap();
        assert_eq!(index.total_steps(), 3);
        assert_eq!(index.cell_count(), 3);
        assert_eq!(
            index.step(1).unwrap().cell_ids().collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(index.step(2).unwrap().is_empty());
        assert_eq!(index.cell(3, 1).unwrap().row_index(), 2);
        assert_eq!(index.occurrences(1), vec![1, 3]);
        assert!(index.step(4).is_none());
    }

    #[test]
    fn test_duplicate_cell_id_is_rejected() {
        let err =
            LineageIndex::from_records(vec![rec(1, 5, 0, 0), rec(1, 5, 0, 1)], 1).unwrap_err();
        match err {
            LineageError::DuplicateCellId {
                step,
                cell_id,
                first_row,
                second_row,
            } => assert_eq!((step, cell_id, first_row, second_row), (1, 5, 0, 1)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_step_beyond_declared_total_is_rejected() {
        let err = LineageIndex::from_records(vec![rec(4, 1, 0, 0)], 3).unwrap_err();
        assert!(matches!(err, LineageError::SchemaMismatch(_)));
    }

    #[test]
    fn test_dangling_parents() {
        let index = LineageIndex::from_records(
            vec![
                rec(1, 1, 0, 0),
                rec(2, 1, 0, 1),
                rec(2, 2, 1, 2),
                rec(2, 3, 9, 3),
                rec(3, 4, 4, 4),
                rec(3, 5, 6, 5),
                rec(3, 6, 2, 6),
            ],
            3,
        )
        .unwrap();
        let dangling = index.dangling_parents();
        assert_eq!(
            dangling,
            vec![
                DanglingParent {
                    step: 2,
                    cell_id: 3,
                    parent_id: 9
                },
                DanglingParent {
                    step: 3,
                    cell_id: 4,
                    parent_id: 4
                },
            ]
        );
        assert!(matches!(
            index.validate_parents(),
            Err(LineageError::DanglingParent {
                step: 2,
                cell_id: 3,
                parent_id: 9
            })
        ));
    }

    #[test]
    fn test_from_table_checks_image_count() {
        let table = RecordTable::from_reader(
            "stepNum,id,parent_id,pos\n1,1,0,\"[0, 0]\"\n2,1,0,\"[1, 1]\"\n".as_bytes(),
        )
        .unwrap();
        assert!(LineageIndex::from_table(&table, Some(2)).is_ok());
        assert!(matches!(
            LineageIndex::from_table(&table, Some(5)),
            Err(LineageError::SchemaMismatch(_))
        ));
        assert_eq!(
            LineageIndex::from_table(&table, None).unwrap().total_steps(),
            2
        );
    }
}
