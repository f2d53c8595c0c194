//! Headless viewer state: which step is shown, which cell is selected, and the
//! engine that owns the lineage index.

use crate::config::SessionConfig;
use crate::engine::{CorrectionEngine, Engine};
use crate::error::{LineageError, Result};
use crate::export::{ExportSummary, save_table};
use crate::image_set::ImageSet;
use crate::lineage_index::{LineageIndex, step_after};
use crate::overlay::{OverlayRequest, overlay_labels};
use crate::position::PixelScale;
use crate::record_table::RecordTable;
use lineage_protocol::{Batch, CellId, OpResult, Operation, OverlayLabel, StepNum};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct CorrectionSession {
    images: ImageSet,
    table: RecordTable,
    table_path: Option<PathBuf>,
    engine: CorrectionEngine,
    scale: PixelScale,
    step: StepNum,
    selected: Option<CellId>,
    isolate: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub step: StepNum,
    pub total_steps: StepNum,
    pub image: Option<String>,
    pub table: Option<String>,
    pub rows: usize,
    pub cells_at_step: usize,
    pub selected: Option<CellId>,
    pub selected_parent: Option<CellId>,
    pub isolate: bool,
    pub um_per_pixel: f64,
    pub operations_applied: usize,
}

impl CorrectionSession {
    /// Opens an image directory and its tracking table. The table must declare
    /// exactly as many steps as there are images.
    pub fn open(
        image_dir: impl AsRef<Path>,
        table_path: impl AsRef<Path>,
        config: &SessionConfig,
    ) -> Result<Self> {
        let images = ImageSet::from_directory(image_dir)?;
        let table = RecordTable::from_path(table_path.as_ref())?;
        let mut session = Self::from_parts(images, table, config)?;
        session.table_path = Some(table_path.as_ref().to_path_buf());
        Ok(session)
    }

    pub fn from_parts(
        images: ImageSet,
        table: RecordTable,
        config: &SessionConfig,
    ) -> Result<Self> {
        let scale = config.scale()?;
        let engine =
            CorrectionEngine::load(&table, Some(images.len()), config.engine_parameters())?;
        let mut session = Self {
            images,
            table,
            table_path: None,
            engine,
            scale,
            step: 1,
            selected: None,
            isolate: false,
        };
        session.refresh_selection();
        Ok(session)
    }

    pub fn engine(&self) -> &CorrectionEngine {
        &self.engine
    }

    pub fn index(&self) -> &LineageIndex {
        self.engine.index()
    }

    pub fn current_step(&self) -> StepNum {
        self.step
    }

    pub fn total_steps(&self) -> StepNum {
        self.index().total_steps()
    }

    pub fn step_label(&self) -> String {
        format!("Step #{}", self.step)
    }

    pub fn current_image(&self) -> Option<&Path> {
        self.images.image_for_step(self.step)
    }

    pub fn selected(&self) -> Option<CellId> {
        self.selected
    }

    pub fn isolate(&self) -> bool {
        self.isolate
    }

    pub fn set_isolate(&mut self, isolate: bool) {
        self.isolate = isolate;
    }

    /// Cell ids present at the current step, ascending.
    pub fn cell_choices(&self) -> Vec<CellId> {
        self.index()
            .step(self.step)
            .map(|e| e.cell_ids().collect())
            .unwrap_or_default()
    }

    /// Keeps the selection if it exists at the current step, else picks the smallest id.
    fn refresh_selection(&mut self) {
        let choices = self.cell_choices();
        self.selected = match self.selected {
            Some(id) if choices.contains(&id) => Some(id),
            _ => choices.first().copied(),
        };
    }

    pub fn go_to_step(&mut self, step: StepNum) -> Result<StepNum> {
        if !self.index().contains_step(step) {
            return Err(LineageError::InvalidInput(format!(
                "step {step} is outside 1..={}",
                self.total_steps()
            )));
        }
        self.step = step;
        self.refresh_selection();
        Ok(self.step)
    }

    pub fn next_step(&mut self) -> StepNum {
        self.move_by(1)
    }

    pub fn previous_step(&mut self) -> StepNum {
        self.move_by(-1)
    }

    fn move_by(&mut self, delta: i64) -> StepNum {
        self.step = step_after(self.step, delta, self.total_steps());
        self.refresh_selection();
        self.step
    }

    /// Selects a cell at the current step and returns its parent id.
    pub fn select_cell(&mut self, cell_id: CellId) -> Result<CellId> {
        let parent = self
            .index()
            .cell(self.step, cell_id)
            .map(|c| c.parent_id())
            .ok_or(LineageError::CellNotFound {
                step: self.step,
                cell_id,
            })?;
        self.selected = Some(cell_id);
        Ok(parent)
    }

    pub fn selected_parent(&self) -> Option<CellId> {
        self.selected
            .and_then(|id| self.index().cell(self.step, id))
            .map(|c| c.parent_id())
    }

    /// Moves the selection along with renames that reached the current step,
    /// then makes sure it still names a cell shown here.
    fn follow_selection<'a>(&mut self, ops: impl IntoIterator<Item = &'a Operation>) {
        for op in ops {
            let (from, to) = match *op {
                Operation::RenameCell { old_id, new_id, .. } => (old_id, new_id),
                Operation::ChangeCellInfo {
                    cell_id, new_id, ..
                } => (cell_id, new_id),
                Operation::ReparentCell { .. } => continue,
            };
            if op.step() <= self.step && self.selected == Some(from) {
                self.selected = Some(to);
            }
        }
        self.refresh_selection();
    }

    pub fn apply(&mut self, op: Operation) -> Result<OpResult> {
        let result = self.engine.apply(op.clone())?;
        self.follow_selection([&op]);
        Ok(result)
    }

    pub fn apply_batch(&mut self, batch: Batch) -> Result<Vec<OpResult>> {
        let ops = batch.ops.clone();
        let results = self.engine.apply_batch(batch)?;
        self.follow_selection(&ops);
        Ok(results)
    }

    /// Renames `old_id` from the current step on.
    pub fn rename(&mut self, old_id: CellId, new_id: CellId) -> Result<OpResult> {
        self.apply(Operation::RenameCell {
            step: self.step,
            old_id,
            new_id,
        })
    }

    pub fn reparent(&mut self, cell_id: CellId, new_parent_id: CellId) -> Result<OpResult> {
        self.apply(Operation::ReparentCell {
            step: self.step,
            cell_id,
            new_parent_id,
        })
    }

    /// Applies a combined id/parent edit to the selected cell at the current step.
    pub fn change_selected(&mut self, new_id: CellId, new_parent_id: CellId) -> Result<OpResult> {
        let cell_id = self
            .selected
            .ok_or_else(|| LineageError::InvalidInput("no cell is selected".to_string()))?;
        self.apply(Operation::ChangeCellInfo {
            step: self.step,
            cell_id,
            new_id,
            new_parent_id,
        })
    }

    pub fn overlay(&self) -> Vec<OverlayLabel> {
        overlay_labels(
            self.index(),
            OverlayRequest {
                step: self.step,
                isolate: self.isolate,
                selected: self.selected,
            },
            self.scale,
        )
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<ExportSummary> {
        save_table(self.index(), &self.table, path)
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            step: self.step,
            total_steps: self.total_steps(),
            image: self.current_image().map(|p| p.display().to_string()),
            table: self.table_path.as_ref().map(|p| p.display().to_string()),
            rows: self.table.row_count(),
            cells_at_step: self.index().step(self.step).map_or(0, |e| e.len()),
            selected: self.selected,
            selected_parent: self.selected_parent(),
            isolate: self.isolate,
            um_per_pixel: self.scale.um_per_pixel(),
            operations_applied: self.engine.operation_log().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const TABLE: &str = "stepNum,id,parent_id,pos\n\
1,3,0,\"[1.44, 1.44]\"\n\
1,7,0,\"[2.88, 2.88]\"\n\
2,7,3,\"[2.88, 4.32]\"\n\
2,4,7,\"[5.76, 5.76]\"\n\
3,4,7,\"[5.76, 7.2]\"\n";

    fn session() -> CorrectionSession {
        let images = ImageSet::from_files(vec![
            PathBuf::from("a.png"),
            PathBuf::from("b.png"),
            PathBuf::from("c.png"),
        ]);
        let table = RecordTable::from_reader(TABLE.as_bytes()).unwrap();
        CorrectionSession::from_parts(images, table, &SessionConfig::default()).unwrap()
    }

    #[test]
    fn test_starts_at_first_step_with_smallest_cell() {
        let s = session();
        assert_eq!(s.current_step(), 1);
        assert_eq!(s.step_label(), "Step #1");
        assert_eq!(s.cell_choices(), vec![3, 7]);
        assert_eq!(s.selected(), Some(3));
        assert_eq!(s.current_image(), Some(Path::new("a.png")));
    }

    #[test]
    fn test_image_count_must_match() {
        let images = ImageSet::from_files(vec![PathBuf::from("a.png")]);
        let table = RecordTable::from_reader(TABLE.as_bytes()).unwrap();
        let err = CorrectionSession::from_parts(images, table, &SessionConfig::default())
            .unwrap_err();
        assert!(matches!(err, LineageError::SchemaMismatch(_)));
    }

    #[test]
    fn test_navigation_wraps_and_keeps_selection() {
        let mut s = session();
        s.select_cell(7).unwrap();
        assert_eq!(s.next_step(), 2);
        assert_eq!(s.selected(), Some(7));
        assert_eq!(s.next_step(), 3);
        assert_eq!(s.selected(), Some(4));
        assert_eq!(s.next_step(), 1);
        assert_eq!(s.previous_step(), 3);
        assert_eq!(s.go_to_step(2).unwrap(), 2);
        assert!(s.go_to_step(9).is_err());
    }

    #[test]
    fn test_select_returns_parent() {
        let mut s = session();
        s.go_to_step(2).unwrap();
        assert_eq!(s.select_cell(4).unwrap(), 7);
        assert!(matches!(
            s.select_cell(3),
            Err(LineageError::CellNotFound { step: 2, cell_id: 3 })
        ));
        assert_eq!(s.selected(), Some(4));
    }

    #[test]
    fn test_change_selected_keeps_renamed_cell_selected() {
        let mut s = session();
        s.go_to_step(2).unwrap();
        s.select_cell(7).unwrap();
        let res = s.change_selected(9, 3).unwrap();
        assert_eq!(res.changed_steps, vec![2, 3]);
        assert_eq!(s.selected(), Some(9));
        assert_eq!(s.selected_parent(), Some(3));
        assert_eq!(s.index().cell(3, 4).unwrap().parent_id(), 9);
        assert_eq!(s.index().cell(1, 7).unwrap().parent_id(), 0);
    }

    #[test]
    fn test_rename_follows_selected_cell() {
        let mut s = session();
        s.go_to_step(2).unwrap();
        s.select_cell(7).unwrap();
        s.rename(7, 9).unwrap();
        assert_eq!(s.cell_choices(), vec![4, 9]);
        assert_eq!(s.selected(), Some(9));
        assert_eq!(s.selected_parent(), Some(3));
        s.set_isolate(true);
        assert_eq!(s.overlay()[0].cell_id, 9);
        s.change_selected(11, 0).unwrap();
        assert_eq!(s.selected(), Some(11));
    }

    #[test]
    fn test_rename_from_later_step_keeps_selection() {
        let mut s = session();
        s.select_cell(7).unwrap();
        s.apply(Operation::RenameCell {
            step: 2,
            old_id: 7,
            new_id: 9,
        })
        .unwrap();
        assert_eq!(s.selected(), Some(7));
        assert_eq!(s.index().cell(1, 7).unwrap().parent_id(), 0);
    }

    #[test]
    fn test_batch_keeps_selection_valid() {
        let mut s = session();
        s.go_to_step(3).unwrap();
        assert_eq!(s.selected(), Some(4));
        s.apply_batch(Batch {
            run_id: "fix".to_string(),
            ops: vec![
                Operation::RenameCell {
                    step: 2,
                    old_id: 4,
                    new_id: 40,
                },
                Operation::ReparentCell {
                    step: 3,
                    cell_id: 40,
                    new_parent_id: 0,
                },
            ],
        })
        .unwrap();
        assert_eq!(s.selected(), Some(40));
        assert_eq!(s.selected_parent(), Some(0));
    }

    #[test]
    fn test_overlay_honors_isolate() {
        let mut s = session();
        assert_eq!(s.overlay().len(), 2);
        s.set_isolate(true);
        let labels = s.overlay();
        assert_eq!(labels.len(), 1);
        assert_eq!((labels[0].cell_id, labels[0].x_px, labels[0].y_px), (3, 10, 10));
    }

    #[test]
    fn test_open_and_save_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images");
        fs::create_dir(&images).unwrap();
        for name in ["f1.png", "f2.png", "f3.png"] {
            fs::write(images.join(name), b"").unwrap();
        }
        let table_path = dir.path().join("tracks.csv");
        fs::write(&table_path, TABLE).unwrap();

        let mut s = CorrectionSession::open(&images, &table_path, &SessionConfig::default())
            .unwrap();
        assert_eq!(s.summary().rows, 5);
        s.change_selected(30, 0).unwrap();
        let out = dir.path().join("corrected.csv");
        let summary = s.save(&out).unwrap();
        assert_eq!(summary.rows, 5);
        let text = fs::read_to_string(&out).unwrap();
        assert!(text.contains("1,30,0,\"[1.44, 1.44]\""));
        assert!(text.contains("2,7,30,\"[2.88, 4.32]\""));
    }
}
