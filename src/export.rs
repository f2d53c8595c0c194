//! Write-back of a corrected index into the original table layout.

use crate::error::{LineageError, Result};
use crate::lineage_index::LineageIndex;
use crate::record_table::RecordTable;
use serde::Serialize;
use std::{collections::BTreeSet, fs, path::Path};
use tempfile::NamedTempFile;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub rows: usize,
    pub rows_changed: usize,
    /// Rows no indexed cell maps to any more. Only a `Merge` rename leaves
    /// these behind; they are written with their original values.
    pub rows_unindexed: usize,
}

/// Copies `original` and overwrites the `id` and `parent_id` of every indexed
/// cell at its original row. All other fields pass through untouched.
pub fn export_table(
    index: &LineageIndex,
    original: &RecordTable,
) -> Result<(RecordTable, ExportSummary)> {
    let mut table = original.clone();
    let columns = table.columns();
    let row_count = table.row_count();
    let mut changed_rows = BTreeSet::new();
    let mut indexed = vec![false; row_count];
    for entry in index.steps() {
        for (cell_id, cell) in entry.iter() {
            let row = cell.row_index();
            if row >= row_count {
                return Err(LineageError::UnmappedRow {
                    row_index: row,
                    row_count,
                });
            }
            indexed[row] = true;
            if table.set_int_field(row, columns.id, cell_id)? {
                changed_rows.insert(row);
            }
            if table.set_int_field(row, columns.parent_id, cell.parent_id())? {
                changed_rows.insert(row);
            }
        }
    }
    let summary = ExportSummary {
        rows: table.row_count(),
        rows_changed: changed_rows.len(),
        rows_unindexed: indexed.iter().filter(|covered| !**covered).count(),
    };
    Ok((table, summary))
}

/// Exports and writes the table to `path`. The file is written next to its
/// destination and renamed into place, so a failure leaves `path` untouched.
pub fn save_table(
    index: &LineageIndex,
    original: &RecordTable,
    path: impl AsRef<Path>,
) -> Result<ExportSummary> {
    let path = path.as_ref();
    let (table, summary) = export_table(index, original)?;
    if summary.rows_unindexed > 0 {
        tracing::warn!(
            path = %path.display(),
            rows = summary.rows_unindexed,
            "merged-over rows are written unchanged and may repeat a cell id"
        );
    }
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    fs::create_dir_all(&dir)?;
    let mut tmp = NamedTempFile::new_in(&dir)?;
    table.write_to(tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| LineageError::Io(e.error))?;
    tracing::info!(
        path = %path.display(),
        rows = summary.rows,
        rows_changed = summary.rows_changed,
        "saved corrected table"
    );
    Ok(summary)
}
