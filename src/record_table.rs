//! The flat tracking table: one row per (step, cell) with its parent and position.
//!
//! The table keeps every row as raw text so that write-back only touches the
//! fields that were corrected.

use crate::error::{LineageError, Result};
use crate::position::Position;
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use lineage_protocol::{CellId, StepNum};
use std::{fs::File, io, path::Path};

pub const COL_STEP: &str = "stepNum";
pub const COL_ID: &str = "id";
pub const COL_PARENT: &str = "parent_id";
pub const COL_POS: &str = "pos";

/// Positions of the required columns within a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMap {
    pub step: usize,
    pub id: usize,
    pub parent_id: usize,
    pub pos: usize,
}

impl ColumnMap {
    fn from_headers(headers: &StringRecord) -> Result<Self> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| LineageError::MissingColumn {
                    column: name.to_string(),
                })
        };
        Ok(Self {
            step: find(COL_STEP)?,
            id: find(COL_ID)?,
            parent_id: find(COL_PARENT)?,
            pos: find(COL_POS)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CellRecord {
    pub step: StepNum,
    pub cell_id: CellId,
    pub parent_id: CellId,
    pub position: Position,
    pub row_index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordTable {
    headers: StringRecord,
    rows: Vec<StringRecord>,
    columns: ColumnMap,
}

/// Parses an integer cell, accepting integral floats such as `"7.0"`.
pub(crate) fn parse_int_field(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(v) = text.parse::<i64>() {
        return Some(v);
    }
    let f: f64 = text.parse().ok()?;
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

impl RecordTable {
    pub fn from_reader<R: io::Read>(reader: R) -> Result<Self> {
        let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(reader);
        let headers = rdr.headers()?.clone();
        let columns = ColumnMap::from_headers(&headers)?;
        let rows = rdr.records().collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            headers,
            rows,
            columns,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            LineageError::Io(io::Error::new(
                e.kind(),
                format!("could not open table '{}': {e}", path.display()),
            ))
        })?;
        let table = Self::from_reader(file)?;
        tracing::info!(
            path = %path.display(),
            rows = table.row_count(),
            "loaded tracking table"
        );
        Ok(table)
    }

    pub fn headers(&self) -> &StringRecord {
        &self.headers
    }

    pub fn rows(&self) -> &[StringRecord] {
        &self.rows
    }

    pub fn columns(&self) -> ColumnMap {
        self.columns
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn field(&self, row: usize, column: usize) -> &str {
        self.rows[row].get(column).unwrap_or("")
    }

    fn int_field(&self, row: usize, column: usize) -> Result<i64> {
        let raw = self.field(row, column);
        parse_int_field(raw).ok_or_else(|| LineageError::InvalidRecord {
            row,
            column: self.headers.get(column).unwrap_or("").to_string(),
            value: raw.to_string(),
        })
    }

    fn step_field(&self, row: usize) -> Result<StepNum> {
        let raw = self.int_field(row, self.columns.step)?;
        StepNum::try_from(raw)
            .ok()
            .filter(|s| *s >= 1)
            .ok_or_else(|| {
                LineageError::SchemaMismatch(format!(
                    "row {row}: step number {raw} is outside the valid range"
                ))
            })
    }

    /// The step total declared by the table: the step number of its last row.
    pub fn declared_steps(&self) -> Result<StepNum> {
        match self.rows.len() {
            0 => Err(LineageError::SchemaMismatch(
                "tracking table has no rows".to_string(),
            )),
            n => self.step_field(n - 1),
        }
    }

    /// Checks the declared step total against the number of images it belongs to.
    pub fn check_step_count(&self, expected: usize) -> Result<StepNum> {
        let declared = self.declared_steps()?;
        if declared as usize != expected {
            return Err(LineageError::SchemaMismatch(format!(
                "table declares {declared} steps but {expected} images were supplied"
            )));
        }
        Ok(declared)
    }

    pub fn record(&self, row: usize) -> Result<CellRecord> {
        if row >= self.rows.len() {
            return Err(LineageError::UnmappedRow {
                row_index: row,
                row_count: self.rows.len(),
            });
        }
        let step = self.step_field(row)?;
        let cell_id = self.int_field(row, self.columns.id)?;
        let parent_id = self.int_field(row, self.columns.parent_id)?;
        let raw_pos = self.field(row, self.columns.pos);
        let position = Position::parse(raw_pos).ok_or_else(|| LineageError::InvalidRecord {
            row,
            column: COL_POS.to_string(),
            value: raw_pos.to_string(),
        })?;
        Ok(CellRecord {
            step,
            cell_id,
            parent_id,
            position,
            row_index: row,
        })
    }

    pub fn records(&self) -> Result<Vec<CellRecord>> {
        (0..self.rows.len()).map(|row| self.record(row)).collect()
    }

    /// Overwrites an integer column, keeping the original text when the value is unchanged.
    pub(crate) fn set_int_field(&mut self, row: usize, column: usize, value: i64) -> Result<bool> {
        let row_count = self.rows.len();
        let record = self
            .rows
            .get_mut(row)
            .ok_or(LineageError::UnmappedRow {
                row_index: row,
                row_count,
            })?;
        let current = record.get(column).and_then(parse_int_field);
        if current == Some(value) {
            return Ok(false);
        }
        let replacement = value.to_string();
        let rebuilt: StringRecord = record
            .iter()
            .enumerate()
            .map(|(idx, field)| if idx == column { replacement.as_str() } else { field })
            .collect();
        *record = rebuilt;
        Ok(true)
    }

    pub fn write_to<W: io::Write>(&self, writer: W) -> Result<()> {
        let mut wtr = WriterBuilder::new().from_writer(writer);
        wtr.write_record(&self.headers)?;
        for row in &self.rows {
            wtr.write_record(row)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "stepNum,id,parent_id,pos,area\n\
1,1,0,\"[14.4, 28.8]\",10\n\
1,2,0,\"[1.0, 2.0]\",11\n\
2,1,0,\"[15.0, 29.0]\",10\n\
2,3,1,\"[3.0, 4.0]\",12\n";

    #[test]
    fn test_parse_sample_table() {
        let table = RecordTable::from_reader(SAMPLE.as_bytes()).unwrap();
        assert_eq!(table.row_count(), 4);
        assert_eq!(
            table.columns(),
            ColumnMap {
                step: 0,
                id: 1,
                parent_id: 2,
                pos: 3
            }
        );
        let records = table.records().unwrap();
        assert_eq!(records[3].step, 2);
        assert_eq!(records[3].cell_id, 3);
        assert_eq!(records[3].parent_id, 1);
        assert_eq!(records[3].position, Position::new(3.0, 4.0));
        assert_eq!(records[3].row_index, 3);
        assert_eq!(table.declared_steps().unwrap(), 2);
    }

    #[test]
    fn test_missing_column_is_reported() {
        let err = RecordTable::from_reader("stepNum,id,pos\n1,1,\"[0, 0]\"\n".as_bytes())
            .unwrap_err();
        match err {
            LineageError::MissingColumn { column } => assert_eq!(column, COL_PARENT),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_step_count_must_match_images() {
        let table = RecordTable::from_reader(SAMPLE.as_bytes()).unwrap();
        assert_eq!(table.check_step_count(2).unwrap(), 2);
        assert!(matches!(
            table.check_step_count(3),
            Err(LineageError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_empty_table_is_schema_mismatch() {
        let table = RecordTable::from_reader("stepNum,id,parent_id,pos\n".as_bytes()).unwrap();
        assert!(table.is_empty());
        assert!(matches!(
            table.declared_steps(),
            Err(LineageError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_bad_fields_name_row_and_column() {
        let table = RecordTable::from_reader(
            "stepNum,id,parent_id,pos\n1,x,0,\"[0, 0]\"\n1,2,0,oops\n".as_bytes(),
        )
        .unwrap();
        match table.record(0).unwrap_err() {
            LineageError::InvalidRecord { row, column, value } => {
                assert_eq!((row, column.as_str(), value.as_str()), (0, "id", "x"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        match table.record(1).unwrap_err() {
            LineageError::InvalidRecord { column, .. } => assert_eq!(column, COL_POS),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_step_zero_is_rejected() {
        let table =
            RecordTable::from_reader("stepNum,id,parent_id,pos\n0,1,0,\"[0, 0]\"\n".as_bytes())
                .unwrap();
        assert!(matches!(
            table.record(0),
            Err(LineageError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_integral_floats_are_accepted() {
        assert_eq!(parse_int_field("7.0"), Some(7));
        assert_eq!(parse_int_field(" 12 "), Some(12));
        assert_eq!(parse_int_field("7.5"), None);
        assert_eq!(parse_int_field(""), None);
    }

    #[test]
    fn test_set_int_field_keeps_text_when_unchanged() {
        let mut table = RecordTable::from_reader(
            "stepNum,id,parent_id,pos\n1,7.0,0,\"[0, 0]\"\n".as_bytes(),
        )
        .unwrap();
        let cols = table.columns();
        assert!(!table.set_int_field(0, cols.id, 7).unwrap());
        assert_eq!(table.rows()[0].get(cols.id), Some("7.0"));
        assert!(table.set_int_field(0, cols.id, 9).unwrap());
        assert_eq!(table.rows()[0].get(cols.id), Some("9"));
        assert!(matches!(
            table.set_int_field(5, cols.id, 9),
            Err(LineageError::UnmappedRow {
                row_index: 5,
                row_count: 1
            })
        ));
    }

    #[test]
    fn test_write_reproduces_input() {
        let table = RecordTable::from_reader(SAMPLE.as_bytes()).unwrap();
        let mut out = Vec::new();
        table.write_to(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), SAMPLE);
    }
}
