use lineage_protocol::{CellId, ErrorCode, StepNum};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LineageError {
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("required column '{column}' is missing")]
    MissingColumn { column: String },

    #[error("row {row}: invalid '{column}' value '{value}'")]
    InvalidRecord {
        row: usize,
        column: String,
        value: String,
    },

    #[error("cell {cell_id} appears twice at step {step} (rows {first_row} and {second_row})")]
    DuplicateCellId {
        step: StepNum,
        cell_id: CellId,
        first_row: usize,
        second_row: usize,
    },

    #[error("cell {cell_id} not found at step {step}")]
    CellNotFound { step: StepNum, cell_id: CellId },

    #[error("cell id {cell_id} is already in use at step {step}")]
    IdentityCollision { step: StepNum, cell_id: CellId },

    #[error("cell {cell_id} at step {step} references unknown parent {parent_id}")]
    DanglingParent {
        step: StepNum,
        cell_id: CellId,
        parent_id: CellId,
    },

    #[error("row index {row_index} is outside the table ({row_count} rows)")]
    UnmappedRow { row_index: usize, row_count: usize },

    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl LineageError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::SchemaMismatch(_) | Self::MissingColumn { .. } => ErrorCode::SchemaMismatch,
            Self::InvalidRecord { .. } | Self::InvalidInput(_) | Self::Json(_) => {
                ErrorCode::InvalidInput
            }
            Self::DuplicateCellId { .. } => ErrorCode::DuplicateCellId,
            Self::CellNotFound { .. } => ErrorCode::CellNotFound,
            Self::IdentityCollision { .. } => ErrorCode::IdentityCollision,
            Self::DanglingParent { .. } => ErrorCode::DanglingParent,
            Self::UnmappedRow { .. } => ErrorCode::UnmappedRow,
            Self::Csv(e) if !e.is_io_error() => ErrorCode::InvalidInput,
            Self::Io(_) | Self::Csv(_) => ErrorCode::Io,
        }
    }
}

pub type Result<T, E = LineageError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_column_reports_schema_mismatch_code() {
        let err = LineageError::MissingColumn {
            column: "pos".to_string(),
        };
        assert_eq!(err.code(), ErrorCode::SchemaMismatch);
        assert_eq!(err.to_string(), "required column 'pos' is missing");
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: LineageError = io.into();
        assert_eq!(err.code(), ErrorCode::Io);
    }
}
