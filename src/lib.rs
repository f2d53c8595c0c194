//! Cell lineage correction: load per-step cell tracks, relabel mistracked cells
//! and their parentage forward through time, and write the table back.

pub mod about;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod image_set;
pub mod lineage_index;
pub mod overlay;
pub mod position;
pub mod record_table;
pub mod session;
pub mod shell;

pub use engine::{CorrectionEngine, Engine, EngineParameters};
pub use error::{LineageError, Result};
pub use lineage_index::{CellEntry, LineageIndex, StepEntry, step_after};
pub use lineage_protocol as protocol;
pub use session::CorrectionSession;
