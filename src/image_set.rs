//! The ordered image files a tracking table belongs to. One image per step.

use crate::error::{LineageError, Result};
use lineage_protocol::StepNum;
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "bmp", "gif", "tif", "tiff"];

pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageSet {
    files: Vec<PathBuf>,
}

impl ImageSet {
    /// Lists the image files of `directory`, sorted by file name.
    pub fn from_directory(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref();
        let entries = fs::read_dir(directory).map_err(|e| {
            LineageError::InvalidInput(format!(
                "could not read image directory '{}': {e}",
                directory.display()
            ))
        })?;
        let mut files = vec![];
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && is_image_path(&path) {
                files.push(path);
            }
        }
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        tracing::info!(
            directory = %directory.display(),
            images = files.len(),
            "listed image directory"
        );
        Ok(Self { files })
    }

    pub fn from_files(files: Vec<PathBuf>) -> Self {
        Self { files }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Image shown at `step` (1-based).
    pub fn image_for_step(&self, step: StepNum) -> Option<&Path> {
        let idx = (step as usize).checked_sub(1)?;
        self.files.get(idx).map(PathBuf::as_path)
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}
