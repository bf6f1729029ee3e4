//! Checks applied to raw user input before a split is started.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::progress::{Emitter, ProgressSink};

/// Directory name used when the caller leaves the output directory blank.
pub const DEFAULT_OUTPUT_DIR: &str = "output_csv";

/// Rejected user input. Nothing has been touched on disk when one of these is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Error: please select a CSV file first")]
    MissingSource,

    #[error("Error: number of parts must be a positive integer (got {0:?})")]
    InvalidPartCount(String),
}

/// A validated split request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitRequest {
    pub source: PathBuf,
    pub num_parts: usize,
    pub output_dir: PathBuf,
}

impl SplitRequest {
    /// Build a request from already-validated values.
    pub fn new(
        source: impl Into<PathBuf>,
        num_parts: usize,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source: source.into(),
            num_parts,
            output_dir: output_dir.into(),
        }
    }

    /// Validate text fields as a form would supply them.
    ///
    /// `num_parts` must be all ASCII digits and greater than zero. A blank
    /// `output_dir` becomes [`DEFAULT_OUTPUT_DIR`] next to the source file.
    pub fn parse(source: &str, num_parts: &str, output_dir: &str) -> Result<Self, ValidationError> {
        let source = source.trim();
        if source.is_empty() {
            return Err(ValidationError::MissingSource);
        }

        let num_parts = parse_part_count(num_parts)?;

        let source = PathBuf::from(source);
        let output_dir = match output_dir.trim() {
            "" => default_output_dir(&source),
            dir => PathBuf::from(dir),
        };

        Ok(Self {
            source,
            num_parts,
            output_dir,
        })
    }

    /// [`SplitRequest::parse`], reporting a rejection as one error event.
    /// The busy flag is not touched.
    pub fn parse_or_report(
        source: &str,
        num_parts: &str,
        output_dir: &str,
        sink: &dyn ProgressSink,
    ) -> Option<Self> {
        match Self::parse(source, num_parts, output_dir) {
            Ok(request) => Some(request),
            Err(e) => {
                Emitter::new(sink).error(e.to_string());
                None
            }
        }
    }
}

fn parse_part_count(raw: &str) -> Result<usize, ValidationError> {
    let invalid = || ValidationError::InvalidPartCount(raw.to_string());
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    match raw.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(invalid()),
    }
}

/// `output_csv` in the source file's directory.
pub fn default_output_dir(source: &Path) -> PathBuf {
    match source.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(DEFAULT_OUTPUT_DIR),
        _ => PathBuf::from(DEFAULT_OUTPUT_DIR),
    }
}
