use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A character-level failure while converting between the source encoding and UTF-8.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranscodeError {
    /// The input held a byte sequence that is invalid in the source encoding.
    #[error("'{encoding}' codec can't decode bytes at offset {offset}")]
    Malformed {
        encoding: &'static str,
        offset: u64,
    },

    /// A decoded character has no representation in the output encoding.
    #[error("'{encoding}' codec can't encode character {ch:?}")]
    Unmappable { encoding: &'static str, ch: char },
}

impl TranscodeError {
    /// Wrap into an `io::Error` so it can travel through `Read`/`Write` adapters.
    pub(crate) fn into_io(self) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, self)
    }
}

/// Error type for CSV splitting operations.
#[derive(Error, Debug)]
pub enum SplitError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// CSV parsing or writing error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The source file is missing or cannot be opened.
    #[error("cannot open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Invalid bytes in the input, or unmappable characters in the output.
    #[error("encoding error: {0}")]
    Transcode(#[from] TranscodeError),

    /// The input is empty or holds only the header row.
    #[error("not enough data rows (file is empty or contains only a header)")]
    NoDataRows,

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The run was cancelled between parts.
    #[error("cancelled after {completed} part(s)")]
    Cancelled { completed: usize },

    /// The pipeline panicked; the message is whatever the panic carried.
    #[error("internal failure: {0}")]
    Panicked(String),
}

impl SplitError {
    /// The underlying encoding failure, if this error is one.
    ///
    /// Looks through `io::Error` and `csv::Error` wrappers, since the transcoding
    /// adapters surface their failures as `InvalidData` IO errors.
    pub fn transcode_error(&self) -> Option<&TranscodeError> {
        match self {
            SplitError::Transcode(e) => Some(e),
            SplitError::Io(e) => transcode_in_io(e),
            SplitError::Csv(e) => match e.kind() {
                csv::ErrorKind::Io(io) => transcode_in_io(io),
                _ => None,
            },
            _ => None,
        }
    }

    /// Whether a tolerant retry can recover from this error.
    pub fn is_decode_failure(&self) -> bool {
        self.transcode_error().is_some()
    }
}

fn transcode_in_io(err: &io::Error) -> Option<&TranscodeError> {
    if err.kind() != io::ErrorKind::InvalidData {
        return None;
    }
    err.get_ref()?.downcast_ref::<TranscodeError>()
}

/// Result type alias for splitting operations.
pub type Result<T> = std::result::Result<T, SplitError>;
