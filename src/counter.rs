//! Raw line counting under a candidate encoding.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use crate::encoding::Candidate;
use crate::error::{Result, SplitError};
use crate::progress::Emitter;
use crate::transcode::{DecodeMode, DecodeReader};

const READ_BUF: usize = 64 * 1024;

/// Result of a counting pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineCount {
    /// Lines, header included. `\n`, `\r` and `\r\n` each end one line. A
    /// trailing line without a terminator counts; an empty file has none.
    pub lines: u64,
    /// Malformed sequences skipped (tolerant mode only).
    pub malformed: u64,
}

impl LineCount {
    /// Lines after the header.
    pub fn data_rows(&self) -> u64 {
        self.lines.saturating_sub(1)
    }
}

pub(crate) fn open_source(path: &Path) -> Result<File> {
    File::open(path).map_err(|source| SplitError::Open {
        path: path.to_path_buf(),
        source,
    })
}

/// Count lines in one pass. This is not CSV-aware: a quoted field holding a
/// newline adds a line.
pub fn count_lines<P: AsRef<Path>>(
    path: P,
    candidate: Candidate,
    mode: DecodeMode,
) -> Result<LineCount> {
    let file = open_source(path.as_ref())?;
    let mut reader = DecodeReader::new(file, candidate, mode);
    let mut buf = vec![0u8; READ_BUF];
    let mut lines = 0u64;
    let mut last_byte = None;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        let after_cr = last_byte == Some(b'\r');
        lines += line_breaks(&buf[..n], after_cr);
        last_byte = Some(buf[n - 1]);
    }

    if matches!(last_byte, Some(b) if b != b'\n' && b != b'\r') {
        lines += 1;
    }

    Ok(LineCount {
        lines,
        malformed: reader.malformed(),
    })
}

/// Line breaks in `chunk`. `after_cr` is set when the previous chunk ended
/// with `\r`, so a leading `\n` completes that break instead of adding one.
fn line_breaks(chunk: &[u8], after_cr: bool) -> u64 {
    let crlf = chunk.windows(2).filter(|w| *w == b"\r\n").count()
        + usize::from(after_cr && chunk.first() == Some(&b'\n'));
    (bytecount::count(chunk, b'\r') + bytecount::count(chunk, b'\n') - crlf) as u64
}

/// Count strictly, and on a decode failure warn once and count again tolerantly.
/// Anything else (missing file, permissions) is returned as is.
pub fn count_lines_with_retry(
    path: &Path,
    candidate: Candidate,
    emitter: &Emitter<'_>,
) -> Result<LineCount> {
    match count_lines(path, candidate, DecodeMode::Strict) {
        Err(e) if e.is_decode_failure() => {
            tracing::warn!(error = %e, "strict line count failed");
            emitter.warning(format!(
                "Strict read failed ({e}), retrying and ignoring undecodable bytes..."
            ));
            let count = count_lines(path, candidate, DecodeMode::Tolerant)?;
            if count.malformed > 0 {
                emitter.warning(format!(
                    "Skipped {} undecodable byte sequence(s) while counting",
                    count.malformed
                ));
            }
            Ok(count)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{EventLog, Level};
    use encoding_rs::GBK;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_file(data: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(data).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_count_with_trailing_newline() {
        let file = temp_file(b"h1,h2\n1,2\n3,4\n");
        let count = count_lines(file.path(), Candidate::Utf8, DecodeMode::Strict).unwrap();
        assert_eq!(count.lines, 3);
        assert_eq!(count.data_rows(), 2);
    }

    #[test]
    fn test_count_without_trailing_newline() {
        let file = temp_file(b"h1,h2\r\n1,2\r\n3,4");
        let count = count_lines(file.path(), Candidate::Utf8, DecodeMode::Strict).unwrap();
        assert_eq!(count.lines, 3);
    }

    #[test]
    fn test_count_empty_and_header_only() {
        let empty = temp_file(b"");
        let count = count_lines(empty.path(), Candidate::Utf8Sig, DecodeMode::Strict).unwrap();
        assert_eq!(count.lines, 0);
        assert_eq!(count.data_rows(), 0);

        let header = temp_file(b"\xEF\xBB\xBFa,b\n");
        let count = count_lines(header.path(), Candidate::Utf8Sig, DecodeMode::Strict).unwrap();
        assert_eq!(count.lines, 1);
        assert_eq!(count.data_rows(), 0);
    }

    #[test]
    fn test_count_bare_cr_lines() {
        let file = temp_file(b"id,name\r1,a\r2,b\r3,c\r");
        let count = count_lines(file.path(), Candidate::Utf8, DecodeMode::Strict).unwrap();
        assert_eq!(count.lines, 4);
        assert_eq!(count.data_rows(), 3);
    }

    #[test]
    fn test_count_mixed_terminators() {
        let file = temp_file(b"h\r\na\rb\nc\n\rd");
        let count = count_lines(file.path(), Candidate::Utf8, DecodeMode::Strict).unwrap();
        // "h", "a", "b", "c", "", "d"
        assert_eq!(count.lines, 6);
    }

    #[test]
    fn test_crlf_split_across_reads() {
        assert_eq!(line_breaks(b"a,b\r", false), 1);
        assert_eq!(line_breaks(b"\n1,2\r\n", true), 1);
        assert_eq!(line_breaks(b"\n1,2", false), 1);
        assert_eq!(line_breaks(b"", true), 0);
    }

    #[test]
    fn test_count_gbk() {
        let (encoded, _, _) = GBK.encode("姓名,城市\n张三,北京\n李四,上海\n");
        let file = temp_file(&encoded);
        let count = count_lines(file.path(), Candidate::Gbk, DecodeMode::Strict).unwrap();
        assert_eq!(count.lines, 3);
    }

    #[test]
    fn test_missing_file_is_open_error() {
        let err = count_lines("/no/such/file.csv", Candidate::Utf8, DecodeMode::Strict)
            .unwrap_err();
        assert!(matches!(err, SplitError::Open { .. }));
    }

    #[test]
    fn test_retry_after_decode_failure() {
        let file = temp_file(b"a,b\n1,2\n\xFF3,4\n");
        let log = EventLog::new();
        let emitter = Emitter::new(&log);

        let count = count_lines_with_retry(file.path(), Candidate::Utf8, &emitter).unwrap();
        assert_eq!(count.lines, 3);
        assert_eq!(count.malformed, 1);
        assert_eq!(log.messages(Level::Warning).len(), 2);
    }

    #[test]
    fn test_retry_does_not_mask_missing_file() {
        let log = EventLog::new();
        let emitter = Emitter::new(&log);
        let result =
            count_lines_with_retry(Path::new("/no/such/file.csv"), Candidate::Utf8, &emitter);
        assert!(result.is_err());
        assert!(log.events().is_empty());
    }
}
