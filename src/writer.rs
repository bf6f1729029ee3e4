//! Streams the source once and writes header-prefixed parts.
//!
//! Rows are pulled from a single forward-only CSV reader; part `i` receives the
//! `i`-th run of `chunk_size` records. Each part is written to a temporary file
//! in the output directory and renamed into place when complete, so a part on
//! disk always has its header and all of its rows.

use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use csv::ByteRecord;
use tempfile::NamedTempFile;

use crate::counter::open_source;
use crate::encoding::Candidate;
use crate::error::{Result, SplitError};
use crate::format::{CsvFormat, LineTerminator, is_blank_line};
use crate::plan::SplitPlan;
use crate::progress::Emitter;
use crate::transcode::{DecodeMode, DecodeReader, EncodeWriter};

/// File name of part `index` (1-based): `{base}_part_{index}.csv`.
pub fn part_file_name(base_name: &str, index: usize) -> String {
    format!("{base_name}_part_{index}.csv")
}

/// One written part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartInfo {
    /// 1-based position.
    pub index: usize,
    pub path: PathBuf,
    /// Data rows written, header excluded.
    pub rows: u64,
}

/// Outcome of a full pass over the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitReport {
    pub parts: Vec<PartInfo>,
    /// Mode the successful pass ran in.
    pub mode: DecodeMode,
    /// Undecodable sequences skipped while reading.
    pub malformed: u64,
    /// Characters skipped because the output encoding lacks them.
    pub unmappable: u64,
}

impl SplitReport {
    /// Data rows written across all parts.
    pub fn total_rows(&self) -> u64 {
        self.parts.iter().map(|p| p.rows).sum()
    }
}

type PartSink = EncodeWriter<BufWriter<NamedTempFile>>;

/// An output part being written. Dropped without [`PartWriter::finish`], the
/// temporary file is removed and the destination is left untouched.
pub struct PartWriter {
    writer: csv::Writer<PartSink>,
    terminator: LineTerminator,
    final_path: PathBuf,
}

impl PartWriter {
    /// Start a part that will land at `final_path`.
    ///
    /// # Errors
    ///
    /// Returns `SplitError::InvalidConfig` if `final_path` has no parent
    /// directory, or an IO error if the temporary file cannot be created.
    pub fn create(
        final_path: impl AsRef<Path>,
        candidate: Candidate,
        mode: DecodeMode,
        format: &CsvFormat,
    ) -> Result<Self> {
        let final_path = final_path.as_ref().to_path_buf();
        let parent_dir = final_path.parent().ok_or_else(|| {
            SplitError::InvalidConfig(format!(
                "cannot determine parent directory for: {}",
                final_path.display()
            ))
        })?;
        let parent_dir = if parent_dir.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent_dir
        };

        let temp_file = NamedTempFile::new_in(parent_dir)?;
        let sink = EncodeWriter::new(BufWriter::new(temp_file), candidate, mode);

        Ok(Self {
            writer: format.writer_builder().from_writer(sink),
            terminator: format.terminator,
            final_path,
        })
    }

    /// Write one record. A blank source line is written back as a bare
    /// terminator.
    pub fn write_record(&mut self, record: &ByteRecord) -> Result<()> {
        if is_blank_line(record) {
            // The csv writer would emit `""` for an empty record.
            self.writer.flush()?;
            self.writer.get_mut().write_all(self.terminator.as_bytes())?;
        } else {
            self.writer.write_byte_record(record)?;
        }
        Ok(())
    }

    /// Flush everything and rename the temporary file over the destination.
    /// Returns the number of characters the encoder had to drop.
    pub fn finish(mut self) -> Result<u64> {
        // Flush first so a transcode failure keeps its original io::Error.
        self.writer.flush()?;
        let sink = self
            .writer
            .into_inner()
            .map_err(|e| {
                SplitError::Io(io::Error::new(e.error().kind(), e.error().to_string()))
            })?;
        let unmappable = sink.unmappable();
        let buffered = sink.finish()?;
        let temp_file = buffered
            .into_inner()
            .map_err(|e| SplitError::Io(e.into_error()))?;
        temp_file
            .persist(&self.final_path)
            .map_err(|e| SplitError::Io(e.error))?;
        Ok(unmappable)
    }
}

/// Writes the parts of one split.
#[derive(Debug, Clone)]
pub struct SplitWriter {
    source: PathBuf,
    output_dir: PathBuf,
    base_name: String,
    candidate: Candidate,
    plan: SplitPlan,
    format: CsvFormat,
    part_delay: Option<Duration>,
}

impl SplitWriter {
    /// Parts are named after the source's file stem.
    pub fn new(
        source: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        candidate: Candidate,
        plan: SplitPlan,
    ) -> Self {
        let source = source.into();
        let base_name = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());

        Self {
            source,
            output_dir: output_dir.into(),
            base_name,
            candidate,
            plan,
            format: CsvFormat::default(),
            part_delay: None,
        }
    }

    pub fn format(mut self, format: CsvFormat) -> Self {
        self.format = format;
        self
    }

    /// Pause after each part.
    pub fn part_delay(mut self, delay: Option<Duration>) -> Self {
        self.part_delay = delay;
        self
    }

    /// One pass over the source in `mode`.
    ///
    /// Stops early, without error, when the rows run out before `num_parts`
    /// parts are written. `cancel` is checked before each part.
    pub fn write(
        &self,
        mode: DecodeMode,
        emitter: &Emitter<'_>,
        cancel: &AtomicBool,
    ) -> Result<SplitReport> {
        self.format.validate()?;
        let file = open_source(&self.source)?;
        let decoded = DecodeReader::new(file, self.candidate, mode);
        let mut reader = self
            .format
            .reader_builder()
            .from_reader(self.format.blank_lines(decoded));

        let mut header = ByteRecord::new();
        if !reader.read_byte_record(&mut header)? {
            return Err(SplitError::NoDataRows);
        }

        let num_parts = self.plan.num_parts;
        let chunk_size = self.plan.chunk_size;
        let mut parts = Vec::new();
        let mut unmappable = 0u64;
        let mut record = ByteRecord::new();

        for i in 0..num_parts {
            if cancel.load(Ordering::Relaxed) {
                return Err(SplitError::Cancelled {
                    completed: parts.len(),
                });
            }

            if !reader.read_byte_record(&mut record)? {
                emitter.info(format!(
                    "All rows distributed early: generated {i} of {num_parts} file(s)"
                ));
                break;
            }

            let index = i + 1;
            let name = part_file_name(&self.base_name, index);
            let path = self.output_dir.join(&name);

            let mut part = PartWriter::create(&path, self.candidate, mode, &self.format)?;
            part.write_record(&header)?;
            part.write_record(&record)?;
            let mut rows = 1u64;
            while rows < chunk_size && reader.read_byte_record(&mut record)? {
                part.write_record(&record)?;
                rows += 1;
            }
            unmappable += part.finish()?;

            tracing::debug!(index, rows, path = %path.display(), "part written");
            emitter.info(format!("[{index}/{num_parts}] wrote {name} ({rows} rows)"));
            parts.push(PartInfo { index, path, rows });

            if let Some(delay) = self.part_delay {
                std::thread::sleep(delay);
            }
        }

        let malformed = reader.into_inner().into_inner().malformed();
        Ok(SplitReport {
            parts,
            mode,
            malformed,
            unmappable,
        })
    }

    /// Write strictly; on a decode or encode failure, warn and redo the whole
    /// split tolerantly. Parts from the failed pass are replaced by name.
    pub fn write_with_retry(
        &self,
        emitter: &Emitter<'_>,
        cancel: &AtomicBool,
    ) -> Result<SplitReport> {
        match self.write(DecodeMode::Strict, emitter, cancel) {
            Err(e) if e.is_decode_failure() => {
                tracing::warn!(error = %e, "strict split failed");
                emitter.warning(format!(
                    "Strict mode failed ({e}), restarting and ignoring undecodable bytes..."
                ));
                let report = self.write(DecodeMode::Tolerant, emitter, cancel)?;
                if report.malformed > 0 || report.unmappable > 0 {
                    emitter.warning(format!(
                        "Dropped {} undecodable sequence(s) and {} unwritable character(s)",
                        report.malformed, report.unmappable
                    ));
                }
                Ok(report)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{EventLog, Level};
    use std::fs;
    use tempfile::TempDir;

    fn create_source(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).expect("Failed to write source");
        path
    }

    fn rows(n: usize) -> String {
        let mut s = String::from("id,name\n");
        for i in 1..=n {
            s.push_str(&format!("{i},row{i}\n"));
        }
        s
    }

    #[test]
    fn test_part_file_name() {
        assert_eq!(part_file_name("sales", 3), "sales_part_3.csv");
    }

    #[test]
    fn test_part_writer_drop_cleans_up() {
        let dir = TempDir::new().unwrap();
        let final_path = dir.path().join("out.csv");
        {
            let mut part = PartWriter::create(
                &final_path,
                Candidate::Utf8,
                DecodeMode::Strict,
                &CsvFormat::default(),
            )
            .unwrap();
            part.write_record(&ByteRecord::from(vec!["a", "b"])).unwrap();
        }
        assert!(!final_path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_part_writer_overwrites() {
        let dir = TempDir::new().unwrap();
        let final_path = dir.path().join("out.csv");
        fs::write(&final_path, "OLD").unwrap();

        let mut part = PartWriter::create(
            &final_path,
            Candidate::Utf8,
            DecodeMode::Strict,
            &CsvFormat::default(),
        )
        .unwrap();
        part.write_record(&ByteRecord::from(vec!["NEW"])).unwrap();
        part.finish().unwrap();

        assert_eq!(fs::read_to_string(&final_path).unwrap(), "NEW\r\n");
    }

    #[test]
    fn test_ten_rows_three_parts() {
        let dir = TempDir::new().unwrap();
        let source = create_source(&dir, "data.csv", rows(10).as_bytes());
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();

        let plan = SplitPlan::new(10, 3).unwrap();
        let writer = SplitWriter::new(&source, &out, Candidate::Utf8, plan);
        let log = EventLog::new();
        let report = writer
            .write(DecodeMode::Strict, &Emitter::new(&log), &AtomicBool::new(false))
            .unwrap();

        let sizes: Vec<u64> = report.parts.iter().map(|p| p.rows).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(report.total_rows(), 10);
        assert_eq!(
            fs::read_to_string(out.join("data_part_3.csv")).unwrap(),
            "id,name\r\n9,row9\r\n10,row10\r\n"
        );
        assert_eq!(log.messages(Level::Info).len(), 3);
    }

    #[test]
    fn test_multiline_records_stop_early() {
        // Four raw data lines but only two records.
        let dir = TempDir::new().unwrap();
        let source = create_source(&dir, "notes.csv", b"k,v\n1,\"a\nb\"\n2,\"c\nd\"\n");
        let plan = SplitPlan::new(4, 4).unwrap();
        let writer = SplitWriter::new(&source, dir.path(), Candidate::Utf8, plan);
        let log = EventLog::new();

        let report = writer
            .write(DecodeMode::Strict, &Emitter::new(&log), &AtomicBool::new(false))
            .unwrap();

        assert_eq!(report.parts.len(), 2);
        assert!(!dir.path().join("notes_part_3.csv").exists());
        let infos = log.messages(Level::Info);
        assert!(infos.last().unwrap().contains("generated 2 of 4"));
        assert_eq!(
            fs::read_to_string(dir.path().join("notes_part_2.csv")).unwrap(),
            "k,v\r\n2,\"c\nd\"\r\n"
        );
    }

    #[test]
    fn test_blank_lines_are_rows() {
        let dir = TempDir::new().unwrap();
        let source = create_source(&dir, "gaps.csv", b"id,name\n1,a\n\n2,b\n\n3,c\n");
        let plan = SplitPlan::new(5, 2).unwrap();
        let writer = SplitWriter::new(&source, dir.path(), Candidate::Utf8, plan);
        let log = EventLog::new();

        let report = writer
            .write(DecodeMode::Strict, &Emitter::new(&log), &AtomicBool::new(false))
            .unwrap();

        let sizes: Vec<u64> = report.parts.iter().map(|p| p.rows).collect();
        assert_eq!(sizes, vec![3, 2]);
        assert_eq!(
            fs::read_to_string(dir.path().join("gaps_part_1.csv")).unwrap(),
            "id,name\r\n1,a\r\n\r\n2,b\r\n"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("gaps_part_2.csv")).unwrap(),
            "id,name\r\n\r\n3,c\r\n"
        );
    }

    #[test]
    fn test_non_ascii_delimiter_rejected() {
        let dir = TempDir::new().unwrap();
        let source = create_source(&dir, "data.csv", rows(2).as_bytes());
        let plan = SplitPlan::new(2, 1).unwrap();
        let format = CsvFormat::new(0xA7, Default::default(), LineTerminator::Lf);
        let writer = SplitWriter::new(&source, dir.path(), Candidate::Utf8, plan).format(format);
        let log = EventLog::new();

        let err = writer
            .write(DecodeMode::Strict, &Emitter::new(&log), &AtomicBool::new(false))
            .unwrap_err();
        assert!(matches!(err, SplitError::InvalidConfig(_)));
        assert!(!dir.path().join("data_part_1.csv").exists());
    }

    #[test]
    fn test_cancel_before_first_part() {
        let dir = TempDir::new().unwrap();
        let source = create_source(&dir, "data.csv", rows(4).as_bytes());
        let plan = SplitPlan::new(4, 2).unwrap();
        let writer = SplitWriter::new(&source, dir.path(), Candidate::Utf8, plan);
        let log = EventLog::new();

        let err = writer
            .write(DecodeMode::Strict, &Emitter::new(&log), &AtomicBool::new(true))
            .unwrap_err();
        assert!(matches!(err, SplitError::Cancelled { completed: 0 }));
        assert!(!dir.path().join("data_part_1.csv").exists());
    }

    #[test]
    fn test_retry_after_late_decode_error() {
        let dir = TempDir::new().unwrap();
        let mut content = rows(6).into_bytes();
        content.extend_from_slice(b"7,bad\xFFbyte\n");
        let source = create_source(&dir, "late.csv", &content);

        let plan = SplitPlan::new(7, 2).unwrap();
        let writer = SplitWriter::new(&source, dir.path(), Candidate::Utf8, plan);
        let log = EventLog::new();

        let report = writer
            .write_with_retry(&Emitter::new(&log), &AtomicBool::new(false))
            .unwrap();

        assert_eq!(report.mode, DecodeMode::Tolerant);
        assert_eq!(report.malformed, 1);
        assert_eq!(report.total_rows(), 7);
        assert_eq!(log.messages(Level::Warning).len(), 2);
        let last = fs::read_to_string(dir.path().join("late_part_2.csv")).unwrap();
        assert!(last.ends_with("7,badbyte\r\n"));
    }

    #[test]
    fn test_gbk_output_stays_gbk() {
        use encoding_rs::GBK;

        let dir = TempDir::new().unwrap();
        let (encoded, _, _) = GBK.encode("姓名,城市\n张三,北京\n李四,上海\n");
        let source = create_source(&dir, "people.csv", &encoded);

        let plan = SplitPlan::new(2, 2).unwrap();
        let writer = SplitWriter::new(&source, dir.path(), Candidate::Gbk, plan);
        let log = EventLog::new();
        writer
            .write(DecodeMode::Strict, &Emitter::new(&log), &AtomicBool::new(false))
            .unwrap();

        let bytes = fs::read(dir.path().join("people_part_2.csv")).unwrap();
        let (expected, _, _) = GBK.encode("姓名,城市\r\n李四,上海\r\n");
        assert_eq!(bytes, expected.into_owned());
    }
}
