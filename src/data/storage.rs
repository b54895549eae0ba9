//! CSV export of the derived ledger.
//!
//! One row per committed segment with the columns
//! `index, kind, time, R_ptp, R_rms, R_lin, I_0, note`. Columns that do not
//! apply to a record kind are left empty. The file starts with `# `-prefixed
//! comment lines naming the stream.
use crate::core::DerivedRecord;
use crate::error::PipelineResult;
use std::path::{Path, PathBuf};

/// Column names of the export.
pub const CSV_HEADER: [&str; 8] = ["index", "kind", "time", "R_ptp", "R_rms", "R_lin", "I_0", "note"];

/// Writer for derived records.
#[cfg(feature = "storage_csv")]
pub struct CsvTransportWriter {
    path: PathBuf,
    writer: csv::Writer<std::fs::File>,
    rows: usize,
}

#[cfg(feature = "storage_csv")]
impl CsvTransportWriter {
    /// Create `<dir>/<stream>_<timestamp>.csv`, creating `dir` if needed.
    pub fn create_in(dir: &Path, stream: &str) -> PipelineResult<Self> {
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
        }
        let file_name = format!(
            "{}_{}.csv",
            stream.replace('/', "_"),
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        );
        Self::create(&dir.join(file_name), stream)
    }

    /// Create (or truncate) the file at `path`.
    pub fn create(path: &Path, stream: &str) -> PipelineResult<Self> {
        use std::io::Write;

        let mut file = std::fs::File::create(path)?;
        writeln!(file, "# stream: {stream}")?;
        writeln!(file, "# created: {}", chrono::Utc::now().to_rfc3339())?;

        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(CSV_HEADER)?;
        tracing::info!(path = %path.display(), "CSV export opened");
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            rows: 0,
        })
    }

    /// File being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows written so far, header excluded.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Append one row.
    pub fn write(&mut self, record: &DerivedRecord) -> PipelineResult<()> {
        self.writer.write_record(row(record))?;
        self.rows += 1;
        Ok(())
    }

    /// Append one row per record, in order.
    pub fn write_all<'a>(
        &mut self,
        records: impl IntoIterator<Item = &'a DerivedRecord>,
    ) -> PipelineResult<()> {
        for record in records {
            self.write(record)?;
        }
        Ok(())
    }

    /// Flush and close the file.
    pub fn finish(mut self) -> PipelineResult<PathBuf> {
        self.writer.flush()?;
        tracing::info!(path = %self.path.display(), rows = self.rows, "CSV export closed");
        Ok(self.path)
    }
}

/// Stub used when CSV support is compiled out. Every call fails.
#[cfg(not(feature = "storage_csv"))]
pub struct CsvTransportWriter;

#[cfg(not(feature = "storage_csv"))]
impl CsvTransportWriter {
    /// Always fails.
    pub fn create_in(_dir: &Path, _stream: &str) -> PipelineResult<Self> {
        Err(feature_disabled())
    }

    /// Always fails.
    pub fn create(_path: &Path, _stream: &str) -> PipelineResult<Self> {
        Err(feature_disabled())
    }

    /// Always fails.
    pub fn write(&mut self, _record: &DerivedRecord) -> PipelineResult<()> {
        Err(feature_disabled())
    }

    /// Always fails.
    pub fn write_all<'a>(
        &mut self,
        _records: impl IntoIterator<Item = &'a DerivedRecord>,
    ) -> PipelineResult<()> {
        Err(feature_disabled())
    }

    /// Always fails.
    pub fn finish(self) -> PipelineResult<PathBuf> {
        Err(feature_disabled())
    }
}

#[cfg(not(feature = "storage_csv"))]
fn feature_disabled() -> crate::error::PipelineError {
    crate::error::PipelineError::Configuration("CSV export requires the 'storage_csv' feature".to_string())
}

fn num(x: f64) -> String {
    if x.is_nan() {
        "NaN".to_string()
    } else {
        x.to_string()
    }
}

/// Cells of one CSV row.
pub fn row(record: &DerivedRecord) -> [String; 8] {
    let index = record.segment().to_string();
    let kind = record.kind().to_string();
    let empty = String::new;
    match record {
        DerivedRecord::Calibration { offset, .. } => {
            let mut channels: Vec<_> = offset.offsets.iter().collect();
            channels.sort_by(|a, b| a.0.cmp(b.0));
            let note = channels
                .iter()
                .map(|(ch, v)| format!("{ch}={}", num(**v)))
                .collect::<Vec<_>>()
                .join(";");
            [index, kind, num(offset.time), empty(), empty(), empty(), empty(), note]
        }
        DerivedRecord::ConstantVoltage { estimate, .. } => [
            index,
            kind,
            num(estimate.time),
            empty(),
            empty(),
            empty(),
            empty(),
            format!("R_mean={};u_R={}", num(estimate.r_mean), num(estimate.u_r)),
        ],
        DerivedRecord::Sweep {
            direction, estimate, ..
        } => [
            index,
            kind,
            num(estimate.time),
            num(estimate.r_ptp),
            num(estimate.r_rms),
            num(estimate.r_lin),
            num(estimate.i_0),
            direction.as_str().to_string(),
        ],
        DerivedRecord::Skipped { reason, .. } => {
            [index, kind, empty(), empty(), empty(), empty(), empty(), reason.clone()]
        }
    }
}

#[cfg(all(test, feature = "storage_csv"))]
mod tests {
    use super::*;
    use crate::core::{SweepDirection, TransportEstimate};
    use tempfile::tempdir;

    #[test]
    fn test_writes_header_and_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("derived.csv");
        let mut writer = CsvTransportWriter::create(&path, "run").unwrap();
        writer
            .write_all(&[
                DerivedRecord::Sweep {
                    segment: 1,
                    direction: SweepDirection::Up,
                    estimate: TransportEstimate {
                        time: 0.5,
                        r_ptp: 100.0,
                        r_rms: 100.0,
                        r_lin: 100.0,
                        i_0: 0.0,
                    },
                },
                DerivedRecord::Skipped {
                    segment: 2,
                    reason: "bad case".into(),
                },
            ])
            .unwrap();
        assert_eq!(writer.rows(), 2);
        writer.finish().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "# stream: run");
        assert_eq!(lines[2], "index,kind,time,R_ptp,R_rms,R_lin,I_0,note");
        assert_eq!(lines[3], "1,sweep,0.5,100,100,100,0,up");
        assert_eq!(lines[4], "2,skipped,,,,,,bad case");
    }

    #[test]
    fn test_create_in_makes_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("out");
        let writer = CsvTransportWriter::create_in(&nested, "cooldown/run1").unwrap();
        assert!(nested.exists());
        let name = writer.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("cooldown_run1_"));
    }
}
