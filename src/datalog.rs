//! Raw-data and per-trial summary CSV writers.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::errors::Result;
use crate::telemetry::{ControlParams, DeviceSnapshot};

/// Columns of the raw-data log, one row per NEWDATA tick.
pub const RAW_HEADER: [&str; 17] = [
    "time",
    "status",
    "controltype",
    "error",
    "mechanism",
    "angle",
    "hocdisp",
    "torque",
    "control",
    "target",
    "desired",
    "controlbound",
    "controldir",
    "controlgain",
    "button",
    "trial",
    "state",
];

fn create_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(File::create(path)?)
}

pub struct RawLogger {
    writer: csv::Writer<Box<dyn Write + Send>>,
    rows: u64,
}

impl RawLogger {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_writer(create_file(path.as_ref())?)
    }

    pub fn from_writer(writer: impl Write + Send + 'static) -> Result<Self> {
        let boxed: Box<dyn Write + Send> = Box::new(writer);
        let mut writer = csv::Writer::from_writer(boxed);
        writer.write_record(RAW_HEADER)?;
        Ok(Self { writer, rows: 0 })
    }

    pub fn log(
        &mut self,
        snapshot: &DeviceSnapshot,
        params: ControlParams,
        trial: usize,
        state: &str,
    ) -> Result<()> {
        let aperture = snapshot
            .hand_aperture()
            .map(|a| format!("{a:.4}"))
            .unwrap_or_default();
        let desired = snapshot
            .desired()
            .map(|d| format!("{d:.4}"))
            .unwrap_or_default();
        self.writer.write_record([
            format!("{:.6}", snapshot.timestamp.as_secs_f64()),
            snapshot.status.to_string(),
            snapshot.control_type.name().to_string(),
            snapshot.error.0.to_string(),
            snapshot.mechanism.name().to_string(),
            format!("{:.4}", snapshot.angle()),
            aperture,
            format!("{:.4}", snapshot.torque()),
            format!("{:.4}", snapshot.control()),
            format!("{:.4}", snapshot.target()),
            desired,
            format!("{:.4}", params.bound),
            format!("{:.0}", params.direction),
            format!("{:.4}", params.gain),
            snapshot.button.to_string(),
            trial.to_string(),
            state.to_string(),
        ])?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// One row per trial; flushed row by row.
pub struct SummaryLogger {
    writer: csv::Writer<Box<dyn Write + Send>>,
}

impl SummaryLogger {
    pub fn create(path: impl AsRef<Path>, header: &[&str]) -> Result<Self> {
        Self::from_writer(create_file(path.as_ref())?, header)
    }

    pub fn from_writer(writer: impl Write + Send + 'static, header: &[&str]) -> Result<Self> {
        let boxed: Box<dyn Write + Send> = Box::new(writer);
        let mut writer = csv::Writer::from_writer(boxed);
        writer.write_record(header)?;
        writer.flush()?;
        Ok(Self { writer })
    }

    pub fn log(&mut self, row: &[String]) -> Result<()> {
        self.writer.write_record(row)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{tests::stream_payload, unpack, Mechanism};
    use std::time::Duration;

    #[test]
    fn raw_rows_follow_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw").join("arom.csv");
        let mut logger = RawLogger::create(&path).unwrap();
        let payload = stream_payload(1, 0, Mechanism::Hoc, [30.0, 0.5, 0.0, 0.0, 0.0, 0.2], 1);
        let snap = unpack(&payload, Duration::from_millis(1500)).unwrap();
        logger
            .log(&snap, ControlParams::default(), 2, "TRIAL_ACTIVE_MOVING")
            .unwrap();
        logger.flush().unwrap();
        assert_eq!(logger.rows(), 1);

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), RAW_HEADER.to_vec());
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(&row[0], "1.500000");
        assert_eq!(&row[4], "HOC");
        assert_eq!(&row[6], "3.0000");
        assert_eq!(&row[15], "2");
        assert_eq!(&row[16], "TRIAL_ACTIVE_MOVING");
    }

    #[test]
    fn summary_rows_are_flushed_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.csv");
        let mut logger = SummaryLogger::create(&path, &["trial", "result"]).unwrap();
        logger.log(&["1".into(), "success".into()]).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "trial,result\n1,success\n");
    }
}
