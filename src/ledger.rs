//! Resumable record of assessment-battery progress.
//!
//! One CSV row per `(mechanism, task, trial)`. The first row still marked
//! incomplete is the current one; rows are consumed strictly in table order.
//! The per-mechanism randomised task block is shuffled once, when the table
//! is created, and never again. The file is rewritten after every mutation.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::BatteryConfig;
use crate::errors::LedgerError;
use crate::telemetry::Mechanism;

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    Arom,
    Prom,
    Aprom,
    Disc,
    Prop,
    Fctrl,
    PosHold,
}

impl Task {
    pub fn name(self) -> &'static str {
        match self {
            Task::Arom => "AROM",
            Task::Prom => "PROM",
            Task::Aprom => "APROM",
            Task::Disc => "DISC",
            Task::Prop => "PROP",
            Task::Fctrl => "FCTRL",
            Task::PosHold => "POSHOLD",
        }
    }

    pub fn from_name(name: &str) -> LedgerResult<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "AROM" => Ok(Task::Arom),
            "PROM" => Ok(Task::Prom),
            "APROM" => Ok(Task::Aprom),
            "DISC" => Ok(Task::Disc),
            "PROP" => Ok(Task::Prop),
            "FCTRL" => Ok(Task::Fctrl),
            "POSHOLD" => Ok(Task::PosHold),
            other => Err(LedgerError::UnknownTask(other.to_string())),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowStatus {
    Incomplete,
    Complete,
    Skipped,
    Partial,
}

impl RowStatus {
    pub fn name(self) -> &'static str {
        match self {
            RowStatus::Incomplete => "incomplete",
            RowStatus::Complete => "complete",
            RowStatus::Skipped => "skipped",
            RowStatus::Partial => "partial",
        }
    }

    pub fn from_name(name: &str) -> LedgerResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "incomplete" => Ok(RowStatus::Incomplete),
            "complete" => Ok(RowStatus::Complete),
            "skipped" => Ok(RowStatus::Skipped),
            "partial" => Ok(RowStatus::Partial),
            other => Err(LedgerError::UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerRow {
    pub session: Option<u32>,
    pub mechanism: Mechanism,
    pub task: Task,
    pub trial: u32,
    pub raw_file: String,
    pub summary_file: String,
    pub comment: String,
    pub status: RowStatus,
}

impl LedgerRow {
    fn new(mechanism: Mechanism, task: Task, trial: u32) -> Self {
        Self {
            session: None,
            mechanism,
            task,
            trial,
            raw_file: String::new(),
            summary_file: String::new(),
            comment: String::new(),
            status: RowStatus::Incomplete,
        }
    }

    pub fn is_incomplete(&self) -> bool {
        self.status == RowStatus::Incomplete
    }
}

/// On-disk column layout.
#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    session: Option<u32>,
    mechanism: String,
    task: String,
    trial: u32,
    rawfile: String,
    summaryfile: String,
    comment: String,
    status: String,
}

impl From<&LedgerRow> for CsvRow {
    fn from(row: &LedgerRow) -> Self {
        CsvRow {
            session: row.session,
            mechanism: row.mechanism.name().to_string(),
            task: row.task.name().to_string(),
            trial: row.trial,
            rawfile: row.raw_file.clone(),
            summaryfile: row.summary_file.clone(),
            comment: row.comment.clone(),
            status: row.status.name().to_string(),
        }
    }
}

impl TryFrom<CsvRow> for LedgerRow {
    type Error = LedgerError;

    fn try_from(row: CsvRow) -> LedgerResult<Self> {
        let mechanism = Mechanism::from_name(&row.mechanism)
            .ok_or_else(|| LedgerError::UnknownMechanism(row.mechanism.clone()))?;
        Ok(LedgerRow {
            session: row.session,
            mechanism,
            task: Task::from_name(&row.task)?,
            trial: row.trial,
            raw_file: row.rawfile,
            summary_file: row.summaryfile,
            comment: row.comment,
            status: RowStatus::from_name(&row.status)?,
        })
    }
}

/// Build the battery rows: fixed tasks first, then the randomised block,
/// for every mechanism in order.
pub fn plan_rows<R: Rng>(battery: &BatteryConfig, rng: &mut R) -> LedgerResult<Vec<LedgerRow>> {
    let mut rows = Vec::new();
    for name in &battery.mechanisms {
        let mechanism = Mechanism::from_name(name)
            .ok_or_else(|| LedgerError::UnknownMechanism(name.clone()))?;
        let applies = |task: &Task| mechanism.is_hoc() || !battery.hoc_only_tasks.iter().any(|t| t == task.name());

        let fixed = battery
            .fixed_tasks
            .iter()
            .map(|t| Task::from_name(t))
            .collect::<LedgerResult<Vec<_>>>()?;
        let mut randomized = battery
            .randomized_tasks
            .iter()
            .map(|t| Task::from_name(t))
            .collect::<LedgerResult<Vec<_>>>()?;
        randomized.shuffle(rng);

        for task in fixed.into_iter().chain(randomized).filter(applies) {
            rows.push(LedgerRow::new(mechanism, task, 1));
        }
    }
    Ok(rows)
}

#[derive(Debug)]
pub struct ProtocolLedger {
    path: PathBuf,
    rows: Vec<LedgerRow>,
    session: u32,
}

impl ProtocolLedger {
    /// Resume `path` if it exists, otherwise create it from the battery plan.
    pub fn open_or_create(
        path: impl AsRef<Path>,
        battery: &BatteryConfig,
        seed: Option<u64>,
    ) -> LedgerResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        let rows = plan_rows(battery, &mut rng)?;
        let ledger = Self {
            path: path.to_path_buf(),
            rows,
            session: 1,
        };
        ledger.flush()?;
        info!(
            "created protocol ledger {} with {} rows",
            path.display(),
            ledger.rows.len()
        );
        Ok(ledger)
    }

    pub fn load(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let path = path.as_ref();
        let mut reader = csv::Reader::from_path(path)?;
        let rows = reader
            .deserialize::<CsvRow>()
            .map(|r| r.map_err(LedgerError::from).and_then(LedgerRow::try_from))
            .collect::<LedgerResult<Vec<_>>>()?;
        let session = rows.iter().filter_map(|r| r.session).max().unwrap_or(0) + 1;
        debug!(
            "loaded protocol ledger {}: {} rows, session {}",
            path.display(),
            rows.len(),
            session
        );
        Ok(Self {
            path: path.to_path_buf(),
            rows,
            session,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> &[LedgerRow] {
        &self.rows
    }

    /// Session id stamped on rows completed from this instance.
    pub fn session(&self) -> u32 {
        self.session
    }

    pub fn current_index(&self) -> Option<usize> {
        self.rows.iter().position(LedgerRow::is_incomplete)
    }

    pub fn current(&self) -> Option<&LedgerRow> {
        self.current_index().map(|i| &self.rows[i])
    }

    pub fn is_complete(&self) -> bool {
        self.current_index().is_none()
    }

    pub fn is_mechanism_complete(&self, mechanism: Mechanism) -> bool {
        !self
            .rows
            .iter()
            .any(|r| r.mechanism == mechanism && r.is_incomplete())
    }

    /// Mechanisms in table order, without repeats.
    pub fn mechanisms(&self) -> Vec<Mechanism> {
        let mut seen = Vec::new();
        for row in &self.rows {
            if !seen.contains(&row.mechanism) {
                seen.push(row.mechanism);
            }
        }
        seen
    }

    /// Close the current row, which must belong to `task` on `mechanism`.
    pub fn complete_current(
        &mut self,
        mechanism: Mechanism,
        task: Task,
        status: RowStatus,
        raw_file: &str,
        summary_file: &str,
        comment: &str,
    ) -> LedgerResult<()> {
        let idx = self.current_index().ok_or(LedgerError::NoCurrentRow)?;
        let row = &mut self.rows[idx];
        if row.mechanism != mechanism || row.task != task {
            return Err(LedgerError::OutOfOrder {
                expected: format!("{} {}", row.mechanism, row.task),
                got: format!("{} {}", mechanism, task),
            });
        }
        row.session = Some(self.session);
        row.raw_file = raw_file.to_string();
        row.summary_file = summary_file.to_string();
        row.comment = comment.to_string();
        row.status = status;
        debug!("ledger row {} -> {}", idx, status.name());
        self.flush()
    }

    /// Mark every remaining row of `mechanism` skipped. Requires a comment.
    pub fn skip_mechanism(&mut self, mechanism: Mechanism, comment: &str) -> LedgerResult<usize> {
        if comment.trim().is_empty() {
            return Err(LedgerError::MissingComment);
        }
        let session = self.session;
        let mut skipped = 0;
        for row in self
            .rows
            .iter_mut()
            .filter(|r| r.mechanism == mechanism && r.is_incomplete())
        {
            row.status = RowStatus::Skipped;
            row.session = Some(session);
            row.comment = comment.to_string();
            skipped += 1;
        }
        info!("skipped {} rows of {}", skipped, mechanism);
        self.flush()?;
        Ok(skipped)
    }

    /// Rewrite the whole table through a temporary file.
    fn flush(&self) -> LedgerResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&tmp)?;
            for row in &self.rows {
                writer.serialize(CsvRow::from(row))?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tasks_of(rows: &[LedgerRow], mechanism: Mechanism) -> Vec<Task> {
        rows.iter()
            .filter(|r| r.mechanism == mechanism)
            .map(|r| r.task)
            .collect()
    }

    #[test]
    fn plan_keeps_fixed_prefix_and_filters_hoc_tasks() {
        let battery = BatteryConfig::default();
        let mut rng = StdRng::seed_from_u64(7);
        let rows = plan_rows(&battery, &mut rng).unwrap();

        let wfe = tasks_of(&rows, Mechanism::Wfe);
        assert_eq!(&wfe[..3], &[Task::Arom, Task::Prom, Task::Aprom]);
        assert_eq!(wfe.len(), 5);
        assert!(!wfe.contains(&Task::Fctrl));

        let hoc = tasks_of(&rows, Mechanism::Hoc);
        assert_eq!(hoc.len(), 6);
        let mut block = hoc[3..].to_vec();
        block.sort_by_key(|t| t.name());
        assert_eq!(block, vec![Task::Disc, Task::Fctrl, Task::Prop]);
    }

    #[test]
    fn shuffle_is_fixed_at_creation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.csv");
        let battery = BatteryConfig::default();
        let first = ProtocolLedger::open_or_create(&path, &battery, None).unwrap();
        let again = ProtocolLedger::open_or_create(&path, &battery, None).unwrap();
        assert_eq!(first.rows(), again.rows());
    }

    #[test]
    fn rows_are_consumed_in_order_and_resumed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("ledger.csv");
        let battery = BatteryConfig::default();
        let mut ledger = ProtocolLedger::open_or_create(&path, &battery, Some(1)).unwrap();
        assert_eq!(ledger.session(), 1);

        let current = ledger.current().unwrap().clone();
        assert_eq!((current.mechanism, current.task), (Mechanism::Wfe, Task::Arom));

        let wrong = ledger.complete_current(
            Mechanism::Wfe,
            Task::Prom,
            RowStatus::Complete,
            "",
            "",
            "",
        );
        assert!(matches!(wrong, Err(LedgerError::OutOfOrder { .. })));

        ledger
            .complete_current(
                Mechanism::Wfe,
                Task::Arom,
                RowStatus::Complete,
                "raw.csv",
                "summary.csv",
                "ok",
            )
            .unwrap();
        assert_eq!(ledger.current().unwrap().task, Task::Prom);

        let resumed = ProtocolLedger::load(&path).unwrap();
        assert_eq!(resumed.rows(), ledger.rows());
        assert_eq!(resumed.session(), 2);
        assert_eq!(resumed.rows()[0].raw_file, "raw.csv");
        assert_eq!(resumed.rows()[0].status, RowStatus::Complete);
    }

    #[test]
    fn skipping_requires_comment_and_marks_remaining_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.csv");
        let mut ledger =
            ProtocolLedger::open_or_create(&path, &BatteryConfig::default(), Some(3)).unwrap();

        assert!(matches!(
            ledger.skip_mechanism(Mechanism::Wfe, "  "),
            Err(LedgerError::MissingComment)
        ));
        assert!(!ledger.is_mechanism_complete(Mechanism::Wfe));

        let n = ledger.skip_mechanism(Mechanism::Wfe, "wrist pain").unwrap();
        assert_eq!(n, 5);
        assert!(ledger.is_mechanism_complete(Mechanism::Wfe));
        assert_eq!(ledger.current().unwrap().mechanism, Mechanism::Fps);
        assert!(ledger
            .rows()
            .iter()
            .filter(|r| r.mechanism == Mechanism::Wfe)
            .all(|r| r.status == RowStatus::Skipped && r.comment == "wrist pain"));
    }

    #[test]
    fn unknown_task_in_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.csv");
        fs::write(
            &path,
            "session,mechanism,task,trial,rawfile,summaryfile,comment,status\n,WFE,JUGGLE,1,,,,incomplete\n",
        )
        .unwrap();
        assert!(matches!(
            ProtocolLedger::load(&path),
            Err(LedgerError::UnknownTask(_))
        ));
    }
}
