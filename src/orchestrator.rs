//! Full-assessment orchestration over the protocol ledger.
//!
//! Subject, limb and mechanism are chosen in turn; then the ledger dictates
//! which task comes next. Where to go after a task is always recomputed from
//! the ledger on disk, never from flags kept alongside it, so an interrupted
//! session resumes exactly where the ledger says.

use std::fmt;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::config::BatteryConfig;
use crate::errors::{DriverError, Result, RomError};
use crate::ledger::{ProtocolLedger, RowStatus, Task};
use crate::record::{MechanismRom, RomKind, RomRange, RomStore};
use crate::telemetry::Mechanism;

pub const LEDGER_FILE: &str = "protocol.csv";
pub const ROM_FILE: &str = "romdata.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Limb {
    Left,
    Right,
}

impl Limb {
    pub fn name(self) -> &'static str {
        match self {
            Limb::Left => "left",
            Limb::Right => "right",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "left" | "l" => Some(Limb::Left),
            "right" | "r" => Some(Limb::Right),
            _ => None,
        }
    }
}

impl fmt::Display for Limb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssessState {
    WaitForSubjectSelect,
    WaitForLimbSelect,
    WaitForMechanismSelect,
    WaitForCalibrate,
    WaitForTaskSelect,
    WaitForAromAssess,
    WaitForPromAssess,
    WaitForApromAssess,
    WaitForDiscAssess,
    WaitForPropAssess,
    WaitForFctrlAssess,
    WaitForPosHoldAssess,
    MechanismDone,
    SubjectLimbDone,
}

impl AssessState {
    fn for_task(task: Task) -> Self {
        match task {
            Task::Arom => AssessState::WaitForAromAssess,
            Task::Prom => AssessState::WaitForPromAssess,
            Task::Aprom => AssessState::WaitForApromAssess,
            Task::Disc => AssessState::WaitForDiscAssess,
            Task::Prop => AssessState::WaitForPropAssess,
            Task::Fctrl => AssessState::WaitForFctrlAssess,
            Task::PosHold => AssessState::WaitForPosHoldAssess,
        }
    }

    pub fn is_assessing(self) -> bool {
        matches!(
            self,
            AssessState::WaitForAromAssess
                | AssessState::WaitForPromAssess
                | AssessState::WaitForApromAssess
                | AssessState::WaitForDiscAssess
                | AssessState::WaitForPropAssess
                | AssessState::WaitForFctrlAssess
                | AssessState::WaitForPosHoldAssess
        )
    }
}

impl fmt::Display for AssessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AssessState::WaitForSubjectSelect => "WAIT_FOR_SUBJECT_SELECT",
            AssessState::WaitForLimbSelect => "WAIT_FOR_LIMB_SELECT",
            AssessState::WaitForMechanismSelect => "WAIT_FOR_MECHANISM_SELECT",
            AssessState::WaitForCalibrate => "WAIT_FOR_CALIBRATE",
            AssessState::WaitForTaskSelect => "WAIT_FOR_TASK_SELECT",
            AssessState::WaitForAromAssess => "WAIT_FOR_AROM_ASSESS",
            AssessState::WaitForPromAssess => "WAIT_FOR_PROM_ASSESS",
            AssessState::WaitForApromAssess => "WAIT_FOR_APROM_ASSESS",
            AssessState::WaitForDiscAssess => "WAIT_FOR_DISC_ASSESS",
            AssessState::WaitForPropAssess => "WAIT_FOR_PROP_ASSESS",
            AssessState::WaitForFctrlAssess => "WAIT_FOR_FCTRL_ASSESS",
            AssessState::WaitForPosHoldAssess => "WAIT_FOR_POSHOLD_ASSESS",
            AssessState::MechanismDone => "MECHANISM_DONE",
            AssessState::SubjectLimbDone => "SUBJECT_LIMB_DONE",
        })
    }
}

/// How a task window ended.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub status: RowStatus,
    pub raw_file: String,
    pub summary_file: String,
    pub comment: String,
    /// Summary range of a ROM task.
    pub rom: Option<RomRange>,
}

impl TaskOutcome {
    pub fn complete(raw_file: impl Into<String>, summary_file: impl Into<String>) -> Self {
        Self {
            status: RowStatus::Complete,
            raw_file: raw_file.into(),
            summary_file: summary_file.into(),
            comment: String::new(),
            rom: None,
        }
    }

    pub fn with_rom(mut self, range: RomRange) -> Self {
        self.rom = Some(range);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorEvent {
    SubjectSelected(String),
    LimbSelected(Limb),
    MechanismSelected(Mechanism),
    CalibrationDone,
    TaskSelected(Task),
    TaskCompleted(TaskOutcome),
    TaskCancelled,
    SkipMechanism { comment: String },
    Next,
}

fn rom_kind(task: Task) -> Option<RomKind> {
    match task {
        Task::Arom => Some(RomKind::Arom),
        Task::Aprom => Some(RomKind::Aprom),
        Task::Prom => Some(RomKind::Prom),
        _ => None,
    }
}

/// Top-level session flow for one subject and limb.
#[derive(Debug)]
pub struct FullAssessment {
    data_dir: PathBuf,
    battery: BatteryConfig,
    seed: Option<u64>,
    state: AssessState,
    subject: Option<String>,
    limb: Option<Limb>,
    mechanism: Option<Mechanism>,
    task: Option<Task>,
    ledger: Option<ProtocolLedger>,
    roms: Option<RomStore>,
    notice: Option<String>,
}

impl FullAssessment {
    /// `seed` fixes the randomized task order of newly created ledgers.
    pub fn new(data_dir: impl AsRef<Path>, battery: BatteryConfig, seed: Option<u64>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            battery,
            seed,
            state: AssessState::WaitForSubjectSelect,
            subject: None,
            limb: None,
            mechanism: None,
            task: None,
            ledger: None,
            roms: None,
            notice: None,
        }
    }

    pub fn state(&self) -> AssessState {
        self.state
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn limb(&self) -> Option<Limb> {
        self.limb
    }

    pub fn mechanism(&self) -> Option<Mechanism> {
        self.mechanism
    }

    pub fn task(&self) -> Option<Task> {
        self.task
    }

    pub fn ledger(&self) -> Option<&ProtocolLedger> {
        self.ledger.as_ref()
    }

    pub fn rom_store(&self) -> Option<&RomStore> {
        self.roms.as_ref()
    }

    /// Stored ranges of `mechanism` for this subject and limb.
    pub fn mechanism_rom(&self, mechanism: Mechanism) -> MechanismRom {
        self.roms
            .as_ref()
            .map(|r| r.mechanism(mechanism))
            .unwrap_or_default()
    }

    /// Directory holding this subject/limb's ledger, results and logs.
    pub fn session_dir(&self) -> Option<PathBuf> {
        Some(
            self.data_dir
                .join(self.subject.as_ref()?)
                .join(self.limb?.name()),
        )
    }

    /// The mechanism the ledger wants next.
    pub fn next_mechanism(&self) -> Option<Mechanism> {
        self.ledger.as_ref()?.current().map(|r| r.mechanism)
    }

    /// The task the ledger wants next on the selected mechanism.
    pub fn next_task(&self) -> Option<Task> {
        let row = self.ledger.as_ref()?.current()?;
        (Some(row.mechanism) == self.mechanism).then_some(row.task)
    }

    pub fn instruction(&self) -> String {
        if let Some(notice) = &self.notice {
            return notice.clone();
        }
        match self.state {
            AssessState::WaitForSubjectSelect => "Select a subject.".to_string(),
            AssessState::WaitForLimbSelect => "Select the limb to assess.".to_string(),
            AssessState::WaitForMechanismSelect => match self.next_mechanism() {
                Some(m) => format!("Attach and select the {} mechanism.", m),
                None => "All mechanisms done.".to_string(),
            },
            AssessState::WaitForCalibrate => "Calibrate the mechanism.".to_string(),
            AssessState::WaitForTaskSelect => match self.next_task() {
                Some(t) => format!("Start the {} task.", t),
                None => "No task left on this mechanism.".to_string(),
            },
            s if s.is_assessing() => format!(
                "{} in progress.",
                self.task.map(Task::name).unwrap_or_default()
            ),
            AssessState::MechanismDone => "Mechanism done. Continue to the next one.".to_string(),
            _ => "Assessment complete for this subject and limb.".to_string(),
        }
    }

    fn transition(&mut self, next: AssessState) {
        debug!("assessment: {} -> {}", self.state, next);
        self.state = next;
    }

    fn reject(&mut self, message: String) -> AssessState {
        warn!("{}", message);
        self.notice = Some(message);
        self.state
    }

    fn ledger_mut(&mut self) -> Result<&mut ProtocolLedger> {
        self.ledger
            .as_mut()
            .ok_or_else(|| DriverError::Config("no subject/limb ledger open".to_string()))
    }

    fn open_ledger(&mut self) -> Result<()> {
        let dir = self
            .session_dir()
            .ok_or_else(|| DriverError::Config("subject and limb must be selected".to_string()))?;
        let ledger = ProtocolLedger::open_or_create(dir.join(LEDGER_FILE), &self.battery, self.seed)?;
        let roms = RomStore::open(dir.join(ROM_FILE))?;
        info!(
            "assessment for {} opened, session {}",
            dir.display(),
            ledger.session()
        );
        self.ledger = Some(ledger);
        self.roms = Some(roms);
        Ok(())
    }

    /// State after a mechanism's rows change, read off the ledger.
    fn route_after_mechanism(&mut self) -> AssessState {
        let Some(ledger) = self.ledger.as_ref() else {
            return AssessState::WaitForSubjectSelect;
        };
        match self.mechanism {
            Some(m) if !ledger.is_mechanism_complete(m) => AssessState::WaitForTaskSelect,
            Some(_) => AssessState::MechanismDone,
            None if ledger.is_complete() => AssessState::SubjectLimbDone,
            None => AssessState::WaitForMechanismSelect,
        }
    }

    /// Apply one operator event.
    ///
    /// Events that make no sense in the current state leave it unchanged and
    /// update the instruction. Errors are reserved for refused data (range
    /// nesting, ledger order, missing skip comment) and I/O failures; the
    /// state is left unchanged for those too.
    pub fn handle(&mut self, event: OrchestratorEvent) -> Result<AssessState> {
        self.notice = None;
        let state = self.state;
        match (state, event) {
            (AssessState::WaitForSubjectSelect, OrchestratorEvent::SubjectSelected(id)) => {
                if id.trim().is_empty() {
                    return Ok(self.reject("Subject id cannot be empty.".to_string()));
                }
                self.subject = Some(id.trim().to_string());
                self.transition(AssessState::WaitForLimbSelect);
            }
            (AssessState::WaitForLimbSelect, OrchestratorEvent::LimbSelected(limb)) => {
                self.limb = Some(limb);
                if let Err(e) = self.open_ledger() {
                    self.limb = None;
                    return Err(e);
                }
                let next = self.route_after_mechanism();
                self.transition(next);
            }
            (
                AssessState::WaitForMechanismSelect | AssessState::MechanismDone,
                OrchestratorEvent::MechanismSelected(mechanism),
            ) => {
                match self.next_mechanism() {
                    Some(expected) if expected == mechanism => {
                        self.mechanism = Some(mechanism);
                        self.transition(AssessState::WaitForCalibrate);
                    }
                    Some(expected) => {
                        return Ok(self.reject(format!(
                            "{} is not next, attach {} instead.",
                            mechanism, expected
                        )))
                    }
                    None => return Ok(self.reject("No mechanism left to assess.".to_string())),
                }
            }
            (AssessState::WaitForCalibrate, OrchestratorEvent::CalibrationDone) => {
                let next = self.route_after_mechanism();
                self.transition(next);
            }
            (AssessState::WaitForTaskSelect, OrchestratorEvent::TaskSelected(task)) => {
                match self.next_task() {
                    Some(expected) if expected == task => {
                        if let Some(missing) = self.missing_prerequisite(task) {
                            return Ok(self.reject(format!(
                                "{} needs the {} range of this mechanism first.",
                                task, missing
                            )));
                        }
                        self.task = Some(task);
                        self.transition(AssessState::for_task(task));
                    }
                    Some(expected) => {
                        return Ok(self.reject(format!("{} is next, not {}.", expected, task)))
                    }
                    None => return Ok(self.reject("No task left on this mechanism.".to_string())),
                }
            }
            (s, OrchestratorEvent::TaskCompleted(outcome)) if s.is_assessing() => {
                self.complete_task(outcome)?;
                self.task = None;
                let next = self.route_after_mechanism();
                self.transition(next);
            }
            (s, OrchestratorEvent::TaskCancelled) if s.is_assessing() => {
                self.task = None;
                self.transition(AssessState::WaitForTaskSelect);
            }
            (
                AssessState::WaitForMechanismSelect
                | AssessState::WaitForCalibrate
                | AssessState::WaitForTaskSelect,
                OrchestratorEvent::SkipMechanism { comment },
            ) => {
                let mechanism = match self.mechanism.or_else(|| self.next_mechanism()) {
                    Some(m) => m,
                    None => return Ok(self.reject("No mechanism to skip.".to_string())),
                };
                self.ledger_mut()?.skip_mechanism(mechanism, &comment)?;
                self.mechanism = Some(mechanism);
                self.transition(AssessState::MechanismDone);
            }
            (AssessState::MechanismDone, OrchestratorEvent::Next) => {
                self.mechanism = None;
                let next = self.route_after_mechanism();
                self.transition(next);
            }
            (s, e) => {
                return Ok(self.reject(format!("{:?} is not accepted in {}.", e, s)));
            }
        }
        Ok(self.state)
    }

    /// Range a task builds on that is not yet recorded.
    fn missing_prerequisite(&self, task: Task) -> Option<RomKind> {
        let mechanism = self.mechanism?;
        let rom = self.mechanism_rom(mechanism);
        match task {
            Task::Disc | Task::PosHold if rom.arom().is_none() => Some(RomKind::Arom),
            Task::Prop if rom.prom().is_none() => Some(RomKind::Prom),
            _ => None,
        }
    }

    fn complete_task(&mut self, outcome: TaskOutcome) -> Result<()> {
        let (Some(mechanism), Some(task)) = (self.mechanism, self.task) else {
            return Err(DriverError::Config("no task in progress".to_string()));
        };
        if let (Some(kind), RowStatus::Complete) = (rom_kind(task), outcome.status) {
            let range = outcome.rom.ok_or(RomError::Missing(kind.name()))?;
            let roms = self
                .roms
                .as_mut()
                .ok_or_else(|| DriverError::Config("no ROM results open".to_string()))?;
            roms.record(kind, mechanism, range)?;
        }
        self.ledger_mut()?.complete_current(
            mechanism,
            task,
            outcome.status,
            &outcome.raw_file,
            &outcome.summary_file,
            &outcome.comment,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn battery() -> BatteryConfig {
        BatteryConfig {
            mechanisms: vec!["WFE".into(), "HOC".into()],
            fixed_tasks: vec!["AROM".into(), "PROM".into()],
            randomized_tasks: vec!["DISC".into(), "FCTRL".into()],
            hoc_only_tasks: vec!["FCTRL".into()],
        }
    }

    fn started(dir: &Path) -> FullAssessment {
        let mut fa = FullAssessment::new(dir, battery(), Some(3));
        fa.handle(OrchestratorEvent::SubjectSelected("s01".into())).unwrap();
        fa.handle(OrchestratorEvent::LimbSelected(Limb::Right)).unwrap();
        fa
    }

    fn r(min: f32, max: f32) -> RomRange {
        RomRange::new(min, max).unwrap()
    }

    #[test]
    fn walks_the_ledger_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut fa = started(dir.path());
        assert_eq!(fa.state(), AssessState::WaitForMechanismSelect);
        assert!(dir.path().join("s01").join("right").join(LEDGER_FILE).exists());

        // Wrong mechanism is refused with an instruction.
        let state = fa
            .handle(OrchestratorEvent::MechanismSelected(Mechanism::Hoc))
            .unwrap();
        assert_eq!(state, AssessState::WaitForMechanismSelect);
        assert!(fa.instruction().contains("WFE"));

        fa.handle(OrchestratorEvent::MechanismSelected(Mechanism::Wfe)).unwrap();
        fa.handle(OrchestratorEvent::CalibrationDone).unwrap();
        assert_eq!(fa.state(), AssessState::WaitForTaskSelect);
        assert_eq!(fa.next_task(), Some(Task::Arom));

        // Out of order.
        fa.handle(OrchestratorEvent::TaskSelected(Task::Prom)).unwrap();
        assert_eq!(fa.state(), AssessState::WaitForTaskSelect);

        fa.handle(OrchestratorEvent::TaskSelected(Task::Arom)).unwrap();
        assert_eq!(fa.state(), AssessState::WaitForAromAssess);
        fa.handle(OrchestratorEvent::TaskCompleted(
            TaskOutcome::complete("arom_raw.csv", "arom_summary.csv").with_rom(r(-20.0, 30.0)),
        ))
        .unwrap();
        assert_eq!(fa.state(), AssessState::WaitForTaskSelect);
        assert_eq!(fa.next_task(), Some(Task::Prom));

        // PROM narrower than AROM is refused, state unchanged.
        fa.handle(OrchestratorEvent::TaskSelected(Task::Prom)).unwrap();
        let err = fa.handle(OrchestratorEvent::TaskCompleted(
            TaskOutcome::complete("p.csv", "ps.csv").with_rom(r(-10.0, 10.0)),
        ));
        assert!(matches!(err, Err(DriverError::Validation(_))));
        assert_eq!(fa.state(), AssessState::WaitForPromAssess);

        fa.handle(OrchestratorEvent::TaskCompleted(
            TaskOutcome::complete("p.csv", "ps.csv").with_rom(r(-40.0, 50.0)),
        ))
        .unwrap();
        assert_eq!(fa.next_task(), Some(Task::Disc));
        fa.handle(OrchestratorEvent::TaskSelected(Task::Disc)).unwrap();
        fa.handle(OrchestratorEvent::TaskCompleted(TaskOutcome::complete("d.csv", "ds.csv")))
            .unwrap();
        assert_eq!(fa.state(), AssessState::MechanismDone);

        fa.handle(OrchestratorEvent::Next).unwrap();
        assert_eq!(fa.state(), AssessState::WaitForMechanismSelect);
        assert_eq!(fa.next_mechanism(), Some(Mechanism::Hoc));
        assert_eq!(
            fa.mechanism_rom(Mechanism::Wfe).prom(),
            Some(r(-40.0, 50.0))
        );
    }

    #[test]
    fn rom_task_without_range_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut fa = started(dir.path());
        fa.handle(OrchestratorEvent::MechanismSelected(Mechanism::Wfe)).unwrap();
        fa.handle(OrchestratorEvent::CalibrationDone).unwrap();
        fa.handle(OrchestratorEvent::TaskSelected(Task::Arom)).unwrap();
        let before = fa.ledger().unwrap().current_index();

        let err = fa.handle(OrchestratorEvent::TaskCompleted(TaskOutcome::complete(
            "arom_raw.csv",
            "arom_summary.csv",
        )));
        assert!(matches!(
            err,
            Err(DriverError::Validation(RomError::Missing("AROM")))
        ));
        assert_eq!(fa.state(), AssessState::WaitForAromAssess);
        assert_eq!(fa.ledger().unwrap().current_index(), before);
        assert_eq!(fa.ledger().unwrap().current().unwrap().task, Task::Arom);
        assert_eq!(fa.mechanism_rom(Mechanism::Wfe).arom(), None);

        fa.handle(OrchestratorEvent::TaskCompleted(
            TaskOutcome::complete("arom_raw.csv", "arom_summary.csv").with_rom(r(-20.0, 30.0)),
        ))
        .unwrap();
        assert_eq!(fa.next_task(), Some(Task::Prom));
    }

    #[test]
    fn skip_from_task_select_marks_remaining_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut fa = started(dir.path());
        fa.handle(OrchestratorEvent::MechanismSelected(Mechanism::Wfe)).unwrap();
        fa.handle(OrchestratorEvent::CalibrationDone).unwrap();
        fa.handle(OrchestratorEvent::TaskSelected(Task::Arom)).unwrap();
        fa.handle(OrchestratorEvent::TaskCompleted(
            TaskOutcome::complete("arom_raw.csv", "arom_summary.csv").with_rom(r(-20.0, 30.0)),
        ))
        .unwrap();
        assert_eq!(fa.state(), AssessState::WaitForTaskSelect);

        fa.handle(OrchestratorEvent::SkipMechanism {
            comment: "subject fatigued".into(),
        })
        .unwrap();
        assert_eq!(fa.state(), AssessState::MechanismDone);
        let rows: Vec<_> = fa
            .ledger()
            .unwrap()
            .rows()
            .iter()
            .filter(|row| row.mechanism == Mechanism::Wfe)
            .map(|row| (row.task, row.status))
            .collect();
        assert_eq!(rows[0], (Task::Arom, RowStatus::Complete));
        assert!(rows[1..]
            .iter()
            .all(|&(_, status)| status == RowStatus::Skipped));
        assert!(fa
            .ledger()
            .unwrap()
            .rows()
            .iter()
            .filter(|row| row.status == RowStatus::Skipped)
            .all(|row| row.comment == "subject fatigued"));

        fa.handle(OrchestratorEvent::Next).unwrap();
        assert_eq!(fa.state(), AssessState::WaitForMechanismSelect);
        assert_eq!(fa.next_mechanism(), Some(Mechanism::Hoc));
    }

    #[test]
    fn skipping_requires_comment_and_finishes_limb() {
        let dir = tempfile::tempdir().unwrap();
        let mut fa = started(dir.path());
        let err = fa.handle(OrchestratorEvent::SkipMechanism {
            comment: " ".into(),
        });
        assert!(matches!(err, Err(DriverError::Ledger(_))));
        assert_eq!(fa.state(), AssessState::WaitForMechanismSelect);

        fa.handle(OrchestratorEvent::SkipMechanism {
            comment: "device unavailable".into(),
        })
        .unwrap();
        assert_eq!(fa.state(), AssessState::MechanismDone);
        fa.handle(OrchestratorEvent::Next).unwrap();
        fa.handle(OrchestratorEvent::MechanismSelected(Mechanism::Hoc)).unwrap();
        fa.handle(OrchestratorEvent::SkipMechanism {
            comment: "subject tired".into(),
        })
        .unwrap();
        fa.handle(OrchestratorEvent::Next).unwrap();
        assert_eq!(fa.state(), AssessState::SubjectLimbDone);
    }

    #[test]
    fn resumes_from_ledger_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut fa = started(dir.path());
            fa.handle(OrchestratorEvent::SkipMechanism {
                comment: "skip".into(),
            })
            .unwrap();
        }
        let fa = started(dir.path());
        assert_eq!(fa.state(), AssessState::WaitForMechanismSelect);
        assert_eq!(fa.next_mechanism(), Some(Mechanism::Hoc));
        assert_eq!(fa.ledger().map(ProtocolLedger::session), Some(2));
    }

    #[test]
    fn prerequisite_range_is_required() {
        let dir = tempfile::tempdir().unwrap();
        let mut battery = battery();
        battery.fixed_tasks = vec![];
        battery.randomized_tasks = vec!["DISC".into()];
        let mut fa = FullAssessment::new(dir.path(), battery, Some(1));
        fa.handle(OrchestratorEvent::SubjectSelected("s02".into())).unwrap();
        fa.handle(OrchestratorEvent::LimbSelected(Limb::Left)).unwrap();
        fa.handle(OrchestratorEvent::MechanismSelected(Mechanism::Wfe)).unwrap();
        fa.handle(OrchestratorEvent::CalibrationDone).unwrap();
        fa.handle(OrchestratorEvent::TaskSelected(Task::Disc)).unwrap();
        assert_eq!(fa.state(), AssessState::WaitForTaskSelect);
        assert!(fa.instruction().contains("AROM"));
    }
}
