//! Range-of-motion assessment (AROM, PROM, APROM).
//!
//! A trial starts from rest on a button release, tracks the widest excursion
//! while the limb moves and is closed by a release while holding still. The
//! task's result is the envelope of its trials. APROM runs under torque
//! control, pushing the limb along with a small assistance torque in the
//! direction it is already moving.

use std::fmt;

use log::{debug, info};

use super::Assessment;
use crate::config::RomConfig;
use crate::device::PlutoDevice;
use crate::errors::Result;
use crate::events::PlutoEvent;
use crate::record::{AssessmentRecord, RomKind, RomRange};
use crate::telemetry::{ControlType, Mechanism};
use crate::window::TrialDataWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RomState {
    FreeRunning,
    TrialActiveWaitToMove,
    TrialActiveMoving,
    TrialActiveHolding,
    TrialActiveNewRomSet,
    RomDone,
}

impl fmt::Display for RomState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RomState::FreeRunning => "FREE_RUNNING",
            RomState::TrialActiveWaitToMove => "TRIAL_ACTIVE_WAIT_TO_MOVE",
            RomState::TrialActiveMoving => "TRIAL_ACTIVE_MOVING",
            RomState::TrialActiveHolding => "TRIAL_ACTIVE_HOLDING",
            RomState::TrialActiveNewRomSet => "TRIAL_ACTIVE_NEW_ROM_SET",
            RomState::RomDone => "ROM_DONE",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RomAction {
    TrialStarted { trial: usize, start: f32 },
    TrialRecorded { trial: usize, range: RomRange },
    Done { summary: RomRange },
}

#[derive(Debug, Clone)]
pub struct RomAssessment {
    kind: RomKind,
    mechanism: Mechanism,
    config: RomConfig,
    state: RomState,
    window: TrialDataWindow,
    record: AssessmentRecord,
    current: Option<RomRange>,
    start: f32,
    assist: Option<f32>,
    notice: Option<&'static str>,
}

impl RomAssessment {
    pub fn new(kind: RomKind, mechanism: Mechanism, config: RomConfig) -> Self {
        Self {
            kind,
            mechanism,
            window: TrialDataWindow::new(config.window_len),
            config,
            state: RomState::FreeRunning,
            record: AssessmentRecord::new(kind, mechanism),
            current: None,
            start: 0.0,
            assist: None,
            notice: None,
        }
    }

    pub fn kind(&self) -> RomKind {
        self.kind
    }

    pub fn record(&self) -> &AssessmentRecord {
        &self.record
    }

    /// Range of the trial in progress.
    pub fn current_range(&self) -> Option<RomRange> {
        self.current
    }

    /// Envelope of the accepted trials.
    pub fn summary(&self) -> Option<RomRange> {
        self.record.summary()
    }

    fn transition(&mut self, next: RomState) {
        debug!("{} {}: {} -> {}", self.mechanism, self.kind, self.state, next);
        self.state = next;
    }

    fn holding(&self) -> bool {
        self.window.is_holding(self.mechanism.hold_velocity_threshold())
    }

    fn start_trial(&mut self, position: f32, dev: &mut dyn PlutoDevice) -> Result<RomAction> {
        self.start = position;
        self.current = Some(RomRange::point(position));
        if self.record.start_position.is_none() {
            self.record.start_position = Some(position);
        }
        if self.kind == RomKind::Aprom {
            dev.set_control_type(ControlType::Torque)?;
            dev.set_control_target(0.0, None)?;
            self.assist = Some(0.0);
        }
        self.notice = None;
        self.transition(RomState::TrialActiveWaitToMove);
        Ok(RomAction::TrialStarted {
            trial: self.record.trials().len(),
            start: position,
        })
    }

    /// Assistance torque follows the direction of motion, zero when still.
    fn update_assist(&mut self, dev: &mut dyn PlutoDevice) -> Result<()> {
        if self.kind != RomKind::Aprom {
            return Ok(());
        }
        let velocity = self.window.last().and_then(|s| s.velocity).unwrap_or(0.0);
        let target = if velocity.abs() >= self.mechanism.hold_velocity_threshold() {
            self.config.assist_torque * velocity.signum()
        } else {
            0.0
        };
        if self.assist != Some(target) {
            dev.set_control_target(target, None)?;
            self.assist = Some(target);
        }
        Ok(())
    }

    fn extend(&mut self, position: f32) {
        let hysteresis = self.mechanism.rom_hysteresis();
        if let Some(range) = self.current.as_mut() {
            range.extend(position, hysteresis);
        }
    }

    fn finish_trial(&mut self, dev: &mut dyn PlutoDevice) -> Result<Option<RomAction>> {
        let Some(range) = self.current else {
            return Ok(None);
        };
        let range = self.record.push_trial(range.min(), range.max())?;
        dev.set_control_type(ControlType::None)?;
        self.assist = None;
        let trial = self.record.trials().len();
        info!("{} {} trial {} range {}", self.mechanism, self.kind, trial, range);
        self.transition(RomState::TrialActiveNewRomSet);
        Ok(Some(RomAction::TrialRecorded { trial, range }))
    }
}

impl Assessment for RomAssessment {
    type State = RomState;
    type Action = RomAction;

    fn state(&self) -> RomState {
        self.state
    }

    fn run(
        &mut self,
        event: PlutoEvent,
        dt: f32,
        dev: &mut dyn PlutoDevice,
    ) -> Result<Option<RomAction>> {
        if self.state == RomState::RomDone {
            return Ok(None);
        }
        let position = dev.position();
        if event == PlutoEvent::NewData {
            self.window.add(dt, position);
        }
        let hysteresis = self.mechanism.rom_hysteresis();

        match (self.state, event) {
            (RomState::FreeRunning, PlutoEvent::Released) => {
                if self.holding() {
                    return self.start_trial(position, dev).map(Some);
                }
                self.notice = Some("Hold still before starting the trial.");
                Ok(None)
            }
            (RomState::TrialActiveWaitToMove, PlutoEvent::NewData) => {
                if (position - self.start).abs() > hysteresis {
                    self.extend(position);
                    self.transition(RomState::TrialActiveMoving);
                }
                self.update_assist(dev)?;
                Ok(None)
            }
            (RomState::TrialActiveMoving, PlutoEvent::NewData) => {
                self.extend(position);
                if self.holding() {
                    self.notice = None;
                    self.transition(RomState::TrialActiveHolding);
                }
                self.update_assist(dev)?;
                Ok(None)
            }
            (RomState::TrialActiveMoving, PlutoEvent::Released) => {
                self.notice = Some("Hold the end position, then release the button.");
                Ok(None)
            }
            (RomState::TrialActiveHolding, PlutoEvent::NewData) => {
                self.extend(position);
                if !self.holding() {
                    self.transition(RomState::TrialActiveMoving);
                }
                self.update_assist(dev)?;
                Ok(None)
            }
            (RomState::TrialActiveHolding, PlutoEvent::Released) => self.finish_trial(dev),
            (RomState::TrialActiveNewRomSet, PlutoEvent::NewData) => {
                self.current = None;
                if self.record.trials().len() >= self.config.ntrials {
                    dev.set_control_type(ControlType::None)?;
                    self.transition(RomState::RomDone);
                    return Ok(self.summary().map(|summary| RomAction::Done { summary }));
                }
                self.transition(RomState::FreeRunning);
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    fn instruction(&self) -> String {
        if let Some(notice) = self.notice {
            return notice.to_string();
        }
        let trial = self.record.trials().len() + 1;
        match self.state {
            RomState::FreeRunning => format!(
                "{} trial {}/{}: hold still and release the button to start.",
                self.kind, trial, self.config.ntrials
            ),
            RomState::TrialActiveWaitToMove => "Move through your full range.".to_string(),
            RomState::TrialActiveMoving => "Keep moving to the limit.".to_string(),
            RomState::TrialActiveHolding => {
                "Release the button to set this trial's range.".to_string()
            }
            RomState::TrialActiveNewRomSet => "Range recorded.".to_string(),
            RomState::RomDone => match self.summary() {
                Some(range) => format!("{} done: {}", self.kind, range),
                None => format!("{} done.", self.kind),
            },
        }
    }

    fn trial(&self) -> usize {
        self.record.trials().len()
    }

    fn is_done(&self) -> bool {
        self.state == RomState::RomDone
    }

    fn summary_header(&self) -> Vec<&'static str> {
        vec!["trial", "startpos", "rommin", "rommax"]
    }

    fn summary_row(&self, action: &RomAction) -> Option<Vec<String>> {
        match action {
            RomAction::TrialRecorded { trial, range } => Some(vec![
                trial.to_string(),
                format!("{:.3}", self.start),
                format!("{:.3}", range.min()),
                format!("{:.3}", range.max()),
            ]),
            _ => None,
        }
    }
}
