//! Grip force control against a simulated object on the hand mechanism.
//!
//! The robot renders a virtual object (OBJECTSIM) and the subject squeezes
//! it, aiming for a force band around the target. Every tick after first
//! contact is classified as holding, not holding (too weak) or crushing (too
//! strong) until the trial timer runs out.

use std::fmt;

use log::{debug, info, warn};

use super::{countdown, Assessment};
use crate::config::ForceControlConfig;
use crate::device::PlutoDevice;
use crate::errors::Result;
use crate::events::PlutoEvent;
use crate::telemetry::{ControlType, Mechanism};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceState {
    Rest,
    WaitStart,
    Holding,
    NotHolding,
    Crushing,
    Relax,
    Done,
}

impl fmt::Display for ForceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ForceState::Rest => "REST",
            ForceState::WaitStart => "WAIT_START",
            ForceState::Holding => "HOLDING",
            ForceState::NotHolding => "NOT_HOLDING",
            ForceState::Crushing => "CRUSHING",
            ForceState::Relax => "RELAX",
            ForceState::Done => "DONE",
        })
    }
}

/// Seconds spent in each band during one trial.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BandTimes {
    pub holding: f32,
    pub not_holding: f32,
    pub crushing: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForceAction {
    TrialStarted { trial: usize },
    Contact { force: f32 },
    BandChanged { from: ForceState, to: ForceState },
    TrialEnded { trial: usize, times: BandTimes },
    TrialAborted { trial: usize },
    Done,
}

#[derive(Debug, Clone)]
pub struct ForceControl {
    mechanism: Mechanism,
    config: ForceControlConfig,
    state: ForceState,
    trial: usize,
    timer: f32,
    relax: f32,
    times: BandTimes,
    force: f32,
}

impl ForceControl {
    pub fn new(mechanism: Mechanism, config: ForceControlConfig) -> Self {
        if !mechanism.is_hoc() {
            warn!("force control configured on {}, grip force will read zero", mechanism);
        }
        Self {
            mechanism,
            config,
            state: ForceState::Rest,
            trial: 0,
            timer: 0.0,
            relax: 0.0,
            times: BandTimes::default(),
            force: 0.0,
        }
    }

    /// Band the given force falls in.
    pub fn classify(&self, force: f32) -> ForceState {
        let target = self.config.target_force;
        let tol = self.config.tolerance;
        if force > target + tol {
            ForceState::Crushing
        } else if force < target - tol {
            ForceState::NotHolding
        } else {
            ForceState::Holding
        }
    }

    /// Feedback for the display: current force and its offset from target.
    pub fn feedback(&self) -> (f32, f32) {
        (self.force, self.force - self.config.target_force)
    }

    pub fn times(&self) -> BandTimes {
        self.times
    }

    /// Seconds left in the running trial.
    pub fn time_left(&self) -> f32 {
        self.timer.max(0.0)
    }

    fn transition(&mut self, next: ForceState) {
        debug!("{} FCTRL: {} -> {}", self.mechanism, self.state, next);
        self.state = next;
    }

    fn start_trial(&mut self, dev: &mut dyn PlutoDevice) -> Result<ForceAction> {
        dev.set_control_type(ControlType::ObjectSim)?;
        dev.set_object_params(self.config.object_stiffness, self.config.object_offset)?;
        self.times = BandTimes::default();
        self.transition(ForceState::WaitStart);
        Ok(ForceAction::TrialStarted { trial: self.trial })
    }

    fn abort(&mut self, dev: &mut dyn PlutoDevice) -> Result<Option<ForceAction>> {
        warn!("{} FCTRL trial {} aborted: torque sensor fault", self.mechanism, self.trial + 1);
        dev.set_control_type(ControlType::None)?;
        self.transition(ForceState::Rest);
        Ok(Some(ForceAction::TrialAborted { trial: self.trial }))
    }

    fn accumulate(&mut self, dt: f32) {
        match self.state {
            ForceState::Holding => self.times.holding += dt,
            ForceState::NotHolding => self.times.not_holding += dt,
            ForceState::Crushing => self.times.crushing += dt,
            _ => {}
        }
    }

    fn tick(&mut self, dt: f32, dev: &mut dyn PlutoDevice) -> Result<Option<ForceAction>> {
        let active = matches!(
            self.state,
            ForceState::WaitStart | ForceState::Holding | ForceState::NotHolding | ForceState::Crushing
        );
        if active && dev.error().has_torque_sensor_fault() {
            return self.abort(dev);
        }
        self.force = dev.snapshot().and_then(|s| s.grip_force()).unwrap_or(0.0);

        match self.state {
            ForceState::WaitStart => {
                if self.force >= self.config.contact_force {
                    self.timer = self.config.trial_duration;
                    let band = self.classify(self.force);
                    self.transition(band);
                    return Ok(Some(ForceAction::Contact { force: self.force }));
                }
                Ok(None)
            }
            ForceState::Holding | ForceState::NotHolding | ForceState::Crushing => {
                self.accumulate(dt);
                if countdown(&mut self.timer, dt) {
                    dev.set_control_type(ControlType::None)?;
                    let trial = self.trial;
                    self.trial += 1;
                    self.relax = self.config.relax_duration;
                    info!(
                        "{} FCTRL trial {}: holding {:.2}s, crushing {:.2}s",
                        self.mechanism, trial + 1, self.times.holding, self.times.crushing
                    );
                    self.transition(ForceState::Relax);
                    return Ok(Some(ForceAction::TrialEnded {
                        trial,
                        times: self.times,
                    }));
                }
                let band = self.classify(self.force);
                if band != self.state {
                    let from = self.state;
                    self.transition(band);
                    return Ok(Some(ForceAction::BandChanged { from, to: band }));
                }
                Ok(None)
            }
            ForceState::Relax => {
                if !countdown(&mut self.relax, dt) {
                    return Ok(None);
                }
                if self.trial >= self.config.ntrials {
                    dev.set_control_type(ControlType::None)?;
                    self.transition(ForceState::Done);
                    return Ok(Some(ForceAction::Done));
                }
                self.start_trial(dev).map(Some)
            }
            ForceState::Rest | ForceState::Done => Ok(None),
        }
    }
}

impl Assessment for ForceControl {
    type State = ForceState;
    type Action = ForceAction;

    fn state(&self) -> ForceState {
        self.state
    }

    fn run(
        &mut self,
        event: PlutoEvent,
        dt: f32,
        dev: &mut dyn PlutoDevice,
    ) -> Result<Option<ForceAction>> {
        match event {
            PlutoEvent::NewData => self.tick(dt, dev),
            PlutoEvent::Released if self.state == ForceState::Rest => {
                if dev.error().has_torque_sensor_fault() {
                    return Ok(None);
                }
                self.start_trial(dev).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn instruction(&self) -> String {
        match self.state {
            ForceState::Rest => "Release the button to start a grip trial.".to_string(),
            ForceState::WaitStart => "Close your hand on the object.".to_string(),
            ForceState::Holding => format!("Good, keep holding. {:.1}s left.", self.time_left()),
            ForceState::NotHolding => "Squeeze a little harder.".to_string(),
            ForceState::Crushing => "Too hard, you are crushing the object.".to_string(),
            ForceState::Relax => "Relax your hand.".to_string(),
            ForceState::Done => "Force control done.".to_string(),
        }
    }

    fn trial(&self) -> usize {
        self.trial
    }

    fn is_done(&self) -> bool {
        self.state == ForceState::Done
    }

    fn summary_header(&self) -> Vec<&'static str> {
        vec!["trial", "targetforce", "holding", "notholding", "crushing", "result"]
    }

    fn summary_row(&self, action: &ForceAction) -> Option<Vec<String>> {
        let (trial, times, result) = match action {
            ForceAction::TrialEnded { trial, times } => (*trial, *times, "complete"),
            ForceAction::TrialAborted { trial } => (*trial, self.times, "aborted"),
            _ => return None,
        };
        Some(vec![
            (trial + 1).to_string(),
            format!("{:.3}", self.config.target_force),
            format!("{:.3}", times.holding),
            format!("{:.3}", times.not_holding),
            format!("{:.3}", times.crushing),
            result.to_string(),
        ])
    }
}
