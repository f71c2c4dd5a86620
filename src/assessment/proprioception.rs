//! Proprioception: the robot shows a position, the subject finds it again.
//!
//! Each trial drives the limb from home to the shown position under
//! position control, holds it there, returns home and then sweeps slowly
//! towards the end of the passive range. The subject releases the button
//! when the limb feels to be back at the shown position.

use std::fmt;

use log::{debug, info, warn};

use super::{countdown, fmt_opt, Assessment};
use crate::commands::Ramp;
use crate::config::ProprioceptionConfig;
use crate::device::PlutoDevice;
use crate::errors::Result;
use crate::events::PlutoEvent;
use crate::record::RomRange;
use crate::telemetry::{ControlType, ErrorFlags, Mechanism, HOC_SCALE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropState {
    FreeRunning,
    WaitForHapticDisplayStart,
    TrialHapticDisplayMoving,
    TrialHapticDisplay,
    IntraTrialRest,
    TrialAssessmentMoving,
    TrialAssessmentResponseHold,
    TrialAssessmentNoResponseHold,
    InterTrialRest,
    PropDone,
}

impl fmt::Display for PropState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PropState::FreeRunning => "FREE_RUNNING",
            PropState::WaitForHapticDisplayStart => "WAIT_FOR_HAPTIC_DISPLAY_START",
            PropState::TrialHapticDisplayMoving => "TRIAL_HAPTIC_DISPLAY_MOVING",
            PropState::TrialHapticDisplay => "TRIAL_HAPTIC_DISPLAY",
            PropState::IntraTrialRest => "INTRA_TRIAL_REST",
            PropState::TrialAssessmentMoving => "TRIAL_ASSESSMENT_MOVING",
            PropState::TrialAssessmentResponseHold => "TRIAL_ASSESSMENT_RESPONSE_HOLD",
            PropState::TrialAssessmentNoResponseHold => "TRIAL_ASSESSMENT_NO_RESPONSE_HOLD",
            PropState::InterTrialRest => "INTER_TRIAL_REST",
            PropState::PropDone => "PROP_DONE",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropAction {
    TrialStarted { trial: usize, shown: f32 },
    HapticDisplayed { trial: usize },
    AssessmentStarted { trial: usize },
    Response { trial: usize, shown: f32, sensed: f32 },
    NoResponse { trial: usize, shown: f32 },
    Aborted { trial: usize },
    Done,
}

/// Shown and sensed position of one trial.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropResult {
    pub shown: f32,
    pub sensed: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct Proprioception {
    mechanism: Mechanism,
    config: ProprioceptionConfig,
    prom: RomRange,
    home: f32,
    targets: Vec<f32>,
    state: PropState,
    trial: usize,
    timer: f32,
    results: Vec<PropResult>,
}

impl Proprioception {
    /// Targets are signed fractions of the way from home to either end of `prom`.
    pub fn new(mechanism: Mechanism, prom: RomRange, config: ProprioceptionConfig) -> Self {
        let home = 0.0f32.clamp(prom.min(), prom.max());
        let targets = config
            .targets
            .iter()
            .map(|&f| {
                if f >= 0.0 {
                    home + f * (prom.max() - home)
                } else {
                    home - f * (prom.min() - home)
                }
            })
            .collect();
        Self {
            mechanism,
            config,
            prom,
            home,
            targets,
            state: PropState::FreeRunning,
            trial: 0,
            timer: 0.0,
            results: Vec::new(),
        }
    }

    pub fn targets(&self) -> &[f32] {
        &self.targets
    }

    pub fn home(&self) -> f32 {
        self.home
    }

    pub fn results(&self) -> &[PropResult] {
        &self.results
    }

    fn shown(&self) -> f32 {
        self.targets.get(self.trial).copied().unwrap_or(self.home)
    }

    fn transition(&mut self, next: PropState, timer: f32) {
        debug!("{} PROP: {} -> {}", self.mechanism, self.state, next);
        self.state = next;
        self.timer = timer;
    }

    /// Trial positions are apertures on HOC; the controller works in degrees.
    fn device_units(&self, position: f32) -> f32 {
        if self.mechanism.is_hoc() {
            position / HOC_SCALE
        } else {
            position
        }
    }

    fn move_to(
        &self,
        from: f32,
        to: f32,
        duration: f32,
        dev: &mut dyn PlutoDevice,
    ) -> Result<()> {
        dev.set_control_type(ControlType::Position)?;
        dev.set_control_target(
            self.device_units(to),
            Some(Ramp {
                initial: self.device_units(from),
                duration,
            }),
        )
    }

    fn hold_here(&self, position: f32, dev: &mut dyn PlutoDevice) -> Result<()> {
        dev.set_control_target(self.device_units(position), None)
    }

    /// End of the passive range on the shown target's side.
    fn sweep_end(&self) -> f32 {
        if self.shown() >= self.home {
            self.prom.max()
        } else {
            self.prom.min()
        }
    }

    fn begin_trial(&mut self, position: f32, dev: &mut dyn PlutoDevice) -> Result<PropAction> {
        self.move_to(position, self.home, self.config.move_duration, dev)?;
        self.transition(PropState::WaitForHapticDisplayStart, self.config.start_delay);
        Ok(PropAction::TrialStarted {
            trial: self.trial,
            shown: self.shown(),
        })
    }

    fn abort(&mut self, error: ErrorFlags, dev: &mut dyn PlutoDevice) -> Result<Option<PropAction>> {
        warn!("{} PROP trial {} aborted: {:?}", self.mechanism, self.trial + 1, error.names());
        dev.set_control_type(ControlType::None)?;
        self.transition(PropState::FreeRunning, 0.0);
        Ok(Some(PropAction::Aborted { trial: self.trial }))
    }

    fn tick(&mut self, dt: f32, dev: &mut dyn PlutoDevice) -> Result<Option<PropAction>> {
        let position = dev.position();
        let shown = self.shown();
        match self.state {
            PropState::FreeRunning | PropState::PropDone => Ok(None),
            PropState::WaitForHapticDisplayStart => {
                if (position - self.home).abs() > self.config.start_tolerance {
                    self.timer = self.config.start_delay;
                    return Ok(None);
                }
                if countdown(&mut self.timer, dt) {
                    self.move_to(self.home, shown, self.config.move_duration, dev)?;
                    self.transition(PropState::TrialHapticDisplayMoving, self.config.move_duration);
                }
                Ok(None)
            }
            PropState::TrialHapticDisplayMoving => {
                if countdown(&mut self.timer, dt) {
                    self.transition(PropState::TrialHapticDisplay, self.config.display_duration);
                }
                Ok(None)
            }
            PropState::TrialHapticDisplay => {
                if !countdown(&mut self.timer, dt) {
                    return Ok(None);
                }
                self.move_to(position, self.home, self.config.move_duration, dev)?;
                self.transition(PropState::IntraTrialRest, self.config.intra_trial_rest);
                Ok(Some(PropAction::HapticDisplayed { trial: self.trial }))
            }
            PropState::IntraTrialRest => {
                if !countdown(&mut self.timer, dt) {
                    return Ok(None);
                }
                self.move_to(self.home, self.sweep_end(), self.config.assessment_duration, dev)?;
                self.transition(PropState::TrialAssessmentMoving, self.config.assessment_duration);
                Ok(Some(PropAction::AssessmentStarted { trial: self.trial }))
            }
            PropState::TrialAssessmentMoving => {
                if !countdown(&mut self.timer, dt) {
                    return Ok(None);
                }
                self.hold_here(position, dev)?;
                self.results.push(PropResult { shown, sensed: None });
                self.transition(PropState::TrialAssessmentNoResponseHold, self.config.response_hold);
                Ok(Some(PropAction::NoResponse {
                    trial: self.trial,
                    shown,
                }))
            }
            PropState::TrialAssessmentResponseHold | PropState::TrialAssessmentNoResponseHold => {
                if countdown(&mut self.timer, dt) {
                    self.move_to(position, self.home, self.config.move_duration, dev)?;
                    self.transition(PropState::InterTrialRest, self.config.inter_trial_rest);
                }
                Ok(None)
            }
            PropState::InterTrialRest => {
                if !countdown(&mut self.timer, dt) {
                    return Ok(None);
                }
                self.trial += 1;
                if self.trial >= self.targets.len() {
                    dev.set_control_type(ControlType::None)?;
                    info!("{} PROP done, {} trials", self.mechanism, self.results.len());
                    self.transition(PropState::PropDone, 0.0);
                    return Ok(Some(PropAction::Done));
                }
                self.begin_trial(position, dev).map(Some)
            }
        }
    }
}

impl Assessment for Proprioception {
    type State = PropState;
    type Action = PropAction;

    fn state(&self) -> PropState {
        self.state
    }

    fn run(
        &mut self,
        event: PlutoEvent,
        dt: f32,
        dev: &mut dyn PlutoDevice,
    ) -> Result<Option<PropAction>> {
        let robot_moving = !matches!(self.state, PropState::FreeRunning | PropState::PropDone);
        let error = dev.error();
        if robot_moving
            && (error.contains(ErrorFlags::ANGLE_SENSOR) || error.contains(ErrorFlags::MOTOR_CURRENT))
        {
            return self.abort(error, dev);
        }

        match (self.state, event) {
            (_, PlutoEvent::NewData) => self.tick(dt, dev),
            (PropState::FreeRunning, PlutoEvent::Released) if !self.targets.is_empty() => {
                let position = dev.position();
                self.begin_trial(position, dev).map(Some)
            }
            (PropState::TrialAssessmentMoving, PlutoEvent::Released) => {
                let sensed = dev.position();
                let shown = self.shown();
                self.hold_here(sensed, dev)?;
                self.results.push(PropResult {
                    shown,
                    sensed: Some(sensed),
                });
                self.transition(PropState::TrialAssessmentResponseHold, self.config.response_hold);
                Ok(Some(PropAction::Response {
                    trial: self.trial,
                    shown,
                    sensed,
                }))
            }
            _ => Ok(None),
        }
    }

    fn instruction(&self) -> String {
        match self.state {
            PropState::FreeRunning => "Release the button to start.".to_string(),
            PropState::WaitForHapticDisplayStart => "Relax, the robot is moving you home.".to_string(),
            PropState::TrialHapticDisplayMoving | PropState::TrialHapticDisplay => {
                "Feel this position.".to_string()
            }
            PropState::IntraTrialRest => "Relax.".to_string(),
            PropState::TrialAssessmentMoving => {
                "Release the button when you reach the same position.".to_string()
            }
            PropState::TrialAssessmentResponseHold | PropState::TrialAssessmentNoResponseHold => {
                "Hold.".to_string()
            }
            PropState::InterTrialRest => "Rest.".to_string(),
            PropState::PropDone => "Proprioception done.".to_string(),
        }
    }

    fn trial(&self) -> usize {
        self.trial
    }

    fn is_done(&self) -> bool {
        self.state == PropState::PropDone
    }

    fn summary_header(&self) -> Vec<&'static str> {
        vec!["trial", "shown", "sensed", "error"]
    }

    fn summary_row(&self, action: &PropAction) -> Option<Vec<String>> {
        let (trial, shown, sensed) = match action {
            PropAction::Response {
                trial,
                shown,
                sensed,
            } => (*trial, *shown, Some(*sensed)),
            PropAction::NoResponse { trial, shown } => (*trial, *shown, None),
            _ => return None,
        };
        Some(vec![
            (trial + 1).to_string(),
            format!("{shown:.3}"),
            fmt_opt(sensed),
            fmt_opt(sensed.map(|s| s - shown)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;
    use crate::device::testing::MockDevice;

    const DT: f32 = 0.125;

    fn setup() -> (Proprioception, MockDevice) {
        let config = ProprioceptionConfig {
            targets: vec![0.5, -0.5],
            start_tolerance: 2.0,
            start_delay: 0.25,
            move_duration: 0.25,
            display_duration: 0.25,
            intra_trial_rest: 0.25,
            assessment_duration: 1.0,
            response_hold: 0.25,
            inter_trial_rest: 0.25,
        };
        let prom = RomRange::new(-40.0, 60.0).unwrap();
        (
            Proprioception::new(Mechanism::Wfe, prom, config),
            MockDevice::new(Mechanism::Wfe),
        )
    }

    fn ticks(prop: &mut Proprioception, dev: &mut MockDevice, n: usize) -> Vec<PropAction> {
        (0..n)
            .filter_map(|_| prop.run(PlutoEvent::NewData, DT, dev).unwrap())
            .collect()
    }

    #[test]
    fn targets_are_signed_fractions_of_prom() {
        let (prop, _) = setup();
        assert_eq!(prop.home(), 0.0);
        assert_eq!(prop.targets(), &[30.0, -20.0]);
    }

    #[test]
    fn response_records_sensed_position() {
        let (mut prop, mut dev) = setup();
        let action = prop.run(PlutoEvent::Released, 0.0, &mut dev).unwrap();
        assert_eq!(action, Some(PropAction::TrialStarted { trial: 0, shown: 30.0 }));
        assert_eq!(dev.control_types_sent(), vec![ControlType::Position]);
        dev.take_sent();

        ticks(&mut prop, &mut dev, 2);
        assert_eq!(prop.state(), PropState::TrialHapticDisplayMoving);
        assert_eq!(
            dev.take_sent(),
            vec![Command::SetControlTarget {
                target: 30.0,
                ramp: Some(Ramp {
                    initial: 0.0,
                    duration: 0.25
                })
            }]
        );

        dev.set_position(30.0);
        let actions = ticks(&mut prop, &mut dev, 4);
        assert_eq!(actions, vec![PropAction::HapticDisplayed { trial: 0 }]);
        assert_eq!(prop.state(), PropState::IntraTrialRest);

        dev.set_position(0.0);
        let actions = ticks(&mut prop, &mut dev, 2);
        assert_eq!(actions, vec![PropAction::AssessmentStarted { trial: 0 }]);
        dev.set_position(28.0);
        let action = prop.run(PlutoEvent::Released, 0.0, &mut dev).unwrap();
        assert_eq!(
            action,
            Some(PropAction::Response {
                trial: 0,
                shown: 30.0,
                sensed: 28.0
            })
        );
        assert_eq!(prop.state(), PropState::TrialAssessmentResponseHold);
        let row = prop.summary_row(&action.unwrap()).unwrap();
        assert_eq!(row, vec!["1", "30.000", "28.000", "-2.000"]);

        dev.set_position(0.0);
        let actions = ticks(&mut prop, &mut dev, 4);
        assert_eq!(actions, vec![PropAction::TrialStarted { trial: 1, shown: -20.0 }]);
        assert_eq!(prop.state(), PropState::WaitForHapticDisplayStart);
    }

    #[test]
    fn no_response_after_sweep_timeout() {
        let (mut prop, mut dev) = setup();
        prop.run(PlutoEvent::Released, 0.0, &mut dev).unwrap();
        // home wait 2, moving 2, display 2, intra rest 2
        ticks(&mut prop, &mut dev, 8);
        assert_eq!(prop.state(), PropState::TrialAssessmentMoving);
        let actions = ticks(&mut prop, &mut dev, 8);
        assert_eq!(
            actions,
            vec![PropAction::NoResponse {
                trial: 0,
                shown: 30.0
            }]
        );
        assert_eq!(prop.results()[0].sensed, None);
    }

    #[test]
    fn angle_sensor_fault_aborts_to_free_running() {
        let (mut prop, mut dev) = setup();
        prop.run(PlutoEvent::Released, 0.0, &mut dev).unwrap();
        dev.set_error(ErrorFlags::ANGLE_SENSOR);
        let action = prop.run(PlutoEvent::NewData, DT, &mut dev).unwrap();
        assert_eq!(action, Some(PropAction::Aborted { trial: 0 }));
        assert_eq!(prop.state(), PropState::FreeRunning);
        assert_eq!(dev.control_type(), ControlType::None);
    }
}
