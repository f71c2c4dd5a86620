//! Discrete reaching between two targets inside the active range.
//!
//! A trial is a round trip: hold at target 1, reach to target 2 on the go
//! cue, hold there, then reach back. Each reach has a time budget covering
//! both the movement and the confirming hold. Failed trials are retried
//! after the rest period without operator input.

use std::fmt;

use log::{debug, info};

use super::{countdown, fmt_opt, Assessment};
use crate::config::DiscreteReachConfig;
use crate::device::PlutoDevice;
use crate::errors::Result;
use crate::events::PlutoEvent;
use crate::record::RomRange;
use crate::telemetry::{ControlType, Mechanism};

/// Direction of a reach: `First` goes from target 1 to target 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    First,
    Second,
}

impl Leg {
    fn start(self) -> usize {
        match self {
            Leg::First => 0,
            Leg::Second => 1,
        }
    }

    fn stop(self) -> usize {
        1 - self.start()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReachState {
    FreeRunning,
    GetToTargetStart(Leg),
    HoldingAtStart(Leg),
    WaitToStartReach(Leg),
    Moving(Leg),
    HoldingAtStop(Leg),
    TrialDone,
    TrialFailed,
}

impl fmt::Display for ReachState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ReachState::FreeRunning => f.write_str("FREE_RUNNING"),
            ReachState::GetToTargetStart(l) => write!(f, "GET_TO_TARGET{}", l.start() + 1),
            ReachState::HoldingAtStart(l) => {
                write!(f, "HOLDING_AT_START_TARGET{}", l.start() + 1)
            }
            ReachState::WaitToStartReach(l) => {
                write!(f, "WAIT_TO_START_REACH_TARGET{}", l.stop() + 1)
            }
            ReachState::Moving(l) => write!(f, "MOVING_TO_TARGET{}", l.stop() + 1),
            ReachState::HoldingAtStop(l) => write!(f, "HOLDING_AT_STOP_TARGET{}", l.stop() + 1),
            ReachState::TrialDone => f.write_str("TRIAL_DONE"),
            ReachState::TrialFailed => f.write_str("TRIAL_FAILED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReachAction {
    TrialStarted { trial: usize, attempt: usize },
    GoCue { leg: Leg },
    TargetReached { leg: Leg, time: f32 },
    TrialDone { trial: usize, times: [f32; 2] },
    TrialFailed { trial: usize, leg: Leg },
    BlockDone,
}

#[derive(Debug, Clone)]
pub struct DiscreteReach {
    mechanism: Mechanism,
    config: DiscreteReachConfig,
    targets: [f32; 2],
    half_width: f32,
    state: ReachState,
    completed: usize,
    attempts: usize,
    hold: f32,
    wait: f32,
    reach: f32,
    elapsed: f32,
    rest: f32,
    times: [Option<f32>; 2],
    block_done: bool,
}

impl DiscreteReach {
    /// Targets are placed inside `arom`.
    pub fn new(mechanism: Mechanism, arom: RomRange, config: DiscreteReachConfig) -> Self {
        let targets = [
            arom.at_fraction(config.targets[0]),
            arom.at_fraction(config.targets[1]),
        ];
        let half_width = config.target_tolerance * arom.span();
        Self {
            mechanism,
            targets,
            half_width,
            config,
            state: ReachState::FreeRunning,
            completed: 0,
            attempts: 0,
            hold: 0.0,
            wait: 0.0,
            reach: 0.0,
            elapsed: 0.0,
            rest: 0.0,
            times: [None; 2],
            block_done: false,
        }
    }

    pub fn targets(&self) -> [f32; 2] {
        self.targets
    }

    pub fn target_half_width(&self) -> f32 {
        self.half_width
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }

    fn in_target(&self, index: usize, position: f32) -> bool {
        (position - self.targets[index]).abs() <= self.half_width
    }

    fn transition(&mut self, next: ReachState) {
        debug!("{} DISC: {} -> {}", self.mechanism, self.state, next);
        self.state = next;
    }

    fn start_trial(&mut self, dev: &mut dyn PlutoDevice) -> Result<ReachAction> {
        dev.set_control_type(ControlType::None)?;
        self.attempts += 1;
        self.times = [None; 2];
        self.transition(ReachState::GetToTargetStart(Leg::First));
        Ok(ReachAction::TrialStarted {
            trial: self.completed,
            attempt: self.attempts,
        })
    }

    fn fail(&mut self, leg: Leg, dev: &mut dyn PlutoDevice) -> Result<Option<ReachAction>> {
        dev.set_control_type(ControlType::None)?;
        info!(
            "{} DISC trial {} failed reaching target {}",
            self.mechanism,
            self.completed + 1,
            leg.stop() + 1
        );
        self.rest = self.config.rest_duration;
        self.transition(ReachState::TrialFailed);
        Ok(Some(ReachAction::TrialFailed {
            trial: self.completed,
            leg,
        }))
    }

    fn tick(
        &mut self,
        dt: f32,
        position: f32,
        dev: &mut dyn PlutoDevice,
    ) -> Result<Option<ReachAction>> {
        match self.state {
            ReachState::FreeRunning => Ok(None),
            ReachState::GetToTargetStart(leg) => {
                if self.in_target(leg.start(), position) {
                    self.hold = self.config.hold_duration;
                    self.transition(ReachState::HoldingAtStart(leg));
                }
                Ok(None)
            }
            ReachState::HoldingAtStart(leg) => {
                if !self.in_target(leg.start(), position) {
                    self.transition(ReachState::GetToTargetStart(leg));
                } else if countdown(&mut self.hold, dt) {
                    self.wait = self.config.start_delay;
                    self.transition(ReachState::WaitToStartReach(leg));
                }
                Ok(None)
            }
            ReachState::WaitToStartReach(leg) => {
                if !self.in_target(leg.start(), position) {
                    self.transition(ReachState::GetToTargetStart(leg));
                    return Ok(None);
                }
                if countdown(&mut self.wait, dt) {
                    self.reach = self.config.reach_timeout;
                    self.elapsed = 0.0;
                    self.transition(ReachState::Moving(leg));
                    return Ok(Some(ReachAction::GoCue { leg }));
                }
                Ok(None)
            }
            ReachState::Moving(leg) => {
                self.elapsed += dt;
                let expired = countdown(&mut self.reach, dt);
                if self.in_target(leg.stop(), position) {
                    self.hold = self.config.hold_duration;
                    self.transition(ReachState::HoldingAtStop(leg));
                    Ok(None)
                } else if expired {
                    self.fail(leg, dev)
                } else {
                    Ok(None)
                }
            }
            ReachState::HoldingAtStop(leg) => {
                self.elapsed += dt;
                let expired = countdown(&mut self.reach, dt);
                if !self.in_target(leg.stop(), position) {
                    if expired {
                        return self.fail(leg, dev);
                    }
                    self.transition(ReachState::Moving(leg));
                    return Ok(None);
                }
                if countdown(&mut self.hold, dt) {
                    let time = self.elapsed;
                    self.times[leg.start()] = Some(time);
                    return Ok(Some(match leg {
                        Leg::First => {
                            self.wait = self.config.start_delay;
                            self.transition(ReachState::WaitToStartReach(Leg::Second));
                            ReachAction::TargetReached { leg, time }
                        }
                        Leg::Second => {
                            let trial = self.completed;
                            self.completed += 1;
                            self.rest = self.config.rest_duration;
                            self.transition(ReachState::TrialDone);
                            ReachAction::TrialDone {
                                trial,
                                times: [self.times[0].unwrap_or(0.0), time],
                            }
                        }
                    }));
                }
                if expired {
                    return self.fail(leg, dev);
                }
                Ok(None)
            }
            ReachState::TrialDone | ReachState::TrialFailed => {
                if !countdown(&mut self.rest, dt) {
                    return Ok(None);
                }
                if self.completed >= self.config.ntrials {
                    self.block_done = true;
                    self.transition(ReachState::FreeRunning);
                    info!("{} DISC block done after {} attempts", self.mechanism, self.attempts);
                    return Ok(Some(ReachAction::BlockDone));
                }
                self.start_trial(dev).map(Some)
            }
        }
    }
}

impl Assessment for DiscreteReach {
    type State = ReachState;
    type Action = ReachAction;

    fn state(&self) -> ReachState {
        self.state
    }

    fn run(
        &mut self,
        event: PlutoEvent,
        dt: f32,
        dev: &mut dyn PlutoDevice,
    ) -> Result<Option<ReachAction>> {
        match event {
            PlutoEvent::NewData => {
                let position = dev.position();
                self.tick(dt, position, dev)
            }
            PlutoEvent::Released
                if self.state == ReachState::FreeRunning && !self.block_done =>
            {
                self.start_trial(dev).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn instruction(&self) -> String {
        let trial = self.completed + 1;
        match self.state {
            ReachState::FreeRunning if self.block_done => "Discrete reaching done.".to_string(),
            ReachState::FreeRunning => "Release the button to start reaching.".to_string(),
            ReachState::GetToTargetStart(l) => format!("Trial {trial}: go to target {}.", l.start() + 1),
            ReachState::HoldingAtStart(_) | ReachState::WaitToStartReach(_) => {
                "Hold still and wait for the go cue.".to_string()
            }
            ReachState::Moving(l) | ReachState::HoldingAtStop(l) => {
                format!("Reach target {} and hold.", l.stop() + 1)
            }
            ReachState::TrialDone => format!("Trial {} done. Rest.", self.completed),
            ReachState::TrialFailed => "Too slow. Rest, the trial will restart.".to_string(),
        }
    }

    fn trial(&self) -> usize {
        self.completed
    }

    fn is_done(&self) -> bool {
        self.block_done
    }

    fn summary_header(&self) -> Vec<&'static str> {
        vec!["trial", "attempt", "target1", "target2", "time1", "time2", "result"]
    }

    fn summary_row(&self, action: &ReachAction) -> Option<Vec<String>> {
        let (trial, result) = match action {
            ReachAction::TrialDone { trial, .. } => (*trial, "success"),
            ReachAction::TrialFailed { trial, .. } => (*trial, "failure"),
            _ => return None,
        };
        Some(vec![
            (trial + 1).to_string(),
            self.attempts.to_string(),
            format!("{:.3}", self.targets[0]),
            format!("{:.3}", self.targets[1]),
            fmt_opt(self.times[0]),
            fmt_opt(self.times[1]),
            result.to_string(),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing::MockDevice;

    const DT: f32 = 0.125;

    fn setup() -> (DiscreteReach, MockDevice) {
        let config = DiscreteReachConfig {
            ntrials: 1,
            targets: [0.25, 0.75],
            target_tolerance: 0.05,
            reach_timeout: 1.0,
            hold_duration: 0.25,
            start_delay: 0.25,
            rest_duration: 0.5,
        };
        let arom = RomRange::new(0.0, 100.0).unwrap();
        let dev = MockDevice::new(Mechanism::Wfe);
        (DiscreteReach::new(Mechanism::Wfe, arom, config), dev)
    }

    fn tick(disc: &mut DiscreteReach, dev: &mut MockDevice, pos: f32) -> Option<ReachAction> {
        dev.set_position(pos);
        disc.run(PlutoEvent::NewData, DT, dev).unwrap()
    }

    fn to_go_cue(disc: &mut DiscreteReach, dev: &mut MockDevice) {
        let mut cue = None;
        for _ in 0..6 {
            if let Some(a) = tick(disc, dev, 25.0) {
                cue = Some(a);
                break;
            }
        }
        assert_eq!(cue, Some(ReachAction::GoCue { leg: Leg::First }));
    }

    #[test]
    fn targets_follow_arom() {
        let (disc, _) = setup();
        assert_eq!(disc.targets(), [25.0, 75.0]);
        assert_eq!(disc.target_half_width(), 5.0);
        assert_eq!(
            ReachState::Moving(Leg::First).to_string(),
            "MOVING_TO_TARGET2"
        );
        assert_eq!(
            ReachState::Moving(Leg::Second).to_string(),
            "MOVING_TO_TARGET1"
        );
    }

    #[test]
    fn round_trip_completes_block() {
        let (mut disc, mut dev) = setup();
        let action = disc.run(PlutoEvent::Released, 0.0, &mut dev).unwrap();
        assert_eq!(action, Some(ReachAction::TrialStarted { trial: 0, attempt: 1 }));
        to_go_cue(&mut disc, &mut dev);
        assert_eq!(disc.state(), ReachState::Moving(Leg::First));

        tick(&mut disc, &mut dev, 50.0);
        tick(&mut disc, &mut dev, 74.0);
        assert_eq!(disc.state(), ReachState::HoldingAtStop(Leg::First));
        tick(&mut disc, &mut dev, 75.0);
        let action = tick(&mut disc, &mut dev, 75.0);
        assert_eq!(
            action,
            Some(ReachAction::TargetReached {
                leg: Leg::First,
                time: 0.5
            })
        );
        assert_eq!(disc.state(), ReachState::WaitToStartReach(Leg::Second));

        tick(&mut disc, &mut dev, 75.0);
        let action = tick(&mut disc, &mut dev, 75.0);
        assert_eq!(action, Some(ReachAction::GoCue { leg: Leg::Second }));
        tick(&mut disc, &mut dev, 25.0);
        tick(&mut disc, &mut dev, 25.0);
        let action = tick(&mut disc, &mut dev, 25.0);
        assert_eq!(
            action,
            Some(ReachAction::TrialDone {
                trial: 0,
                times: [0.5, 0.375]
            })
        );

        for _ in 0..3 {
            assert_eq!(tick(&mut disc, &mut dev, 25.0), None);
        }
        assert_eq!(tick(&mut disc, &mut dev, 25.0), Some(ReachAction::BlockDone));
        assert_eq!(disc.state(), ReachState::FreeRunning);
        assert!(disc.is_done());
        // A finished block ignores the button.
        assert_eq!(disc.run(PlutoEvent::Released, 0.0, &mut dev).unwrap(), None);
    }

    #[test]
    fn timeout_fails_and_restarts_without_input() {
        let (mut disc, mut dev) = setup();
        dev.set_control_type(ControlType::Torque).unwrap();
        disc.run(PlutoEvent::Released, 0.0, &mut dev).unwrap();
        to_go_cue(&mut disc, &mut dev);

        for _ in 0..7 {
            assert_eq!(tick(&mut disc, &mut dev, 25.0), None);
            assert_eq!(disc.state(), ReachState::Moving(Leg::First));
        }
        let action = tick(&mut disc, &mut dev, 25.0);
        assert_eq!(
            action,
            Some(ReachAction::TrialFailed {
                trial: 0,
                leg: Leg::First
            })
        );
        assert_eq!(disc.state(), ReachState::TrialFailed);
        assert_eq!(dev.control_type(), ControlType::None);
        let row = disc.summary_row(&action.unwrap()).unwrap();
        assert_eq!(row.last().map(String::as_str), Some("failure"));

        for _ in 0..3 {
            tick(&mut disc, &mut dev, 25.0);
        }
        let action = tick(&mut disc, &mut dev, 25.0);
        assert_eq!(action, Some(ReachAction::TrialStarted { trial: 0, attempt: 2 }));
        assert_eq!(disc.state(), ReachState::GetToTargetStart(Leg::First));
        assert!(!disc.is_done());
    }

    #[test]
    fn leaving_start_target_resets_hold() {
        let (mut disc, mut dev) = setup();
        disc.run(PlutoEvent::Released, 0.0, &mut dev).unwrap();
        tick(&mut disc, &mut dev, 25.0);
        assert_eq!(disc.state(), ReachState::HoldingAtStart(Leg::First));
        tick(&mut disc, &mut dev, 40.0);
        assert_eq!(disc.state(), ReachState::GetToTargetStart(Leg::First));
    }
}
