//! Position holding inside target sectors.
//!
//! Targets are fractions of the active range. The first block presents them
//! in their configured order, later blocks shuffle them. A trial succeeds
//! once the subject stays inside the sector for the hold duration; running
//! out of trial time sends the same target round again after a rest.

use std::fmt;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::{countdown, Assessment};
use crate::config::PositionHoldConfig;
use crate::device::PlutoDevice;
use crate::errors::Result;
use crate::events::PlutoEvent;
use crate::record::RomRange;
use crate::telemetry::{ControlType, Mechanism};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldState {
    Rest,
    GotoTgt,
    HoldTgt,
    Done,
}

impl fmt::Display for HoldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HoldState::Rest => "REST",
            HoldState::GotoTgt => "GOTO_TGT",
            HoldState::HoldTgt => "HOLD_TGT",
            HoldState::Done => "DONE",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HoldAction {
    TargetShown { trial: usize, target: f32 },
    Entered,
    Left,
    TrialSuccess { trial: usize, target: f32, time: f32 },
    TrialFailed { trial: usize, target: f32 },
    Done,
}

/// Canonical order first, then `nblocks - 1` shuffled copies.
pub fn target_sequence<R: rand::Rng>(targets: &[f32], nblocks: usize, rng: &mut R) -> Vec<f32> {
    let mut seq = Vec::with_capacity(targets.len() * nblocks);
    for block in 0..nblocks {
        let mut order = targets.to_vec();
        if block > 0 {
            order.shuffle(rng);
        }
        seq.extend(order);
    }
    seq
}

#[derive(Debug, Clone)]
pub struct PositionHold {
    mechanism: Mechanism,
    config: PositionHoldConfig,
    targets: Vec<f32>,
    half_width: f32,
    state: HoldState,
    index: usize,
    rest: f32,
    trial_timer: f32,
    hold: f32,
    elapsed: f32,
    failures: usize,
}

impl PositionHold {
    pub fn new(mechanism: Mechanism, arom: RomRange, config: PositionHoldConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let targets = target_sequence(&config.targets, config.nblocks, &mut rng)
            .into_iter()
            .map(|f| arom.at_fraction(f))
            .collect();
        Self {
            mechanism,
            half_width: config.sector_width * arom.span(),
            rest: config.rest_duration,
            config,
            targets,
            state: HoldState::Rest,
            index: 0,
            trial_timer: 0.0,
            hold: 0.0,
            elapsed: 0.0,
            failures: 0,
        }
    }

    /// Target positions in presentation order.
    pub fn targets(&self) -> &[f32] {
        &self.targets
    }

    pub fn current_target(&self) -> Option<f32> {
        self.targets.get(self.index).copied()
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    fn in_sector(&self, position: f32) -> bool {
        self.current_target()
            .map(|t| (position - t).abs() <= self.half_width)
            .unwrap_or(false)
    }

    fn transition(&mut self, next: HoldState) {
        debug!("{} POSHOLD: {} -> {}", self.mechanism, self.state, next);
        self.state = next;
    }

    fn rest_after_failure(&mut self) -> Option<HoldAction> {
        self.failures += 1;
        self.rest = self.config.rest_duration;
        self.transition(HoldState::Rest);
        self.current_target().map(|target| HoldAction::TrialFailed {
            trial: self.index,
            target,
        })
    }

    fn tick(&mut self, dt: f32, dev: &mut dyn PlutoDevice) -> Result<Option<HoldAction>> {
        let position = dev.position();
        match self.state {
            HoldState::Rest => {
                dev.set_control_type(ControlType::None)?;
                if !countdown(&mut self.rest, dt) {
                    return Ok(None);
                }
                let Some(target) = self.current_target() else {
                    info!("{} POSHOLD done, {} retries", self.mechanism, self.failures);
                    self.transition(HoldState::Done);
                    return Ok(Some(HoldAction::Done));
                };
                self.trial_timer = self.config.trial_duration;
                self.elapsed = 0.0;
                self.transition(HoldState::GotoTgt);
                Ok(Some(HoldAction::TargetShown {
                    trial: self.index,
                    target,
                }))
            }
            HoldState::GotoTgt => {
                self.elapsed += dt;
                let expired = countdown(&mut self.trial_timer, dt);
                if self.in_sector(position) {
                    self.hold = self.config.hold_duration;
                    self.transition(HoldState::HoldTgt);
                    return Ok(Some(HoldAction::Entered));
                }
                if expired {
                    return Ok(self.rest_after_failure());
                }
                Ok(None)
            }
            HoldState::HoldTgt => {
                self.elapsed += dt;
                let expired = countdown(&mut self.trial_timer, dt);
                if !self.in_sector(position) {
                    if expired {
                        return Ok(self.rest_after_failure());
                    }
                    self.transition(HoldState::GotoTgt);
                    return Ok(Some(HoldAction::Left));
                }
                if countdown(&mut self.hold, dt) {
                    let trial = self.index;
                    let target = self.targets[trial];
                    self.index += 1;
                    self.rest = self.config.rest_duration;
                    self.transition(HoldState::Rest);
                    return Ok(Some(HoldAction::TrialSuccess {
                        trial,
                        target,
                        time: self.elapsed,
                    }));
                }
                if expired {
                    return Ok(self.rest_after_failure());
                }
                Ok(None)
            }
            HoldState::Done => Ok(None),
        }
    }
}

impl Assessment for PositionHold {
    type State = HoldState;
    type Action = HoldAction;

    fn state(&self) -> HoldState {
        self.state
    }

    fn run(
        &mut self,
        event: PlutoEvent,
        dt: f32,
        dev: &mut dyn PlutoDevice,
    ) -> Result<Option<HoldAction>> {
        match event {
            PlutoEvent::NewData => self.tick(dt, dev),
            _ => Ok(None),
        }
    }

    fn instruction(&self) -> String {
        match self.state {
            HoldState::Rest => "Rest.".to_string(),
            HoldState::GotoTgt => format!(
                "Move into the target at {:.1}.",
                self.current_target().unwrap_or_default()
            ),
            HoldState::HoldTgt => "Hold inside the target.".to_string(),
            HoldState::Done => "Position hold done.".to_string(),
        }
    }

    fn trial(&self) -> usize {
        self.index
    }

    fn is_done(&self) -> bool {
        self.state == HoldState::Done
    }

    fn summary_header(&self) -> Vec<&'static str> {
        vec!["trial", "target", "time", "result"]
    }

    fn summary_row(&self, action: &HoldAction) -> Option<Vec<String>> {
        match action {
            HoldAction::TrialSuccess {
                trial,
                target,
                time,
            } => Some(vec![
                (trial + 1).to_string(),
                format!("{target:.3}"),
                format!("{time:.3}"),
                "success".to_string(),
            ]),
            HoldAction::TrialFailed { trial, target } => Some(vec![
                (trial + 1).to_string(),
                format!("{target:.3}"),
                String::new(),
                "failure".to_string(),
            ]),
            _ => None,
        }
    }
}
