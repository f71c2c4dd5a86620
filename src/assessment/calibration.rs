//! Mechanism calibration: zero the encoder, then check the full range.
//!
//! Zeroing is only started while the device reports NOCALIB, and the zero is
//! only taken as set once the device itself reports the calibrated status
//! bit; issuing the command is not enough.

use std::fmt;

use log::{debug, info, warn};

use super::Assessment;
use crate::config::CalibrationConfig;
use crate::device::PlutoDevice;
use crate::errors::Result;
use crate::events::PlutoEvent;
use crate::telemetry::{ControlType, Mechanism};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationState {
    WaitForZeroSet,
    WaitForRomSet,
    WaitForClose,
    CalibDone,
    CalibError,
}

impl fmt::Display for CalibrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CalibrationState::WaitForZeroSet => "WAIT_FOR_ZERO_SET",
            CalibrationState::WaitForRomSet => "WAIT_FOR_ROM_SET",
            CalibrationState::WaitForClose => "WAIT_FOR_CLOSE",
            CalibrationState::CalibDone => "CALIB_DONE",
            CalibrationState::CalibError => "CALIB_ERROR",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationAction {
    CalibrateIssued,
    ZeroSet,
    CalibrationLost,
    RomSet { measured: f32 },
    RangeError { measured: f32, expected: f32 },
    Done,
}

#[derive(Debug, Clone)]
pub struct Calibration {
    mechanism: Mechanism,
    config: CalibrationConfig,
    state: CalibrationState,
    zero_requested: bool,
    measured: Option<f32>,
    notice: Option<&'static str>,
}

impl Calibration {
    pub fn new(mechanism: Mechanism, config: CalibrationConfig) -> Self {
        Self {
            mechanism,
            config,
            state: CalibrationState::WaitForZeroSet,
            zero_requested: false,
            measured: None,
            notice: None,
        }
    }

    pub fn mechanism(&self) -> Mechanism {
        self.mechanism
    }

    /// Range measured at ROM set, in degrees.
    pub fn measured_range(&self) -> Option<f32> {
        self.measured
    }

    fn transition(&mut self, next: CalibrationState) {
        debug!("calibration {}: {} -> {}", self.mechanism, self.state, next);
        self.state = next;
    }

    fn on_wait_for_zero(
        &mut self,
        event: PlutoEvent,
        dev: &mut dyn PlutoDevice,
    ) -> Result<Option<CalibrationAction>> {
        match event {
            PlutoEvent::Released if dev.is_calibrated() => {
                debug!("{} reports calibrated, zero-set ignored", self.mechanism);
                self.notice = Some(
                    "The device already reports a calibration. Reset it before setting the zero.",
                );
                Ok(None)
            }
            PlutoEvent::Released => {
                dev.set_control_type(ControlType::None)?;
                dev.calibrate(self.mechanism)?;
                self.zero_requested = true;
                self.notice = None;
                Ok(Some(CalibrationAction::CalibrateIssued))
            }
            PlutoEvent::NewData if self.zero_requested && dev.is_calibrated() => {
                self.notice = None;
                self.transition(CalibrationState::WaitForRomSet);
                Ok(Some(CalibrationAction::ZeroSet))
            }
            _ => Ok(None),
        }
    }

    fn on_wait_for_rom(
        &mut self,
        event: PlutoEvent,
        dev: &mut dyn PlutoDevice,
    ) -> Result<Option<CalibrationAction>> {
        match event {
            PlutoEvent::NewData if !dev.is_calibrated() => {
                warn!("{} lost calibration, zero must be set again", self.mechanism);
                self.zero_requested = false;
                self.transition(CalibrationState::WaitForZeroSet);
                Ok(Some(CalibrationAction::CalibrationLost))
            }
            PlutoEvent::Released => {
                let measured = dev.angle().abs();
                let expected = self.mechanism.nominal_range();
                self.measured = Some(measured);
                if (measured - expected).abs() <= self.config.range_tolerance * expected {
                    info!(
                        "{} range {:.1} within tolerance of {:.1}",
                        self.mechanism, measured, expected
                    );
                    self.transition(CalibrationState::WaitForClose);
                    Ok(Some(CalibrationAction::RomSet { measured }))
                } else {
                    warn!(
                        "{} range {:.1} deviates from expected {:.1}",
                        self.mechanism, measured, expected
                    );
                    dev.set_control_type(ControlType::None)?;
                    self.transition(CalibrationState::CalibError);
                    Ok(Some(CalibrationAction::RangeError { measured, expected }))
                }
            }
            _ => Ok(None),
        }
    }
}

impl Assessment for Calibration {
    type State = CalibrationState;
    type Action = CalibrationAction;

    fn state(&self) -> CalibrationState {
        self.state
    }

    fn run(
        &mut self,
        event: PlutoEvent,
        _dt: f32,
        dev: &mut dyn PlutoDevice,
    ) -> Result<Option<CalibrationAction>> {
        match self.state {
            CalibrationState::WaitForZeroSet => self.on_wait_for_zero(event, dev),
            CalibrationState::WaitForRomSet => self.on_wait_for_rom(event, dev),
            CalibrationState::WaitForClose => {
                if event == PlutoEvent::Released {
                    self.transition(CalibrationState::CalibDone);
                    return Ok(Some(CalibrationAction::Done));
                }
                Ok(None)
            }
            CalibrationState::CalibDone | CalibrationState::CalibError => Ok(None),
        }
    }

    fn instruction(&self) -> String {
        if let (CalibrationState::WaitForZeroSet, Some(notice)) = (self.state, self.notice) {
            return notice.to_string();
        }
        match self.state {
            CalibrationState::WaitForZeroSet if self.zero_requested => {
                "Waiting for the device to confirm calibration...".to_string()
            }
            CalibrationState::WaitForZeroSet => format!(
                "Move the {} mechanism to its zero position and release the button.",
                self.mechanism
            ),
            CalibrationState::WaitForRomSet => format!(
                "Move the {} mechanism to the end of its range and release the button.",
                self.mechanism
            ),
            CalibrationState::WaitForClose => format!(
                "Range {:.1} deg accepted. Release the button to finish.",
                self.measured.unwrap_or_default()
            ),
            CalibrationState::CalibDone => "Calibration done.".to_string(),
            CalibrationState::CalibError => format!(
                "Measured range {:.1} deg does not match the expected {:.1} deg. Close this window and calibrate again.",
                self.measured.unwrap_or_default(),
                self.mechanism.nominal_range()
            ),
        }
    }

    fn trial(&self) -> usize {
        0
    }

    fn is_done(&self) -> bool {
        matches!(
            self.state,
            CalibrationState::CalibDone | CalibrationState::CalibError
        )
    }

    fn summary_header(&self) -> Vec<&'static str> {
        vec!["mechanism", "measured", "expected", "result"]
    }

    fn summary_row(&self, action: &CalibrationAction) -> Option<Vec<String>> {
        let expected = format!("{:.3}", self.mechanism.nominal_range());
        match action {
            CalibrationAction::RomSet { measured } => Some(vec![
                self.mechanism.name().to_string(),
                format!("{measured:.3}"),
                expected,
                "accepted".to_string(),
            ]),
            CalibrationAction::RangeError { measured, .. } => Some(vec![
                self.mechanism.name().to_string(),
                format!("{measured:.3}"),
                expected,
                "error".to_string(),
            ]),
            _ => None,
        }
    }
}
