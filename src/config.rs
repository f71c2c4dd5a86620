//! Link settings and protocol configuration.
//!
//! Protocol parameters come from a JSON file loaded once at startup. Every
//! field has a default so partial files are accepted; after loading the
//! configuration is treated as immutable.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{DriverError, Result};
use crate::telemetry::Mechanism;

// ============================================================================
// Serial link
// ============================================================================

/// Default serial baud rate for PLUTO
pub const BAUD_RATE: u32 = 115200;

/// Read timeout of the I/O thread; bounds how long pause/close take to apply
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Sleep between checks while the I/O thread is paused
pub const PAUSE_POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
    pub read_chunk: usize,
    pub pause_poll: Duration,
}

impl LinkConfig {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: BAUD_RATE,
            read_timeout: READ_TIMEOUT,
            read_chunk: 256,
            pause_poll: PAUSE_POLL,
        }
    }
}

// ============================================================================
// Protocols
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Allowed relative deviation from the mechanism's nominal range.
    pub range_tolerance: f32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            range_tolerance: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RomConfig {
    pub ntrials: usize,
    pub window_len: usize,
    /// Assist torque (Nm) applied in the direction of motion during APROM.
    pub assist_torque: f32,
}

impl Default for RomConfig {
    fn default() -> Self {
        Self {
            ntrials: 3,
            window_len: 50,
            assist_torque: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscreteReachConfig {
    pub ntrials: usize,
    /// Target positions as fractions of the active ROM span.
    pub targets: [f32; 2],
    /// Target half-width as a fraction of the active ROM span.
    pub target_tolerance: f32,
    pub reach_timeout: f32,
    pub hold_duration: f32,
    pub start_delay: f32,
    pub rest_duration: f32,
}

impl Default for DiscreteReachConfig {
    fn default() -> Self {
        Self {
            ntrials: 10,
            targets: [0.25, 0.75],
            target_tolerance: 0.05,
            reach_timeout: 5.0,
            hold_duration: 1.0,
            start_delay: 0.5,
            rest_duration: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForceControlConfig {
    pub ntrials: usize,
    /// Target grip force (N).
    pub target_force: f32,
    /// Half-width of the acceptable band around the target (N).
    pub tolerance: f32,
    /// Force that counts as first contact with the simulated object (N).
    pub contact_force: f32,
    pub trial_duration: f32,
    pub relax_duration: f32,
    pub object_stiffness: f32,
    /// Aperture (cm) at which the simulated object sits.
    pub object_offset: f32,
}

impl Default for ForceControlConfig {
    fn default() -> Self {
        Self {
            ntrials: 5,
            target_force: 0.4,
            tolerance: 0.1,
            contact_force: 0.05,
            trial_duration: 10.0,
            relax_duration: 3.0,
            object_stiffness: 0.5,
            object_offset: 4.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionHoldConfig {
    /// Canonical target centres as fractions of the active ROM span.
    pub targets: Vec<f32>,
    pub nblocks: usize,
    /// Half-width of the target sector, as a fraction of the active ROM span.
    pub sector_width: f32,
    pub hold_duration: f32,
    pub trial_duration: f32,
    pub rest_duration: f32,
    /// Seed for the block shuffles, so a session can be replayed.
    pub seed: u64,
}

impl Default for PositionHoldConfig {
    fn default() -> Self {
        Self {
            targets: vec![0.2, 0.5, 0.8],
            nblocks: 3,
            sector_width: 0.05,
            hold_duration: 2.0,
            trial_duration: 10.0,
            rest_duration: 1.0,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProprioceptionConfig {
    /// Shown positions as signed fractions of the passive range
    /// (negative fractions point towards the PROM minimum).
    pub targets: Vec<f32>,
    pub start_tolerance: f32,
    pub start_delay: f32,
    pub move_duration: f32,
    pub display_duration: f32,
    pub intra_trial_rest: f32,
    /// Sweep duration towards the range limit, also the no-response timeout.
    pub assessment_duration: f32,
    pub response_hold: f32,
    pub inter_trial_rest: f32,
}

impl Default for ProprioceptionConfig {
    fn default() -> Self {
        Self {
            targets: vec![0.3, 0.6, -0.3, -0.6],
            start_tolerance: 2.0,
            start_delay: 1.0,
            move_duration: 2.0,
            display_duration: 2.0,
            intra_trial_rest: 2.0,
            assessment_duration: 8.0,
            response_hold: 1.0,
            inter_trial_rest: 2.0,
        }
    }
}

/// Which tasks the full battery runs for each mechanism.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    pub mechanisms: Vec<String>,
    /// Tasks run first, in this order, for every mechanism.
    pub fixed_tasks: Vec<String>,
    /// Tasks run afterwards in an order shuffled once per ledger.
    pub randomized_tasks: Vec<String>,
    /// Tasks that only apply to HOC.
    pub hoc_only_tasks: Vec<String>,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            mechanisms: ["WFE", "FPS", "HOC"].iter().map(|s| s.to_string()).collect(),
            fixed_tasks: ["AROM", "PROM", "APROM"].iter().map(|s| s.to_string()).collect(),
            randomized_tasks: ["DISC", "PROP", "FCTRL"].iter().map(|s| s.to_string()).collect(),
            hoc_only_tasks: vec!["FCTRL".to_string()],
        }
    }
}

impl BatteryConfig {
    pub fn mechanisms(&self) -> Result<Vec<Mechanism>> {
        self.mechanisms
            .iter()
            .map(|m| {
                Mechanism::from_name(m)
                    .filter(|m| *m != Mechanism::NoMech)
                    .ok_or_else(|| DriverError::Config(format!("unknown mechanism {m}")))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub calibration: CalibrationConfig,
    pub rom: RomConfig,
    pub discrete_reach: DiscreteReachConfig,
    pub force_control: ForceControlConfig,
    pub position_hold: PositionHoldConfig,
    pub proprioception: ProprioceptionConfig,
    pub battery: BatteryConfig,
}

impl ProtocolConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: ProtocolConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    fn validate(&self) -> Result<()> {
        if self.force_control.tolerance < 0.0 {
            return Err(DriverError::Config("force tolerance must be non-negative".into()));
        }
        if self.position_hold.targets.is_empty() {
            return Err(DriverError::Config("position hold needs at least one target".into()));
        }
        if self.proprioception.targets.is_empty() {
            return Err(DriverError::Config("proprioception needs at least one target".into()));
        }
        self.battery.mechanisms()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = ProtocolConfig::from_json_str(
            r#"{ "rom": { "ntrials": 5 }, "force_control": { "target_force": 0.6 } }"#,
        )
        .unwrap();
        assert_eq!(cfg.rom.ntrials, 5);
        assert_eq!(cfg.rom.window_len, RomConfig::default().window_len);
        assert_eq!(cfg.force_control.target_force, 0.6);
        assert_eq!(cfg.discrete_reach, DiscreteReachConfig::default());
    }

    #[test]
    fn rejects_unknown_mechanism() {
        let err = ProtocolConfig::from_json_str(r#"{ "battery": { "mechanisms": ["ELBOW"] } }"#);
        assert!(matches!(err, Err(DriverError::Config(_))));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("protocol.json");
        fs::write(&path, r#"{ "calibration": { "range_tolerance": 0.2 } }"#).unwrap();
        let cfg = ProtocolConfig::from_json_file(&path).unwrap();
        assert_eq!(cfg.calibration.range_tolerance, 0.2);
        assert_eq!(
            cfg.battery.mechanisms().unwrap(),
            vec![Mechanism::Wfe, Mechanism::Fps, Mechanism::Hoc]
        );
    }
}
