//! Interpretation of device payloads into typed snapshots.
//!
//! Payload layout (after the frame decoder has stripped header, length and
//! checksum):
//!
//! ```text
//! [0]      status: data type (bits 4-7), control type (bits 1-3), calibrated (bit 0)
//! [1..=2]  error code, combined as 255 * [2] + [1]
//! [3]      mechanism id (bits 4-7), actuated (bit 0)
//! [4..]    N little-endian f32 sensor values, N depending on the data type
//! [last]   button level (0 = up, 1 = held)
//! ```
//!
//! VERSION replies carry ASCII text from byte 4 onwards instead of floats.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{DriverError, Result};

// ============================================================================
// Constants
// ============================================================================

/// Hand aperture in cm per degree of HOC angle.
pub const HOC_SCALE: f32 = 0.1;

/// Number of inter-packet intervals averaged for the frame rate.
pub const FRAME_RATE_WINDOW: usize = 100;

// ============================================================================
// Status fields
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    SensorStream = 0,
    SensorParam = 1,
    DeviceError = 2,
    ControlParam = 3,
    Diagnostics = 4,
    Version = 5,
}

impl DataType {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(DataType::SensorStream),
            1 => Some(DataType::SensorParam),
            2 => Some(DataType::DeviceError),
            3 => Some(DataType::ControlParam),
            4 => Some(DataType::Diagnostics),
            5 => Some(DataType::Version),
            _ => None,
        }
    }

    /// Number of f32 values carried by packets of this type.
    pub fn sensor_count(self) -> usize {
        match self {
            DataType::SensorStream => 6,
            DataType::Diagnostics => 7,
            DataType::ControlParam => 3,
            DataType::SensorParam | DataType::DeviceError | DataType::Version => 0,
        }
    }

    /// Whether packets of this type drive the trial state machines.
    pub fn is_stream(self) -> bool {
        matches!(self, DataType::SensorStream | DataType::Diagnostics)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlType {
    #[default]
    None = 0,
    Position = 1,
    Torque = 2,
    ActiveAssist = 3,
    Resist = 4,
    Active = 5,
    Speed = 6,
    ObjectSim = 7,
    PositionLinear = 8,
}

impl ControlType {
    /// Decode the 3-bit control type field of the status byte.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            1 => ControlType::Position,
            2 => ControlType::Torque,
            3 => ControlType::ActiveAssist,
            4 => ControlType::Resist,
            5 => ControlType::Active,
            6 => ControlType::Speed,
            7 => ControlType::ObjectSim,
            _ => ControlType::None,
        }
    }

    /// The control type the device reports back once this one is active.
    pub fn reported_as(self) -> Self {
        match self {
            ControlType::PositionLinear => ControlType::Position,
            other => other,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ControlType::None => "NONE",
            ControlType::Position => "POSITION",
            ControlType::Torque => "TORQUE",
            ControlType::ActiveAssist => "ACTIVEASSIST",
            ControlType::Resist => "RESIST",
            ControlType::Active => "ACTIVE",
            ControlType::Speed => "SPEED",
            ControlType::ObjectSim => "OBJECTSIM",
            ControlType::PositionLinear => "POSITIONLINEAR",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let ct = match name.trim().to_ascii_uppercase().as_str() {
            "NONE" => ControlType::None,
            "POSITION" => ControlType::Position,
            "TORQUE" => ControlType::Torque,
            "ACTIVEASSIST" => ControlType::ActiveAssist,
            "RESIST" => ControlType::Resist,
            "ACTIVE" => ControlType::Active,
            "SPEED" => ControlType::Speed,
            "OBJECTSIM" => ControlType::ObjectSim,
            "POSITIONLINEAR" => ControlType::PositionLinear,
            _ => return None,
        };
        Some(ct)
    }
}

impl fmt::Display for ControlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Joint mechanism currently attached to the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Mechanism {
    #[default]
    NoMech = 0,
    /// Wrist flexion/extension.
    Wfe = 1,
    /// Wrist ulnar/radial deviation.
    Urd = 2,
    /// Forearm pronation/supination.
    Fps = 3,
    /// Hand opening/closing.
    Hoc = 4,
}

impl Mechanism {
    pub const ALL: [Mechanism; 4] = [Mechanism::Wfe, Mechanism::Urd, Mechanism::Fps, Mechanism::Hoc];

    pub fn from_id(id: u8) -> Self {
        match id {
            1 => Mechanism::Wfe,
            2 => Mechanism::Urd,
            3 => Mechanism::Fps,
            4 => Mechanism::Hoc,
            _ => Mechanism::NoMech,
        }
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Mechanism::NoMech => "NOMECH",
            Mechanism::Wfe => "WFE",
            Mechanism::Urd => "URD",
            Mechanism::Fps => "FPS",
            Mechanism::Hoc => "HOC",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "NOMECH" => Some(Mechanism::NoMech),
            "WFE" => Some(Mechanism::Wfe),
            "URD" => Some(Mechanism::Urd),
            "FPS" | "WPS" => Some(Mechanism::Fps),
            "HOC" => Some(Mechanism::Hoc),
            _ => None,
        }
    }

    pub fn is_hoc(self) -> bool {
        self == Mechanism::Hoc
    }

    /// Expected full range measured during calibration, in degrees.
    pub fn nominal_range(self) -> f32 {
        match self {
            Mechanism::Wfe => 120.0,
            Mechanism::Urd => 60.0,
            Mechanism::Fps => 160.0,
            Mechanism::Hoc => 93.0,
            Mechanism::NoMech => 0.0,
        }
    }

    /// Velocity below which the subject counts as holding still
    /// (deg/s, or cm/s for HOC).
    pub fn hold_velocity_threshold(self) -> f32 {
        if self.is_hoc() {
            0.5
        } else {
            5.0
        }
    }

    /// Minimum excursion beyond the current ROM envelope that extends it.
    pub fn rom_hysteresis(self) -> f32 {
        if self.is_hoc() {
            0.2
        } else {
            1.0
        }
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Device-reported error bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ErrorFlags(pub u16);

impl ErrorFlags {
    pub const ANGLE_SENSOR: u16 = 0x0001;
    pub const TORQUE_SENSOR: u16 = 0x0002;
    pub const MOTOR_CURRENT: u16 = 0x0004;
    pub const NO_HEARTBEAT: u16 = 0x0008;
    pub const LIMIT_EXCEEDED: u16 = 0x0010;

    const NAMES: [(u16, &'static str); 5] = [
        (Self::ANGLE_SENSOR, "ANGLE_SENSOR"),
        (Self::TORQUE_SENSOR, "TORQUE_SENSOR"),
        (Self::MOTOR_CURRENT, "MOTOR_CURRENT"),
        (Self::NO_HEARTBEAT, "NO_HEARTBEAT"),
        (Self::LIMIT_EXCEEDED, "LIMIT_EXCEEDED"),
    ];

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, bit: u16) -> bool {
        self.0 & bit != 0
    }

    pub fn has_torque_sensor_fault(self) -> bool {
        self.contains(Self::TORQUE_SENSOR)
    }

    /// Names of the set bits, for the operator display.
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect()
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Float fields of a packet, by data type.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorValues {
    Stream {
        angle: f32,
        torque: f32,
        control: f32,
        target: f32,
        desired: f32,
        grip_force: f32,
    },
    Diagnostics {
        angle: f32,
        torque: f32,
        control: f32,
        target: f32,
        error: f32,
        error_diff: f32,
        error_sum: f32,
    },
    ControlParams(ControlParams),
    Version(String),
    Empty,
}

/// Controller parameters echoed by CONTROLPARAM packets.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControlParams {
    pub bound: f32,
    pub direction: f32,
    pub gain: f32,
}

/// Telemetry at one instant. Immutable; replaced whole by the next packet.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    /// Time of receipt relative to the start of the link.
    pub timestamp: Duration,
    pub status: u8,
    pub data_type: DataType,
    pub control_type: ControlType,
    pub calibrated: bool,
    pub error: ErrorFlags,
    pub mechanism: Mechanism,
    pub actuated: bool,
    pub button: u8,
    pub values: SensorValues,
}

impl DeviceSnapshot {
    pub fn angle(&self) -> f32 {
        match self.values {
            SensorValues::Stream { angle, .. } | SensorValues::Diagnostics { angle, .. } => angle,
            _ => 0.0,
        }
    }

    pub fn torque(&self) -> f32 {
        match self.values {
            SensorValues::Stream { torque, .. } | SensorValues::Diagnostics { torque, .. } => {
                torque
            }
            _ => 0.0,
        }
    }

    pub fn control(&self) -> f32 {
        match self.values {
            SensorValues::Stream { control, .. } | SensorValues::Diagnostics { control, .. } => {
                control
            }
            _ => 0.0,
        }
    }

    pub fn target(&self) -> f32 {
        match self.values {
            SensorValues::Stream { target, .. } | SensorValues::Diagnostics { target, .. } => {
                target
            }
            _ => 0.0,
        }
    }

    pub fn desired(&self) -> Option<f32> {
        match self.values {
            SensorValues::Stream { desired, .. } => Some(desired),
            _ => None,
        }
    }

    pub fn grip_force(&self) -> Option<f32> {
        match self.values {
            SensorValues::Stream { grip_force, .. } => Some(grip_force),
            _ => None,
        }
    }

    /// Hand aperture in cm; only meaningful for the HOC mechanism.
    pub fn hand_aperture(&self) -> Option<f32> {
        self.mechanism
            .is_hoc()
            .then(|| HOC_SCALE * self.angle().abs())
    }

    /// Position used by trial logic: aperture for HOC, angle otherwise.
    pub fn position(&self) -> f32 {
        self.hand_aperture().unwrap_or_else(|| self.angle())
    }

    pub fn button_held(&self) -> bool {
        self.button != 0
    }
}

// ============================================================================
// Unpacking
// ============================================================================

fn read_f32(payload: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes([
        payload[offset],
        payload[offset + 1],
        payload[offset + 2],
        payload[offset + 3],
    ])
}

/// Combine the two error bytes. The weighting is the device's, not little-endian.
pub fn error_code(lo: u8, hi: u8) -> u16 {
    255 * hi as u16 + lo as u16
}

/// Interpret an accepted payload received at `timestamp`.
pub fn unpack(payload: &[u8], timestamp: Duration) -> Result<DeviceSnapshot> {
    if payload.len() < 4 {
        return Err(DriverError::Protocol(format!(
            "payload too short: {} bytes",
            payload.len()
        )));
    }

    let status = payload[0];
    let data_type = DataType::from_bits(status >> 4)
        .ok_or_else(|| DriverError::Protocol(format!("unknown data type in status {status:#04X}")))?;
    let control_type = ControlType::from_bits((status & 0x0E) >> 1);
    let calibrated = status & 0x01 != 0;
    let error = ErrorFlags(error_code(payload[1], payload[2]));
    let mechanism = Mechanism::from_id(payload[3] >> 4);
    let actuated = payload[3] & 0x01 != 0;

    let (values, button) = if data_type == DataType::Version {
        let text = String::from_utf8_lossy(&payload[4..])
            .trim_matches(|c: char| c == '\0' || c.is_whitespace())
            .to_string();
        (SensorValues::Version(text), 0)
    } else {
        let n = data_type.sensor_count();
        let expected = 4 + 4 * n + 1;
        if payload.len() < expected {
            return Err(DriverError::Protocol(format!(
                "{:?} payload has {} bytes, expected {}",
                data_type,
                payload.len(),
                expected
            )));
        }
        let f: Vec<f32> = (0..n).map(|i| read_f32(payload, 4 + 4 * i)).collect();
        let values = match data_type {
            DataType::SensorStream => SensorValues::Stream {
                angle: f[0],
                torque: f[1],
                control: f[2],
                target: f[3],
                desired: f[4],
                grip_force: f[5],
            },
            DataType::Diagnostics => SensorValues::Diagnostics {
                angle: f[0],
                torque: f[1],
                control: f[2],
                target: f[3],
                error: f[4],
                error_diff: f[5],
                error_sum: f[6],
            },
            DataType::ControlParam => SensorValues::ControlParams(ControlParams {
                bound: f[0],
                direction: f[1],
                gain: f[2],
            }),
            _ => SensorValues::Empty,
        };
        (values, payload[4 + 4 * n])
    };

    Ok(DeviceSnapshot {
        timestamp,
        status,
        data_type,
        control_type,
        calibrated,
        error,
        mechanism,
        actuated,
        button: button.min(1),
        values,
    })
}

// ============================================================================
// Frame rate
// ============================================================================

/// Rolling average packet rate over the last [`FRAME_RATE_WINDOW`] intervals.
#[derive(Debug, Clone, Default)]
pub struct FrameRate {
    last: Option<Duration>,
    intervals: VecDeque<f64>,
    sum: f64,
}

impl FrameRate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, timestamp: Duration) {
        if let Some(last) = self.last {
            let dt = timestamp.saturating_sub(last).as_secs_f64();
            self.intervals.push_back(dt);
            self.sum += dt;
            if self.intervals.len() > FRAME_RATE_WINDOW {
                if let Some(old) = self.intervals.pop_front() {
                    self.sum -= old;
                }
            }
        }
        self.last = Some(timestamp);
    }

    /// Packets per second, 0 until two packets have been seen.
    pub fn rate(&self) -> f64 {
        if self.intervals.is_empty() || self.sum <= 0.0 {
            return 0.0;
        }
        self.intervals.len() as f64 / self.sum
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a SENSORSTREAM payload for tests across the crate.
    pub(crate) fn stream_payload(
        status: u8,
        error: u16,
        mech: Mechanism,
        values: [f32; 6],
        button: u8,
    ) -> Vec<u8> {
        let mut p = vec![
            status,
            (error % 255) as u8,
            (error / 255) as u8,
            mech.id() << 4,
        ];
        for v in values {
            p.extend_from_slice(&v.to_le_bytes());
        }
        p.push(button);
        p
    }

    #[test]
    fn unpacks_sensor_stream() {
        // data type 0, control POSITION (1 << 1), calibrated
        let status = (1 << 1) | 1;
        let payload = stream_payload(status, 0, Mechanism::Wfe, [12.5, -0.3, 0.1, 20.0, 19.0, 0.0], 1);
        let snap = unpack(&payload, Duration::from_millis(5)).unwrap();
        assert_eq!(snap.data_type, DataType::SensorStream);
        assert_eq!(snap.control_type, ControlType::Position);
        assert!(snap.calibrated);
        assert_eq!(snap.mechanism, Mechanism::Wfe);
        assert_eq!(snap.angle(), 12.5);
        assert_eq!(snap.torque(), -0.3);
        assert_eq!(snap.target(), 20.0);
        assert_eq!(snap.desired(), Some(19.0));
        assert_eq!(snap.button, 1);
        assert_eq!(snap.hand_aperture(), None);
        assert_eq!(snap.position(), 12.5);
    }

    #[test]
    fn error_code_uses_weighted_combination() {
        assert_eq!(error_code(0x01, 0x00), 1);
        assert_eq!(error_code(0x00, 0x01), 255);
        assert_eq!(error_code(0x02, 0x01), 257);
        let mut payload = stream_payload(0, 0, Mechanism::Hoc, [0.0; 6], 0);
        payload[1] = 0x03;
        payload[2] = 0x01;
        let snap = unpack(&payload, Duration::ZERO).unwrap();
        assert_eq!(snap.error.0, 258);
        assert!(snap.error.has_torque_sensor_fault());
    }

    #[test]
    fn mechanism_and_actuated_share_a_byte() {
        let mut payload = stream_payload(0, 0, Mechanism::Fps, [0.0; 6], 0);
        payload[3] |= 0x01;
        let snap = unpack(&payload, Duration::ZERO).unwrap();
        assert_eq!(snap.mechanism, Mechanism::Fps);
        assert!(snap.actuated);
    }

    #[test]
    fn hand_aperture_only_for_hoc() {
        let payload = stream_payload(0, 0, Mechanism::Hoc, [-40.0, 0.0, 0.0, 0.0, 0.0, 0.0], 0);
        let snap = unpack(&payload, Duration::ZERO).unwrap();
        let aperture = snap.hand_aperture().unwrap();
        assert!((aperture - 4.0).abs() < 1e-5);
        assert!((snap.position() - 4.0).abs() < 1e-5);
    }

    #[test]
    fn diagnostics_carry_seven_values() {
        let mut p = vec![4 << 4, 0, 0, Mechanism::Wfe.id() << 4];
        for v in [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0] {
            p.extend_from_slice(&v.to_le_bytes());
        }
        p.push(0);
        let snap = unpack(&p, Duration::ZERO).unwrap();
        assert_eq!(snap.data_type, DataType::Diagnostics);
        assert_eq!(snap.angle(), 1.0);
        assert_eq!(
            snap.values,
            SensorValues::Diagnostics {
                angle: 1.0,
                torque: 2.0,
                control: 3.0,
                target: 4.0,
                error: 5.0,
                error_diff: 6.0,
                error_sum: 7.0,
            }
        );
        assert_eq!(snap.grip_force(), None);
    }

    #[test]
    fn version_payload_is_text() {
        let mut p = vec![5 << 4, 0, 0, 0];
        p.extend_from_slice(b"PLUTO-2.1\0");
        let snap = unpack(&p, Duration::ZERO).unwrap();
        assert_eq!(snap.values, SensorValues::Version("PLUTO-2.1".into()));
    }

    #[test]
    fn short_payload_is_a_protocol_error() {
        let payload = stream_payload(0, 0, Mechanism::Wfe, [0.0; 6], 0);
        assert!(matches!(
            unpack(&payload[..10], Duration::ZERO),
            Err(DriverError::Protocol(_))
        ));
        assert!(unpack(&[0x00, 0x00], Duration::ZERO).is_err());
        assert!(unpack(&[0xF0, 0, 0, 0, 0], Duration::ZERO).is_err());
    }

    #[test]
    fn frame_rate_averages_intervals() {
        let mut fr = FrameRate::new();
        assert_eq!(fr.rate(), 0.0);
        for i in 0..=10 {
            fr.update(Duration::from_millis(5 * i));
        }
        assert!((fr.rate() - 200.0).abs() < 1e-6);
        // Only the last 100 intervals count.
        let start = Duration::from_millis(50);
        for i in 1..=200u64 {
            fr.update(start + Duration::from_millis(10 * i));
        }
        assert!((fr.rate() - 100.0).abs() < 1e-6);
    }

    #[test]
    fn error_flag_names() {
        let flags = ErrorFlags(ErrorFlags::ANGLE_SENSOR | ErrorFlags::NO_HEARTBEAT);
        assert_eq!(flags.names(), vec!["ANGLE_SENSOR", "NO_HEARTBEAT"]);
        assert!(ErrorFlags::default().is_empty());
    }

    #[test]
    fn mechanism_names_round_trip() {
        for m in Mechanism::ALL {
            assert_eq!(Mechanism::from_name(m.name()), Some(m));
        }
        assert_eq!(Mechanism::from_name("wps"), Some(Mechanism::Fps));
        assert!(Mechanism::Hoc.hold_velocity_threshold() < Mechanism::Wfe.hold_velocity_threshold());
    }
}
