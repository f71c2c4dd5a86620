//! Outgoing command payloads.
//!
//! Commands are fire-and-forget: the device never acknowledges them and the
//! only confirmation is what later telemetry reports.

use crate::framing::{encode_frame, OUT_HEADER};
use crate::telemetry::{ControlType, Mechanism};

// PLUTO command opcodes (first payload byte)
pub const OP_SET_ERROR: u8 = 0;
pub const OP_START_STREAM: u8 = 1;
pub const OP_STOP_STREAM: u8 = 2;
pub const OP_SET_SENSOR_PARAM: u8 = 3;
pub const OP_GET_SENSOR_PARAM: u8 = 4;
pub const OP_SET_CONTROL_PARAM: u8 = 5;
pub const OP_GET_CONTROL_PARAM: u8 = 6;
pub const OP_CALIBRATE: u8 = 7;
pub const OP_GET_VERSION: u8 = 8;
pub const OP_SET_CONTROL_TYPE: u8 = 9;
pub const OP_SET_CONTROL_TARGET: u8 = 10;
pub const OP_SET_DIAGNOSTICS: u8 = 11;
pub const OP_SET_CONTROL_BOUND: u8 = 12;
pub const OP_SET_CONTROL_GAIN: u8 = 13;
pub const OP_SET_CONTROL_DIR: u8 = 14;
pub const OP_SET_OBJECT_PARAM: u8 = 15;

/// Linear ramp of the control target from `initial` over `duration` seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ramp {
    pub initial: f32,
    pub duration: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetError(u16),
    StartStream,
    StopStream,
    SetSensorParam(Vec<f32>),
    GetSensorParam,
    SetControlParam(Vec<f32>),
    GetControlParam,
    Calibrate(Mechanism),
    GetVersion,
    SetControlType(ControlType),
    SetControlTarget { target: f32, ramp: Option<Ramp> },
    SetDiagnostics,
    SetControlBound(f32),
    SetControlGain(f32),
    SetControlDir(i8),
    /// Simulated object for force control: stiffness proxy and aperture offset.
    SetObjectParams { stiffness: f32, offset: f32 },
}

fn push_f32s(payload: &mut Vec<u8>, values: &[f32]) {
    for v in values {
        payload.extend_from_slice(&v.to_le_bytes());
    }
}

impl Command {
    pub fn opcode(&self) -> u8 {
        match self {
            Command::SetError(_) => OP_SET_ERROR,
            Command::StartStream => OP_START_STREAM,
            Command::StopStream => OP_STOP_STREAM,
            Command::SetSensorParam(_) => OP_SET_SENSOR_PARAM,
            Command::GetSensorParam => OP_GET_SENSOR_PARAM,
            Command::SetControlParam(_) => OP_SET_CONTROL_PARAM,
            Command::GetControlParam => OP_GET_CONTROL_PARAM,
            Command::Calibrate(_) => OP_CALIBRATE,
            Command::GetVersion => OP_GET_VERSION,
            Command::SetControlType(_) => OP_SET_CONTROL_TYPE,
            Command::SetControlTarget { .. } => OP_SET_CONTROL_TARGET,
            Command::SetDiagnostics => OP_SET_DIAGNOSTICS,
            Command::SetControlBound(_) => OP_SET_CONTROL_BOUND,
            Command::SetControlGain(_) => OP_SET_CONTROL_GAIN,
            Command::SetControlDir(_) => OP_SET_CONTROL_DIR,
            Command::SetObjectParams { .. } => OP_SET_OBJECT_PARAM,
        }
    }

    /// Payload bytes, opcode first.
    pub fn payload(&self) -> Vec<u8> {
        let mut p = vec![self.opcode()];
        match self {
            Command::SetError(code) => p.extend_from_slice(&code.to_le_bytes()),
            Command::SetSensorParam(values) | Command::SetControlParam(values) => {
                push_f32s(&mut p, values)
            }
            Command::Calibrate(mech) => p.push(mech.id()),
            Command::SetControlType(ct) => p.push(*ct as u8),
            Command::SetControlTarget { target, ramp } => {
                push_f32s(&mut p, &[*target]);
                if let Some(r) = ramp {
                    push_f32s(&mut p, &[r.initial, r.duration]);
                }
            }
            Command::SetControlBound(v) | Command::SetControlGain(v) => push_f32s(&mut p, &[*v]),
            Command::SetControlDir(dir) => p.push(*dir as u8),
            Command::SetObjectParams { stiffness, offset } => {
                push_f32s(&mut p, &[*stiffness, *offset])
            }
            Command::StartStream
            | Command::StopStream
            | Command::GetSensorParam
            | Command::GetControlParam
            | Command::GetVersion
            | Command::SetDiagnostics => {}
        }
        p
    }

    /// Complete outgoing frame ready for the transport.
    pub fn to_frame(&self) -> Vec<u8> {
        // Payloads are at most 1 + 4 * len(values); parameter lists are short.
        encode_frame(OUT_HEADER, &self.payload()).unwrap_or_default()
    }
}
