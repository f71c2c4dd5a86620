//! PLUTO rehabilitation robot driver and assessment protocols.
//!
//! The crate talks to the PLUTO wrist/hand robot over a serial link and runs
//! the clinical assessment battery on top of it.
//!
//! # Layers
//!
//! 1. [`framing`] splits the byte stream into checksummed frames;
//!    [`telemetry`] unpacks them into immutable [`DeviceSnapshot`]s and
//!    [`commands`] builds the outgoing ones.
//! 2. [`device::Pluto`] owns the link: an I/O thread decodes frames, the
//!    owning thread turns them into [`DeviceEvent`]s (NEWDATA, PRESSED,
//!    RELEASED) strictly in arrival order.
//! 3. [`assessment`] holds one state machine per protocol. Each consumes
//!    events and issues commands through the [`PlutoDevice`] trait, so the
//!    same machine runs against the robot or a recorded stream.
//! 4. [`orchestrator::FullAssessment`] sequences the battery per subject and
//!    limb from the resumable [`ledger::ProtocolLedger`], and [`record`]
//!    keeps the range-of-motion results consistent.
//!
//! # Timing
//!
//! Protocol timers count down by the `dt` carried on each NEWDATA event,
//! i.e. the device-side interval between packets, never wall-clock time.

pub mod assessment;
pub mod commands;
pub mod config;
pub mod datalog;
pub mod device;
pub mod errors;
pub mod events;
pub mod framing;
pub mod ledger;
pub mod logging;
pub mod orchestrator;
pub mod record;
pub mod telemetry;
pub mod window;

#[cfg(feature = "python")]
mod python;

pub use commands::{Command, Ramp};
pub use config::{LinkConfig, ProtocolConfig};
pub use device::{Pluto, PlutoDevice};
pub use errors::*;
pub use events::{DeviceEvent, EventSource, PlutoEvent};
pub use framing::{FrameDecoder, IN_HEADER, OUT_HEADER};
pub use orchestrator::{AssessState, FullAssessment, Limb, OrchestratorEvent, TaskOutcome};
pub use record::{RomKind, RomRange, RomStore};
pub use telemetry::{ControlType, DeviceSnapshot, ErrorFlags, Mechanism};
