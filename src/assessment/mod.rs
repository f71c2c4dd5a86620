//! Assessment protocols as event-driven state machines.
//!
//! Every machine consumes [`PlutoEvent`]s together with the time step they
//! account for and talks to the robot only through the [`PlutoDevice`]
//! handle it is given. Timers are countdowns decremented by the `dt` of each
//! NEWDATA event, so a recorded dt sequence replays identically.
//!
//! Whatever goes wrong inside a protocol (timeouts, range errors, device
//! faults) lands in a dedicated state that first returns the robot to
//! control type NONE.

use std::fmt;

use crate::device::PlutoDevice;
use crate::errors::Result;
use crate::events::PlutoEvent;

pub mod calibration;
pub mod discrete_reach;
pub mod force_control;
pub mod position_hold;
pub mod proprioception;
pub mod rom;
pub mod session;

pub use calibration::{Calibration, CalibrationAction, CalibrationState};
pub use discrete_reach::{DiscreteReach, Leg, ReachAction, ReachState};
pub use force_control::{ForceAction, ForceControl, ForceState};
pub use position_hold::{HoldAction, HoldState, PositionHold};
pub use proprioception::{PropAction, PropState, Proprioception};
pub use rom::{RomAction, RomAssessment, RomState};
pub use session::TaskSession;

/// Common surface of the protocol state machines.
pub trait Assessment {
    type State: Copy + PartialEq + fmt::Debug + fmt::Display;
    type Action: fmt::Debug;

    fn state(&self) -> Self::State;

    /// Feed one event. Returns the trial-level outcome it produced, if any.
    fn run(
        &mut self,
        event: PlutoEvent,
        dt: f32,
        device: &mut dyn PlutoDevice,
    ) -> Result<Option<Self::Action>>;

    /// Operator-facing text for the current tick.
    fn instruction(&self) -> String;

    /// Zero-based index of the trial in progress (or trials completed).
    fn trial(&self) -> usize;

    fn is_done(&self) -> bool;

    fn summary_header(&self) -> Vec<&'static str>;

    /// Summary-log row for trial-level actions; `None` for the rest.
    fn summary_row(&self, action: &Self::Action) -> Option<Vec<String>>;
}

/// Decrement `timer` by `dt`; true once it has run out.
pub(crate) fn countdown(timer: &mut f32, dt: f32) -> bool {
    *timer -= dt;
    *timer <= 0.0
}

pub(crate) fn fmt_opt(value: Option<f32>) -> String {
    value.map(|v| format!("{v:.3}")).unwrap_or_default()
}
