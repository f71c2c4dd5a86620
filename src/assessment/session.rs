//! A running task: one state machine plus its raw and summary logs.

use log::{debug, warn};

use super::Assessment;
use crate::datalog::{RawLogger, SummaryLogger};
use crate::device::PlutoDevice;
use crate::errors::Result;
use crate::events::{DeviceEvent, PlutoEvent, RenderThrottle};
use crate::telemetry::ControlType;

/// Every fifth packet is worth redrawing at the stream rate.
const RENDER_EVERY: u32 = 5;

pub struct TaskSession<A: Assessment> {
    machine: A,
    raw: Option<RawLogger>,
    summary: Option<SummaryLogger>,
    throttle: RenderThrottle,
    attached: bool,
}

impl<A: Assessment> TaskSession<A> {
    pub fn new(machine: A) -> Self {
        Self {
            machine,
            raw: None,
            summary: None,
            throttle: RenderThrottle::new(RENDER_EVERY),
            attached: true,
        }
    }

    /// Attach CSV logs at the given paths; the summary header comes from the machine.
    pub fn with_logs(
        machine: A,
        raw_path: impl AsRef<std::path::Path>,
        summary_path: impl AsRef<std::path::Path>,
    ) -> Result<Self> {
        let raw = RawLogger::create(raw_path)?;
        let summary = SummaryLogger::create(summary_path, &machine.summary_header())?;
        Ok(Self::new(machine).with_raw_log(raw).with_summary_log(summary))
    }

    pub fn with_raw_log(mut self, logger: RawLogger) -> Self {
        self.raw = Some(logger);
        self
    }

    pub fn with_summary_log(mut self, logger: SummaryLogger) -> Self {
        self.summary = Some(logger);
        self
    }

    pub fn machine(&self) -> &A {
        &self.machine
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Route one event through the machine and log what it produced.
    ///
    /// Nothing happens once the session is closed.
    pub fn handle(
        &mut self,
        event: DeviceEvent,
        dev: &mut dyn PlutoDevice,
    ) -> Result<Option<A::Action>> {
        if !self.attached {
            return Ok(None);
        }
        let action = self.machine.run(event.kind, event.dt, dev)?;

        if event.kind == PlutoEvent::NewData {
            if let (Some(raw), Some(snapshot)) = (self.raw.as_mut(), dev.snapshot()) {
                raw.log(
                    snapshot,
                    dev.control_params(),
                    self.machine.trial(),
                    &self.machine.state().to_string(),
                )?;
            }
        }
        if let Some(action) = &action {
            debug!("{} -> {:?}", self.machine.state(), action);
            if let (Some(summary), Some(row)) = (self.summary.as_mut(), self.machine.summary_row(action)) {
                summary.log(&row)?;
            }
        }
        Ok(action)
    }

    /// Whether the display should redraw on this tick.
    pub fn should_render(&mut self) -> bool {
        self.throttle.tick()
    }

    /// Release the robot, flush the logs and stop routing events, in that order.
    ///
    /// The logs are flushed and the session detached even if the robot could
    /// not be reached; that error is returned afterwards.
    pub fn close(&mut self, dev: &mut dyn PlutoDevice) -> Result<()> {
        if !self.attached {
            return Ok(());
        }
        let released = dev.set_control_type(ControlType::None);
        if let Err(e) = &released {
            warn!("could not release the robot on close: {}", e);
        }

        let mut flushed = Ok(());
        if let Some(mut raw) = self.raw.take() {
            flushed = flushed.and(raw.flush());
        }
        if let Some(mut summary) = self.summary.take() {
            flushed = flushed.and(summary.flush());
        }

        self.attached = false;
        released?;
        flushed
    }
}
