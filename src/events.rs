//! Turning snapshots into discrete events.
//!
//! Button convention: level 1 means the button is held down. PRESSED is the
//! 0→1 edge, RELEASED the 1→0 edge. Only RELEASED confirms anything in the
//! trial logic.

use std::fmt;
use std::time::Duration;

use crate::telemetry::DeviceSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlutoEvent {
    NewData,
    Pressed,
    Released,
}

impl fmt::Display for PlutoEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PlutoEvent::NewData => "NEWDATA",
            PlutoEvent::Pressed => "PRESSED",
            PlutoEvent::Released => "RELEASED",
        })
    }
}

/// An event together with the time step it accounts for, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceEvent {
    pub kind: PlutoEvent,
    pub dt: f32,
}

impl DeviceEvent {
    pub fn new(kind: PlutoEvent, dt: f32) -> Self {
        Self { kind, dt }
    }
}

/// Edge detector over successive stream snapshots.
#[derive(Debug, Clone, Default)]
pub struct EventSource {
    last_button: Option<u8>,
    last_timestamp: Option<Duration>,
}

impl EventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events for one accepted stream snapshot, in delivery order.
    ///
    /// NEWDATA carries the elapsed time since the previous snapshot; an edge
    /// event, if any, follows with `dt = 0` so countdowns see each packet once.
    pub fn process(&mut self, snapshot: &DeviceSnapshot) -> Vec<DeviceEvent> {
        let dt = self
            .last_timestamp
            .map(|t| snapshot.timestamp.saturating_sub(t).as_secs_f32())
            .unwrap_or(0.0);
        self.last_timestamp = Some(snapshot.timestamp);

        let mut events = vec![DeviceEvent::new(PlutoEvent::NewData, dt)];
        let level = snapshot.button.min(1);
        match (self.last_button, level) {
            (Some(0), 1) => events.push(DeviceEvent::new(PlutoEvent::Pressed, 0.0)),
            (Some(1), 0) => events.push(DeviceEvent::new(PlutoEvent::Released, 0.0)),
            _ => {}
        }
        self.last_button = Some(level);
        events
    }

    pub fn reset(&mut self) {
        self.last_button = None;
        self.last_timestamp = None;
    }
}

/// Decides which ticks get rendered. Never applied to event delivery.
#[derive(Debug, Clone)]
pub struct RenderThrottle {
    every: u32,
    count: u32,
}

impl RenderThrottle {
    pub fn new(every: u32) -> Self {
        Self {
            every: every.max(1),
            count: 0,
        }
    }

    pub fn tick(&mut self) -> bool {
        self.count += 1;
        if self.count >= self.every {
            self.count = 0;
            true
        } else {
            false
        }
    }
}
