//! Fixed-length rolling window of trial samples.

use std::collections::VecDeque;

/// Default number of samples kept (about half a second of stream data).
pub const DEFAULT_WINDOW_LEN: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub dt: f32,
    pub position: f32,
    /// `None` when there was no earlier sample or its dt was not positive.
    pub velocity: Option<f32>,
}

/// Rolling `(dt, position, velocity)` buffer used to decide whether the
/// subject is holding still. Oldest samples are dropped first.
#[derive(Debug, Clone)]
pub struct TrialDataWindow {
    cap: usize,
    samples: VecDeque<Sample>,
}

impl Default for TrialDataWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_LEN)
    }
}

impl TrialDataWindow {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            cap,
            samples: VecDeque::with_capacity(cap),
        }
    }

    /// Append a sample. Velocity is measured against the previous sample
    /// over the dt stored with it. It is unknown for the first sample and
    /// after a sample whose dt was not positive.
    pub fn add(&mut self, dt: f32, position: f32) {
        let velocity = match self.samples.back() {
            Some(prev) if prev.dt > 0.0 => Some((position - prev.position) / prev.dt),
            _ => None,
        };
        if self.samples.len() == self.cap {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample {
            dt,
            position,
            velocity,
        });
    }

    /// True iff the window is full and every buffered velocity is known and
    /// below `threshold` in magnitude.
    pub fn is_holding(&self, threshold: f32) -> bool {
        self.samples.len() == self.cap
            && self
                .samples
                .iter()
                .all(|s| s.velocity.is_some_and(|v| v.abs() < threshold))
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.back()
    }

    #[cfg(test)]
    fn velocities(&self) -> Vec<Option<f32>> {
        self.samples.iter().map(|s| s.velocity).collect()
    }

    #[cfg(test)]
    fn positions(&self) -> Vec<f32> {
        self.samples.iter().map(|s| s.position).collect()
    }
}
