//! Range-of-motion records and their persisted results.
//!
//! Ranges are validated where they are assigned. A mechanism's record keeps
//! AROM ⊆ APROM ⊆ PROM; an assignment that would break the nesting is
//! refused, never clamped.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, RomError};
use crate::telemetry::Mechanism;

// ============================================================================
// Ranges
// ============================================================================

/// Ordered `[min, max]` interval, serialised as a two-element array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f32; 2]", into = "[f32; 2]")]
pub struct RomRange {
    min: f32,
    max: f32,
}

impl RomRange {
    pub fn new(min: f32, max: f32) -> std::result::Result<Self, RomError> {
        if min.is_nan() || max.is_nan() || min > max {
            return Err(RomError::Unordered { min, max });
        }
        Ok(Self { min, max })
    }

    /// Degenerate range at a single position.
    pub fn point(position: f32) -> Self {
        Self {
            min: position,
            max: position,
        }
    }

    pub fn min(&self) -> f32 {
        self.min
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    pub fn span(&self) -> f32 {
        self.max - self.min
    }

    pub fn contains(&self, other: &RomRange) -> bool {
        self.min <= other.min && other.max <= self.max
    }

    pub fn contains_value(&self, value: f32) -> bool {
        self.min <= value && value <= self.max
    }

    /// Position at fraction `f` of the span, measured from `min`.
    pub fn at_fraction(&self, f: f32) -> f32 {
        self.min + f * self.span()
    }

    /// Widen the range to `position` if it lies beyond an edge by more than
    /// `hysteresis`. Returns whether the range changed.
    pub fn extend(&mut self, position: f32, hysteresis: f32) -> bool {
        if position < self.min - hysteresis {
            self.min = position;
            true
        } else if position > self.max + hysteresis {
            self.max = position;
            true
        } else {
            false
        }
    }

    /// Smallest range containing all of `ranges`.
    pub fn envelope<'a>(ranges: impl IntoIterator<Item = &'a RomRange>) -> Option<RomRange> {
        ranges.into_iter().fold(None, |acc: Option<RomRange>, r| {
            Some(match acc {
                None => *r,
                Some(a) => RomRange {
                    min: a.min.min(r.min),
                    max: a.max.max(r.max),
                },
            })
        })
    }
}

impl TryFrom<[f32; 2]> for RomRange {
    type Error = RomError;

    fn try_from(value: [f32; 2]) -> std::result::Result<Self, Self::Error> {
        RomRange::new(value[0], value[1])
    }
}

impl From<RomRange> for [f32; 2] {
    fn from(r: RomRange) -> Self {
        [r.min, r.max]
    }
}

impl fmt::Display for RomRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.1}, {:.1}]", self.min, self.max)
    }
}

// ============================================================================
// Per-task record
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RomKind {
    Arom,
    Aprom,
    Prom,
}

impl RomKind {
    pub fn name(self) -> &'static str {
        match self {
            RomKind::Arom => "AROM",
            RomKind::Aprom => "APROM",
            RomKind::Prom => "PROM",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "AROM" => Some(RomKind::Arom),
            "APROM" => Some(RomKind::Aprom),
            "PROM" => Some(RomKind::Prom),
            _ => None,
        }
    }
}

impl fmt::Display for RomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Trial-by-trial ROM measurements of one task on one mechanism.
#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentRecord {
    pub kind: RomKind,
    pub mechanism: Mechanism,
    pub start_position: Option<f32>,
    trials: Vec<RomRange>,
}

impl AssessmentRecord {
    pub fn new(kind: RomKind, mechanism: Mechanism) -> Self {
        Self {
            kind,
            mechanism,
            start_position: None,
            trials: Vec::new(),
        }
    }

    /// Accept one trial's range.
    pub fn push_trial(&mut self, min: f32, max: f32) -> std::result::Result<RomRange, RomError> {
        let range = RomRange::new(min, max)?;
        self.trials.push(range);
        Ok(range)
    }

    pub fn trials(&self) -> &[RomRange] {
        &self.trials
    }

    /// Envelope of all accepted trials.
    pub fn summary(&self) -> Option<RomRange> {
        RomRange::envelope(&self.trials)
    }
}

// ============================================================================
// Per-mechanism nesting
// ============================================================================

/// AROM/APROM/PROM of one mechanism with AROM ⊆ APROM ⊆ PROM enforced.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MechanismRom {
    arom: Option<RomRange>,
    aprom: Option<RomRange>,
    prom: Option<RomRange>,
}

fn nested(
    inner: Option<RomRange>,
    outer: Option<RomRange>,
    inner_name: &'static str,
    outer_name: &'static str,
) -> std::result::Result<(), RomError> {
    match (inner, outer) {
        (Some(i), Some(o)) if !o.contains(&i) => Err(RomError::NotNested {
            inner: inner_name,
            outer: outer_name,
        }),
        _ => Ok(()),
    }
}

impl MechanismRom {
    pub fn arom(&self) -> Option<RomRange> {
        self.arom
    }

    pub fn aprom(&self) -> Option<RomRange> {
        self.aprom
    }

    pub fn prom(&self) -> Option<RomRange> {
        self.prom
    }

    pub fn get(&self, kind: RomKind) -> Option<RomRange> {
        match kind {
            RomKind::Arom => self.arom,
            RomKind::Aprom => self.aprom,
            RomKind::Prom => self.prom,
        }
    }

    pub fn set_arom(&mut self, range: RomRange) -> std::result::Result<(), RomError> {
        nested(Some(range), self.aprom, "AROM", "APROM")?;
        nested(Some(range), self.prom, "AROM", "PROM")?;
        self.arom = Some(range);
        Ok(())
    }

    pub fn set_aprom(&mut self, range: RomRange) -> std::result::Result<(), RomError> {
        nested(self.arom, Some(range), "AROM", "APROM")?;
        nested(Some(range), self.prom, "APROM", "PROM")?;
        self.aprom = Some(range);
        Ok(())
    }

    pub fn set_prom(&mut self, range: RomRange) -> std::result::Result<(), RomError> {
        nested(self.arom, Some(range), "AROM", "PROM")?;
        nested(self.aprom, Some(range), "APROM", "PROM")?;
        self.prom = Some(range);
        Ok(())
    }

    pub fn set(&mut self, kind: RomKind, range: RomRange) -> std::result::Result<(), RomError> {
        match kind {
            RomKind::Arom => self.set_arom(range),
            RomKind::Aprom => self.set_aprom(range),
            RomKind::Prom => self.set_prom(range),
        }
    }
}

// ============================================================================
// Persisted results
// ============================================================================

/// `task -> mechanism -> [min, max]`
pub type RomResults = BTreeMap<String, BTreeMap<String, RomRange>>;

/// ROM results JSON, rewritten after every accepted assignment.
#[derive(Debug)]
pub struct RomStore {
    path: PathBuf,
    results: RomResults,
}

impl RomStore {
    /// Load `path` if it exists, otherwise start empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let results = if path.exists() {
            let text = fs::read_to_string(&path)?;
            serde_json::from_str(&text)?
        } else {
            RomResults::new()
        };
        debug!("rom results loaded from {}", path.display());
        Ok(Self { path, results })
    }

    pub fn get(&self, kind: RomKind, mechanism: Mechanism) -> Option<RomRange> {
        self.results
            .get(kind.name())
            .and_then(|m| m.get(mechanism.name()))
            .copied()
    }

    pub fn mechanism(&self, mechanism: Mechanism) -> MechanismRom {
        MechanismRom {
            arom: self.get(RomKind::Arom, mechanism),
            aprom: self.get(RomKind::Aprom, mechanism),
            prom: self.get(RomKind::Prom, mechanism),
        }
    }

    /// Validate against the mechanism's other ranges, then persist.
    pub fn record(&mut self, kind: RomKind, mechanism: Mechanism, range: RomRange) -> Result<()> {
        let mut rom = self.mechanism(mechanism);
        rom.set(kind, range)?;
        self.results
            .entry(kind.name().to_string())
            .or_default()
            .insert(mechanism.name().to_string(), range);
        self.save()?;
        info!("{} {} set to {}", mechanism, kind, range);
        Ok(())
    }

    pub fn results(&self) -> &RomResults {
        &self.results
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(&self.results)?;
        fs::write(&self.path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DriverError;

    fn r(min: f32, max: f32) -> RomRange {
        RomRange::new(min, max).unwrap()
    }

    #[test]
    fn unordered_range_is_rejected() {
        assert_eq!(
            RomRange::new(5.0, -5.0),
            Err(RomError::Unordered { min: 5.0, max: -5.0 })
        );
        assert!(RomRange::new(f32::NAN, 1.0).is_err());
    }

    #[test]
    fn prom_inside_arom_is_refused() {
        let mut rom = MechanismRom::default();
        rom.set_arom(r(-10.0, 10.0)).unwrap();
        let err = rom.set_prom(r(-5.0, 5.0)).unwrap_err();
        assert_eq!(err.to_string(), "PROM cannot be less than AROM");
        assert_eq!(rom.prom(), None);
    }

    #[test]
    fn arom_inside_prom_is_accepted() {
        let mut rom = MechanismRom::default();
        rom.set_prom(r(-20.0, 20.0)).unwrap();
        rom.set_arom(r(-10.0, 10.0)).unwrap();
        rom.set_aprom(r(-15.0, 15.0)).unwrap();
        assert!(rom.set_aprom(r(-25.0, 15.0)).is_err());
        assert!(rom.set_aprom(r(-5.0, 5.0)).is_err());
        assert_eq!(rom.aprom(), Some(r(-15.0, 15.0)));
    }

    #[test]
    fn extend_respects_hysteresis() {
        let mut range = RomRange::point(0.0);
        assert!(!range.extend(0.5, 1.0));
        assert!(!range.extend(-1.0, 1.0));
        assert!(range.extend(-1.5, 1.0));
        assert!(range.extend(3.0, 1.0));
        assert_eq!(range, r(-1.5, 3.0));
    }

    #[test]
    fn record_summary_is_envelope() {
        let mut rec = AssessmentRecord::new(RomKind::Arom, Mechanism::Wfe);
        rec.push_trial(-30.0, 40.0).unwrap();
        rec.push_trial(-35.0, 38.0).unwrap();
        assert!(rec.push_trial(10.0, 0.0).is_err());
        assert_eq!(rec.trials().len(), 2);
        assert_eq!(rec.summary(), Some(r(-35.0, 40.0)));
    }

    #[test]
    fn store_persists_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rom.json");
        {
            let mut store = RomStore::open(&path).unwrap();
            store.record(RomKind::Arom, Mechanism::Wfe, r(-10.0, 10.0)).unwrap();
            let err = store.record(RomKind::Prom, Mechanism::Wfe, r(-5.0, 5.0));
            assert!(matches!(err, Err(DriverError::Validation(_))));
            // Other mechanisms are independent.
            store.record(RomKind::Prom, Mechanism::Fps, r(-5.0, 5.0)).unwrap();
        }
        let store = RomStore::open(&path).unwrap();
        assert_eq!(store.get(RomKind::Arom, Mechanism::Wfe), Some(r(-10.0, 10.0)));
        assert_eq!(store.get(RomKind::Prom, Mechanism::Wfe), None);
        assert_eq!(store.get(RomKind::Prom, Mechanism::Fps), Some(r(-5.0, 5.0)));

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["AROM"]["WFE"], serde_json::json!([-10.0, 10.0]));
    }

    #[test]
    fn unordered_json_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rom.json");
        fs::write(&path, r#"{ "AROM": { "WFE": [10.0, -10.0] } }"#).unwrap();
        assert!(RomStore::open(&path).is_err());
    }
}
