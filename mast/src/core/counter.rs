//! Step accounting over heterogeneous units.
//!
//! A [`StepCount`] is a typed scalar: arithmetic and comparison between two
//! counts only succeed when their units agree. A [`StepCounter`] keeps one
//! running total per unit for the lifetime of a role.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// The kind of progress a count measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepUnit {
    EnvironmentSteps,
    EnvironmentEpisodes,
    TrainingSteps,
}

impl fmt::Display for StepUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepUnit::EnvironmentSteps => "environment steps",
            StepUnit::EnvironmentEpisodes => "environment episodes",
            StepUnit::TrainingSteps => "training steps",
        };
        f.write_str(name)
    }
}

/// Combining or comparing counts of different units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("step unit mismatch: expected {expected}, found {found}")]
pub struct UnitMismatchError {
    pub expected: StepUnit,
    pub found: StepUnit,
}

/// A number of steps tagged with its unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepCount {
    pub unit: StepUnit,
    pub steps: u64,
}

impl StepCount {
    pub const fn new(unit: StepUnit, steps: u64) -> Self {
        Self { unit, steps }
    }

    pub const fn env_steps(steps: u64) -> Self {
        Self::new(StepUnit::EnvironmentSteps, steps)
    }

    pub const fn episodes(steps: u64) -> Self {
        Self::new(StepUnit::EnvironmentEpisodes, steps)
    }

    pub const fn training_steps(steps: u64) -> Self {
        Self::new(StepUnit::TrainingSteps, steps)
    }

    pub const fn zero(unit: StepUnit) -> Self {
        Self::new(unit, 0)
    }

    pub fn unit(&self) -> StepUnit {
        self.unit
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn is_zero(&self) -> bool {
        self.steps == 0
    }

    fn same_unit(&self, other: &StepCount) -> Result<(), UnitMismatchError> {
        if self.unit == other.unit {
            Ok(())
        } else {
            Err(UnitMismatchError {
                expected: self.unit,
                found: other.unit,
            })
        }
    }

    pub fn checked_add(self, other: StepCount) -> Result<StepCount, UnitMismatchError> {
        self.same_unit(&other)?;
        Ok(StepCount::new(self.unit, self.steps.saturating_add(other.steps)))
    }

    /// Saturates at zero.
    pub fn checked_sub(self, other: StepCount) -> Result<StepCount, UnitMismatchError> {
        self.same_unit(&other)?;
        Ok(StepCount::new(self.unit, self.steps.saturating_sub(other.steps)))
    }

    pub fn try_cmp(&self, other: &StepCount) -> Result<Ordering, UnitMismatchError> {
        self.same_unit(other)?;
        Ok(self.steps.cmp(&other.steps))
    }
}

impl fmt::Display for StepCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.steps, self.unit)
    }
}

/// Running totals per unit. Totals never decrease.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCounter {
    totals: BTreeMap<StepUnit, u64>,
}

impl StepCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, unit: StepUnit) -> u64 {
        self.totals.get(&unit).copied().unwrap_or(0)
    }

    pub fn count(&self, unit: StepUnit) -> StepCount {
        StepCount::new(unit, self.get(unit))
    }

    pub fn add(&mut self, count: StepCount) {
        let total = self.totals.entry(count.unit).or_insert(0);
        *total = total.saturating_add(count.steps);
    }

    /// The mark a loop runs until: the current total of the budget's unit
    /// plus the budget.
    pub fn target(&self, budget: StepCount) -> StepCount {
        StepCount::new(budget.unit, self.get(budget.unit).saturating_add(budget.steps))
    }

    pub fn reached(&self, target: StepCount) -> bool {
        self.get(target.unit) >= target.steps
    }

    /// Raises every total to at least the matching total in `other`.
    pub fn catch_up(&mut self, other: &StepCounter) {
        for (unit, steps) in &other.totals {
            let total = self.totals.entry(*unit).or_insert(0);
            *total = (*total).max(*steps);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_same_unit() {
        let total = StepCount::env_steps(80)
            .checked_add(StepCount::env_steps(140))
            .unwrap();
        assert_eq!(total, StepCount::env_steps(220));
    }

    #[test]
    fn test_add_mismatched_units_fails() {
        let err = StepCount::episodes(3)
            .checked_add(StepCount::env_steps(5))
            .unwrap_err();
        assert_eq!(err.expected, StepUnit::EnvironmentEpisodes);
        assert_eq!(err.found, StepUnit::EnvironmentSteps);
    }

    #[test]
    fn test_compare_mismatched_units_fails() {
        let episodes = StepCount::episodes(1);
        let steps = StepCount::env_steps(1);
        assert!(episodes.try_cmp(&steps).is_err());
        assert!(steps.try_cmp(&episodes).is_err());
        assert_eq!(steps.try_cmp(&StepCount::env_steps(2)), Ok(Ordering::Less));
    }

    #[test]
    fn test_sub_saturates() {
        let diff = StepCount::env_steps(10)
            .checked_sub(StepCount::env_steps(25))
            .unwrap();
        assert!(diff.is_zero());
        assert!(StepCount::training_steps(1)
            .checked_sub(StepCount::env_steps(1))
            .is_err());
    }

    #[test]
    fn test_counter_tracks_units_independently() {
        let mut counter = StepCounter::new();
        counter.add(StepCount::env_steps(120));
        counter.add(StepCount::episodes(2));
        counter.add(StepCount::env_steps(30));

        assert_eq!(counter.get(StepUnit::EnvironmentSteps), 150);
        assert_eq!(counter.get(StepUnit::EnvironmentEpisodes), 2);
        assert_eq!(counter.get(StepUnit::TrainingSteps), 0);
    }

    #[test]
    fn test_counter_target_and_reached() {
        let mut counter = StepCounter::new();
        counter.add(StepCount::env_steps(100));

        let end = counter.target(StepCount::env_steps(50));
        assert_eq!(end, StepCount::env_steps(150));
        assert!(!counter.reached(end));

        counter.add(StepCount::env_steps(49));
        assert!(!counter.reached(end));
        counter.add(StepCount::env_steps(1));
        assert!(counter.reached(end));
    }

    #[test]
    fn test_step_count_serde_shape() {
        let json = serde_json::to_string(&StepCount::env_steps(200)).unwrap();
        assert_eq!(json, r#"{"unit":"environment_steps","steps":200}"#);
    }

    #[test]
    fn test_catch_up_never_lowers() {
        let mut counter = StepCounter::new();
        counter.add(StepCount::env_steps(50));
        let mut restored = StepCounter::new();
        restored.add(StepCount::env_steps(30));
        restored.add(StepCount::training_steps(4));

        counter.catch_up(&restored);
        assert_eq!(counter.get(StepUnit::EnvironmentSteps), 50);
        assert_eq!(counter.get(StepUnit::TrainingSteps), 4);
    }
}
