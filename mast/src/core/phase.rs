use serde::{Deserialize, Serialize};
use std::fmt;

/// Which kind of work a process is currently attributing its episodes to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    #[default]
    Train,
    Test,
}

impl RunPhase {
    /// Switch to `phase` until the returned guard is dropped.
    pub fn enter(&mut self, phase: RunPhase) -> PhaseGuard<'_> {
        let prior = std::mem::replace(self, phase);
        PhaseGuard { slot: self, prior }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Train => f.write_str("train"),
            RunPhase::Test => f.write_str("test"),
        }
    }
}

/// Restores the prior phase on drop.
#[derive(Debug)]
pub struct PhaseGuard<'a> {
    slot: &'a mut RunPhase,
    prior: RunPhase,
}

impl PhaseGuard<'_> {
    pub fn current(&self) -> RunPhase {
        *self.slot
    }

    pub fn prior(&self) -> RunPhase {
        self.prior
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        *self.slot = self.prior;
    }
}
