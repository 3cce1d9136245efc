pub mod counter;
pub mod metrics;
pub mod phase;

pub use counter::{StepCount, StepCounter, StepUnit, UnitMismatchError};
pub use metrics::{EpisodeSummary, PhaseMetrics, RunMetrics};
pub use phase::{PhaseGuard, RunPhase};
