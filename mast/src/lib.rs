//! Coordination of distributed reinforcement-learning runs.
//!
//! Actors, a trainer and evaluators never talk to each other. They exchange
//! versioned policies, tagged episodes and a single end-of-run signal through
//! a [`control::SharedStore`], each looping at its own pace.

pub mod checkpoint;
pub mod config;
pub mod control;
pub mod core;
pub mod env;
pub mod error;
pub mod learner;
pub mod roles;
pub mod run;
pub mod runtime;

pub use config::RunConfig;
pub use error::RoleError;
pub use run::{RoleContext, RoleKind, RunOrchestrator, RunReport, TaskSpec};
