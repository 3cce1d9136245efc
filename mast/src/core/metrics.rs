use super::phase::RunPhase;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome of one finished episode as seen by the role that ran it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSummary {
    pub phase: RunPhase,
    pub policy_id: u64,
    pub total_reward: f32,
    pub length: u64,
    pub env_steps: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseMetrics {
    pub episodes: u64,
    pub env_steps: u64,
    pub total_reward: f64,
}

impl PhaseMetrics {
    pub fn mean_reward(&self) -> Option<f64> {
        (self.episodes > 0).then(|| self.total_reward / self.episodes as f64)
    }
}

/// Episode accounting keyed by the phase the episode ran under.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    phases: BTreeMap<RunPhase, PhaseMetrics>,
}

impl RunMetrics {
    pub fn record(&mut self, summary: &EpisodeSummary) {
        let entry = self.phases.entry(summary.phase).or_default();
        entry.episodes += 1;
        entry.env_steps += summary.env_steps;
        entry.total_reward += f64::from(summary.total_reward);
    }

    pub fn phase(&self, phase: RunPhase) -> PhaseMetrics {
        self.phases.get(&phase).copied().unwrap_or_default()
    }
}
