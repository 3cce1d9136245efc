use crate::core::RunPhase;
use crate::env::Environment;
use crate::error::RoleError;
use crate::learner::Model;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpisodeOutcome {
    pub total_reward: f32,
    /// Decisions taken.
    pub length: u64,
    /// Environment steps consumed, counting repeated frames.
    pub env_steps: u64,
    /// Cut off by the step cap before the environment finished.
    pub truncated: bool,
}

/// Plays one full episode from reset.
pub fn run_episode(
    env: &mut dyn Environment,
    model: &mut dyn Model,
    phase: RunPhase,
    max_steps: Option<u64>,
) -> Result<EpisodeOutcome, RoleError> {
    let frames = env.frames_per_step().max(1);
    let mut total_reward = 0.0;
    let mut length = 0;
    let mut obs = env.reset()?;

    loop {
        let action = model.act(&obs, phase)?;
        let (next_obs, reward, done) = env.step(&action)?;
        total_reward += reward;
        length += 1;

        let truncated = !done && max_steps.is_some_and(|max| length >= max);
        if done || truncated {
            return Ok(EpisodeOutcome {
                total_reward,
                length,
                env_steps: length * frames,
                truncated,
            });
        }
        obs = next_obs;
    }
}
