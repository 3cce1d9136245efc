#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use mast::config::TimingConfig;
use mast::control::{
    MemoryStore, PolicyId, PolicyVersion, RunTermination, SharedStore, StoreError,
};
use mast::core::RunPhase;
use mast::env::{Action, EnvError, Environment, Episode, Observation, Transition};
use mast::learner::{Model, ModelError, TrainMetrics};
use mast::{RoleContext, TaskSpec};

pub fn episode(task_id: u32, episode_id: u64, policy_id: PolicyId, len: usize) -> Episode {
    let t = Transition {
        state: vec![0.0],
        action: Action::Discrete(0),
        reward: 0.0,
        next_state: vec![0.0],
        done: false,
    };
    Episode::new(task_id, episode_id, policy_id, vec![t; len]).unwrap()
}

pub fn fast_timing() -> TimingConfig {
    TimingConfig {
        sync_poll_ms: 5,
        idle_wait_ms: 20,
        retry_backoff_ms: 5,
        store_poll_ms: 5,
        setup_retries: 5,
    }
}

pub fn context(task: TaskSpec, store: Arc<dyn SharedStore>) -> RoleContext {
    RoleContext::new(task, store, fast_timing())
}

/// A model that learns nothing. Each update appends a byte to its weights
/// and the episode lengths of every batch are recorded.
#[derive(Clone, Default)]
pub struct ScriptedModel {
    pub weights: Vec<u8>,
    pub batches: Arc<Mutex<Vec<Vec<u64>>>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_lengths(&self) -> Vec<Vec<u64>> {
        self.batches.lock().unwrap().clone()
    }
}

impl Model for ScriptedModel {
    fn act(&mut self, _obs: &Observation, _phase: RunPhase) -> Result<Action, ModelError> {
        Ok(Action::Discrete(1))
    }

    fn train(&mut self, batch: &[Episode]) -> Result<TrainMetrics, ModelError> {
        let lengths = batch.iter().map(Episode::length).collect();
        let mut batches = self.batches.lock().unwrap();
        batches.push(lengths);
        self.weights.push(batches.len() as u8);
        Ok(TrainMetrics::with_loss(0.0))
    }

    fn get_weights(&self) -> Result<Vec<u8>, ModelError> {
        Ok(self.weights.clone())
    }

    fn set_weights(&mut self, weights: &[u8]) -> Result<(), ModelError> {
        self.weights = weights.to_vec();
        Ok(())
    }
}

/// Episodes of `len` steps, each step paying `reward`.
pub struct FixedEnv {
    len: u64,
    reward: f32,
    t: u64,
}

impl FixedEnv {
    pub fn new(len: u64, reward: f32) -> Self {
        Self { len, reward, t: 0 }
    }
}

impl Environment for FixedEnv {
    fn reset(&mut self) -> Result<Observation, EnvError> {
        self.t = 0;
        Ok(vec![0.0])
    }

    fn step(&mut self, _act: &Action) -> Result<(Observation, f32, bool), EnvError> {
        self.t += 1;
        Ok((vec![self.t as f32], self.reward, self.t >= self.len))
    }
}

/// A [`FixedEnv`] that records whether it was closed.
pub struct ClosingEnv {
    pub inner: FixedEnv,
    pub closed: Arc<AtomicBool>,
}

impl ClosingEnv {
    pub fn new(len: u64, reward: f32) -> Self {
        Self {
            inner: FixedEnv::new(len, reward),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Environment for ClosingEnv {
    fn reset(&mut self) -> Result<Observation, EnvError> {
        self.inner.reset()
    }

    fn step(&mut self, act: &Action) -> Result<(Observation, f32, bool), EnvError> {
        self.inner.step(act)
    }

    fn close(&mut self) -> Result<(), EnvError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Never finishes an episode on its own.
pub struct EndlessEnv;

impl Environment for EndlessEnv {
    fn reset(&mut self) -> Result<Observation, EnvError> {
        Ok(vec![0.0])
    }

    fn step(&mut self, _act: &Action) -> Result<(Observation, f32, bool), EnvError> {
        Ok((vec![0.0], 0.0, false))
    }
}

/// A memory store whose next `failing_saves` policy saves fail as if the
/// backend were unreachable.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub failing_saves: AtomicUsize,
}

impl FlakyStore {
    pub fn fail_next_saves(&self, n: usize) {
        self.failing_saves.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl SharedStore for FlakyStore {
    async fn publish_episode(&self, episode: &Episode) -> Result<(), StoreError> {
        self.inner.publish_episode(episode).await
    }

    async fn next_episode_id(&self, task_id: u32) -> Result<u64, StoreError> {
        self.inner.next_episode_id(task_id).await
    }

    async fn next_episode(&self) -> Result<Episode, StoreError> {
        self.inner.next_episode().await
    }

    async fn latest_policy_id(&self) -> Result<Option<PolicyId>, StoreError> {
        self.inner.latest_policy_id().await
    }

    async fn load_latest_policy(&self) -> Result<Option<PolicyVersion>, StoreError> {
        self.inner.load_latest_policy().await
    }

    async fn save_policy(&self, policy: &PolicyVersion) -> Result<(), StoreError> {
        let failing = self
            .failing_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(StoreError::Unavailable("scripted outage".to_string()));
        }
        self.inner.save_policy(policy).await
    }

    async fn signal_end_of_run(&self, termination: &RunTermination) -> Result<(), StoreError> {
        self.inner.signal_end_of_run(termination).await
    }

    async fn run_termination(&self) -> Result<Option<RunTermination>, StoreError> {
        self.inner.run_termination().await
    }
}
