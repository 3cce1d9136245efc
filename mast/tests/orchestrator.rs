mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{ClosingEnv, FixedEnv, ScriptedModel, episode, fast_timing};
use mast::checkpoint::CheckpointConfig;
use mast::config::{EvaluatorConfig, RunConfig, TrainerConfig};
use mast::control::{FileStore, MemoryStore, PolicyVersion, SharedStore, TerminationReason};
use mast::core::{StepCount, StepUnit};
use mast::run::RoleOutcome;
use mast::runtime::{ClusterLayout, ComponentFactory, LocalCluster};
use mast::env::Environment;
use mast::learner::Model;
use mast::{RoleError, RoleKind, RunOrchestrator, TaskSpec};
use tempfile::tempdir;

fn config_for(task: TaskSpec) -> RunConfig {
    RunConfig {
        task,
        timing: fast_timing(),
        ..RunConfig::default()
    }
}

#[tokio::test]
async fn test_actor_without_environment_is_rejected() {
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    let err = RunOrchestrator::new(
        config_for(TaskSpec::actor(0)),
        store,
        Box::new(ScriptedModel::new()),
        None,
    )
    .err()
    .unwrap();
    assert!(matches!(err, RoleError::MissingEnvironment(RoleKind::Actor)));
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    let mut config = config_for(TaskSpec::trainer());
    config.trainer.num_consecutive_playing_steps = StepCount::training_steps(3);
    let err = RunOrchestrator::new(config, store, Box::new(ScriptedModel::new()), None)
        .err()
        .unwrap();
    assert!(matches!(err, RoleError::Config(_)));
}

#[tokio::test]
async fn test_sync_and_should_stop() {
    let store = Arc::new(MemoryStore::new());
    let mut orchestrator = RunOrchestrator::new(
        config_for(TaskSpec::evaluator(0)),
        store.clone(),
        Box::new(ScriptedModel::new()),
        Some(Box::new(FixedEnv::new(3, 1.0))),
    )
    .unwrap();

    assert!(!orchestrator.sync().await.unwrap());
    store.save_policy(&PolicyVersion::new(0, vec![])).await.unwrap();
    assert!(orchestrator.sync().await.unwrap());
    assert!(!orchestrator.sync().await.unwrap());

    assert!(!orchestrator.should_stop().await.unwrap());
    store
        .signal_end_of_run(&mast::control::RunTermination::new(
            TerminationReason::TrainingBudgetExhausted {
                training_steps: 3,
                policy_id: 0,
            },
            "trainer-0",
        ))
        .await
        .unwrap();
    assert!(orchestrator.should_stop().await.unwrap());
}

#[tokio::test]
async fn test_evaluations_bounded_by_max_iterations() {
    let store = Arc::new(MemoryStore::new());
    store.save_policy(&PolicyVersion::new(0, vec![])).await.unwrap();
    let mut config = config_for(TaskSpec::evaluator(0));
    config.evaluator = EvaluatorConfig {
        evaluation_steps: StepCount::episodes(2),
        max_iterations: Some(3),
        success_reward_threshold: 100.0,
        ..EvaluatorConfig::default()
    };
    let orchestrator = RunOrchestrator::new(
        config,
        store.clone(),
        Box::new(ScriptedModel::new()),
        Some(Box::new(FixedEnv::new(3, 1.0))),
    )
    .unwrap();

    let report = orchestrator.run().await.unwrap();
    assert_eq!(
        report.outcome,
        RoleOutcome::Evaluated {
            iterations: 3,
            should_stop: false
        }
    );
    assert_eq!(report.counter.get(StepUnit::EnvironmentEpisodes), 6);
    assert!(report.termination.is_none());
}

#[tokio::test]
async fn test_run_closes_environment() {
    let store = Arc::new(MemoryStore::new());
    store.save_policy(&PolicyVersion::new(0, vec![])).await.unwrap();

    let mut actor_config = config_for(TaskSpec::actor(0));
    actor_config.actor.steps_to_act = StepCount::env_steps(6);
    let mut evaluator_config = config_for(TaskSpec::evaluator(0));
    evaluator_config.evaluator.max_iterations = Some(1);
    evaluator_config.evaluator.evaluation_steps = StepCount::episodes(1);

    for config in [actor_config, evaluator_config] {
        let task = config.task;
        let env = ClosingEnv::new(3, 1.0);
        let closed = Arc::clone(&env.closed);
        let orchestrator = RunOrchestrator::new(
            config,
            store.clone(),
            Box::new(ScriptedModel::new()),
            Some(Box::new(env)),
        )
        .unwrap();
        assert!(!closed.load(Ordering::SeqCst));
        orchestrator.run().await.unwrap();
        assert!(closed.load(Ordering::SeqCst), "{task} left its environment open");
    }
}

fn actor_process(store_root: &std::path::Path, episode_len: u64, steps: u64) -> RunOrchestrator {
    let store: Arc<dyn SharedStore> = Arc::new(
        FileStore::open(store_root)
            .unwrap()
            .with_poll_interval(Duration::from_millis(5)),
    );
    let mut config = config_for(TaskSpec::actor(0));
    config.actor.steps_to_act = StepCount::env_steps(steps);
    RunOrchestrator::new(
        config,
        store,
        Box::new(ScriptedModel::new()),
        Some(Box::new(FixedEnv::new(episode_len, 0.0))),
    )
    .unwrap()
}

#[tokio::test]
async fn test_restarted_actor_keeps_unconsumed_episodes() {
    let store_dir = tempdir().unwrap();
    let store = FileStore::open(store_dir.path())
        .unwrap()
        .with_poll_interval(Duration::from_millis(5));
    store.save_policy(&PolicyVersion::new(0, vec![])).await.unwrap();

    actor_process(store_dir.path(), 3, 6).run().await.unwrap();
    // Same actor index, new process, nothing consumed in between.
    actor_process(store_dir.path(), 5, 5).run().await.unwrap();

    let mut received = Vec::new();
    for _ in 0..3 {
        let e = tokio::time::timeout(Duration::from_secs(2), store.next_episode())
            .await
            .expect("episode lost")
            .unwrap();
        received.push((e.episode_id(), e.length()));
    }
    assert_eq!(received, vec![(0, 3), (1, 3), (2, 5)]);
    assert!(
        tokio::time::timeout(Duration::from_millis(50), store.next_episode())
            .await
            .is_err()
    );
}

fn trainer_process(store_root: &std::path::Path, config: &RunConfig) -> RunOrchestrator {
    let store: Arc<dyn SharedStore> = Arc::new(
        FileStore::open(store_root)
            .unwrap()
            .with_poll_interval(Duration::from_millis(5)),
    );
    RunOrchestrator::new(config.clone(), store, Box::new(ScriptedModel::new()), None).unwrap()
}

#[tokio::test]
async fn test_trainer_restart_resumes_from_checkpoint() {
    let store_dir = tempdir().unwrap();
    let checkpoint_dir = tempdir().unwrap();
    let store = FileStore::open(store_dir.path()).unwrap();

    let mut config = config_for(TaskSpec::trainer());
    config.trainer = TrainerConfig {
        training_steps: StepCount::training_steps(1),
        num_consecutive_playing_steps: StepCount::env_steps(10),
        publish_policy_every_num_fetched_steps: StepCount::env_steps(10),
        signal_end_on_budget: false,
        checkpoint: Some(CheckpointConfig::new(checkpoint_dir.path())),
        ..TrainerConfig::default()
    };

    let mut first = trainer_process(store_dir.path(), &config);
    assert!(first.sync().await.unwrap());
    drop(first);
    assert_eq!(store.latest_policy_id().await.unwrap(), Some(0));

    // Every iteration is a fresh trainer process that trains one step.
    let mut last = None;
    for n in 0..3 {
        let policy = store.latest_policy_id().await.unwrap().unwrap();
        store.publish_episode(&episode(0, n, policy, 10)).await.unwrap();
        last = Some(trainer_process(store_dir.path(), &config).run().await.unwrap());
    }

    let report = last.unwrap();
    let RoleOutcome::Trained(stats) = report.outcome else {
        panic!("trainer reported {:?}", report.outcome);
    };
    assert_eq!(stats.final_policy_id, 3);
    assert_eq!(store.latest_policy_id().await.unwrap(), Some(3));
    assert_eq!(report.counter.get(StepUnit::TrainingSteps), 3);
    assert_eq!(report.counter.get(StepUnit::EnvironmentSteps), 30);
    assert!(std::fs::read_dir(checkpoint_dir.path()).unwrap().count() > 0);
}

struct Factory;

impl ComponentFactory for Factory {
    fn model(&self, _task: &TaskSpec) -> Result<Box<dyn Model>, RoleError> {
        Ok(Box::new(ScriptedModel::new()))
    }

    fn environment(&self, _task: &TaskSpec) -> Result<Box<dyn Environment>, RoleError> {
        Ok(Box::new(FixedEnv::new(5, 1.0)))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_local_cluster_runs_until_evaluator_succeeds() {
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    let mut config = RunConfig {
        timing: fast_timing(),
        ..RunConfig::default()
    };
    config.actor.steps_to_act = StepCount::env_steps(u64::MAX / 2);
    config.actor.policy_check_interval = 5;
    config.trainer.training_steps = StepCount::training_steps(u64::MAX / 2);
    config.trainer.num_consecutive_playing_steps = StepCount::env_steps(20);
    config.trainer.publish_policy_every_num_fetched_steps = StepCount::env_steps(20);
    config.evaluator = EvaluatorConfig {
        evaluation_steps: StepCount::episodes(3),
        success_reward_threshold: 5.0,
        target_success_rate: 1.0,
        ..EvaluatorConfig::default()
    };

    let layout = ClusterLayout {
        actors: 2,
        evaluators: 1,
    };
    let cluster = LocalCluster::launch(&config, layout, store.clone(), &Factory).unwrap();
    assert_eq!(cluster.handles().len(), 4);

    let results = tokio::time::timeout(Duration::from_secs(20), cluster.join())
        .await
        .expect("cluster did not finish");

    for (task, result) in &results {
        let report = result.as_ref().unwrap_or_else(|e| panic!("{task} failed: {e}"));
        assert!(report.termination.is_some(), "{task} saw no termination");
        match (&task.role, &report.outcome) {
            (RoleKind::Actor, RoleOutcome::Acted(stats)) => {
                assert!(stats.stopped_by_end_of_run)
            }
            (RoleKind::Trainer, RoleOutcome::Trained(stats)) => {
                assert!(!stats.budget_exhausted)
            }
            (RoleKind::Evaluator, RoleOutcome::Evaluated { should_stop, .. }) => {
                assert!(*should_stop)
            }
            (role, outcome) => panic!("{role} reported {outcome:?}"),
        }
    }
    let termination = store.run_termination().await.unwrap().unwrap();
    assert!(matches!(
        termination.reason,
        TerminationReason::SuccessRateReached { .. }
    ));
}
