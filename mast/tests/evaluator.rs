mod common;

use std::sync::Arc;

use common::{EndlessEnv, FixedEnv, ScriptedModel, context};
use mast::config::EvaluatorConfig;
use mast::control::{MemoryStore, PolicyVersion, SharedStore, TerminationReason};
use mast::core::{RunPhase, StepCount, StepUnit};
use mast::env::Environment;
use mast::roles::EvaluatorRole;
use mast::TaskSpec;

fn evaluator(config: EvaluatorConfig, env: impl Environment + 'static) -> EvaluatorRole {
    EvaluatorRole::new(config, Box::new(ScriptedModel::new()), Box::new(env))
}

fn config(episodes: u64, threshold: f32, target_rate: f64) -> EvaluatorConfig {
    EvaluatorConfig {
        evaluation_steps: StepCount::episodes(episodes),
        success_reward_threshold: threshold,
        target_success_rate: target_rate,
        ..EvaluatorConfig::default()
    }
}

async fn store_with_policy(id: u64) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.save_policy(&PolicyVersion::new(id, vec![])).await.unwrap();
    store
}

#[tokio::test]
async fn test_success_signals_end_of_run() {
    let store = store_with_policy(5).await;
    let mut ctx = context(TaskSpec::evaluator(0), store.clone());
    // Four steps paying 0.5 each: every episode scores 2.0.
    let mut evaluator = evaluator(config(5, 2.0, 0.9), FixedEnv::new(4, 0.5));

    let budget = StepCount::episodes(5);
    assert!(evaluator.evaluate(&mut ctx, budget).await.unwrap());
    assert_eq!(evaluator.last_tally().episodes, 5);
    assert_eq!(evaluator.last_tally().successes, 5);

    let termination = store.run_termination().await.unwrap().unwrap();
    assert_eq!(termination.signalled_by, "evaluator-0");
    assert_eq!(
        termination.reason,
        TerminationReason::SuccessRateReached {
            success_rate: 1.0,
            episodes: 5,
            policy_id: 5,
        }
    );
}

#[tokio::test]
async fn test_phase_restored_and_metrics_attributed_to_test() {
    let store = store_with_policy(0).await;
    let mut ctx = context(TaskSpec::evaluator(0), store.clone());
    let mut evaluator = evaluator(config(3, 100.0, 0.9), FixedEnv::new(4, 1.0));

    assert!(
        !evaluator
            .evaluate(&mut ctx, StepCount::episodes(3))
            .await
            .unwrap()
    );
    assert_eq!(ctx.phase, RunPhase::Train);
    let test = ctx.metrics.phase(RunPhase::Test);
    assert_eq!(test.episodes, 3);
    assert_eq!(test.env_steps, 12);
    assert_eq!(test.mean_reward(), Some(4.0));
    assert_eq!(ctx.metrics.phase(RunPhase::Train).episodes, 0);
    assert!(!store.end_of_policies().await.unwrap());
}

#[tokio::test]
async fn test_stop_condition_can_be_disabled() {
    let store = store_with_policy(0).await;
    let mut ctx = context(TaskSpec::evaluator(0), store.clone());
    let mut evaluator = evaluator(
        EvaluatorConfig {
            apply_stop_condition: false,
            ..config(2, 0.0, 0.5)
        },
        FixedEnv::new(2, 1.0),
    );

    assert!(
        !evaluator
            .evaluate(&mut ctx, StepCount::episodes(2))
            .await
            .unwrap()
    );
    assert_eq!(evaluator.last_tally().successes, 2);
    assert!(!store.end_of_policies().await.unwrap());
}

#[tokio::test]
async fn test_min_episodes_guards_early_success() {
    let store = store_with_policy(0).await;
    let mut ctx = context(TaskSpec::evaluator(0), store.clone());
    let mut evaluator = evaluator(
        EvaluatorConfig {
            min_episodes: 10,
            ..config(3, 0.0, 0.5)
        },
        FixedEnv::new(2, 1.0),
    );

    assert!(
        !evaluator
            .evaluate(&mut ctx, StepCount::episodes(3))
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_runaway_episodes_are_truncated() {
    let store = store_with_policy(0).await;
    let mut ctx = context(TaskSpec::evaluator(0), store.clone());
    let mut evaluator = evaluator(
        EvaluatorConfig {
            max_episode_steps: Some(5),
            ..config(1, 1.0, 1.0)
        },
        EndlessEnv,
    );

    evaluator
        .evaluate(&mut ctx, StepCount::env_steps(20))
        .await
        .unwrap();
    assert_eq!(ctx.counter.get(StepUnit::EnvironmentEpisodes), 4);
    assert_eq!(ctx.counter.get(StepUnit::EnvironmentSteps), 20);
}

#[tokio::test]
async fn test_evaluator_follows_newer_policies() {
    let store = store_with_policy(1).await;
    let mut ctx = context(TaskSpec::evaluator(0), store.clone());
    let mut evaluator = evaluator(config(1, 100.0, 1.0), FixedEnv::new(1, 0.0));

    evaluator
        .evaluate(&mut ctx, StepCount::episodes(1))
        .await
        .unwrap();
    store.save_policy(&PolicyVersion::new(4, vec![])).await.unwrap();
    evaluator
        .evaluate(&mut ctx, StepCount::episodes(1))
        .await
        .unwrap();

    assert_eq!(evaluator.policy().id(), Some(4));
    assert_eq!(evaluator.policy().loads(), 2);
}
