//! The three role loops and the store interactions they share.

mod actor;
mod episode;
mod evaluator;
mod trainer;

pub use actor::{ActStats, ActorRole};
pub use episode::{EpisodeOutcome, run_episode};
pub use evaluator::{EvaluatorRole, SuccessTally};
pub use trainer::{TrainStats, TrainerRole};

use std::future::Future;
use tracing::{info, warn};

use crate::control::{PolicyId, PolicyView, StoreError};
use crate::error::RoleError;
use crate::learner::Model;
use crate::run::RoleContext;

/// Polls the end-of-run signal. A transient store failure reads as "not
/// ended" so the caller simply tries again next iteration.
pub(crate) async fn end_of_run(ctx: &RoleContext) -> Result<bool, RoleError> {
    match ctx.store.end_of_policies().await {
        Ok(ended) => Ok(ended),
        Err(e) if e.is_transient() => {
            warn!(task = %ctx.task, error = %e, "end-of-run check failed");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// Non-blocking policy refresh: loads a strictly newer published policy
/// into `view` and `model`. Returns the adopted id, if any.
pub(crate) async fn refresh_policy(
    ctx: &RoleContext,
    view: &mut PolicyView,
    model: &mut dyn Model,
) -> Result<Option<PolicyId>, RoleError> {
    match ctx.store.attempt_load_policy(view).await {
        Ok(true) => {}
        Ok(false) => return Ok(None),
        Err(e) if e.is_transient() => {
            warn!(task = %ctx.task, error = %e, "policy refresh failed");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    }
    let Some(version) = view.current() else {
        return Ok(None);
    };
    model.set_weights(&version.weights)?;
    info!(
        task = %ctx.task,
        policy_id = version.id,
        loads = view.loads(),
        "loaded policy"
    );
    Ok(Some(version.id))
}

/// Blocks until `view` holds a policy. Returns `None` if the run ends first.
pub(crate) async fn wait_for_policy(
    ctx: &RoleContext,
    view: &mut PolicyView,
    model: &mut dyn Model,
) -> Result<Option<PolicyId>, RoleError> {
    refresh_policy(ctx, view, model).await?;
    loop {
        if let Some(id) = view.id() {
            return Ok(Some(id));
        }
        if end_of_run(ctx).await? {
            return Ok(None);
        }
        tokio::time::sleep(ctx.timing.sync_poll()).await;
        refresh_policy(ctx, view, model).await?;
    }
}

/// Runs a store operation that a role cannot proceed without, retrying
/// transient failures up to `setup_retries` times.
pub(crate) async fn with_setup_retries<T, F, Fut>(
    ctx: &RoleContext,
    operation: &'static str,
    mut attempt: F,
) -> Result<T, RoleError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let attempts = ctx.timing.setup_retries.max(1);
    let mut tried = 0;
    loop {
        tried += 1;
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && tried < attempts => {
                warn!(task = %ctx.task, error = %e, attempt = tried, "cannot {operation} yet");
                tokio::time::sleep(ctx.timing.retry_backoff()).await;
            }
            Err(e) if e.is_transient() => {
                return Err(RoleError::SetupExhausted {
                    operation,
                    attempts: tried,
                    source: e,
                });
            }
            Err(e) => return Err(e.into()),
        }
    }
}
