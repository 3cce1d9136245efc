use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{Instrument, error, info_span};
use uuid::Uuid;

use crate::config::RunConfig;
use crate::control::SharedStore;
use crate::env::Environment;
use crate::error::RoleError;
use crate::learner::Model;
use crate::run::{RoleKind, RunOrchestrator, RunReport, TaskSpec};
use crate::runtime::error::ClusterError;
use crate::runtime::handle::RoleHandle;

/// Builds the collaborators for each role a cluster starts.
pub trait ComponentFactory {
    fn model(&self, task: &TaskSpec) -> Result<Box<dyn Model>, RoleError>;
    fn environment(&self, task: &TaskSpec) -> Result<Box<dyn Environment>, RoleError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterLayout {
    pub actors: u32,
    pub evaluators: u32,
}

impl Default for ClusterLayout {
    fn default() -> Self {
        Self {
            actors: 2,
            evaluators: 1,
        }
    }
}

/// Runs roles as tokio tasks of this process, all coordinating through one
/// store exactly as separate processes would.
pub struct LocalCluster {
    store: Arc<dyn SharedStore>,
    handles: Vec<RoleHandle>,
}

impl LocalCluster {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self {
            store,
            handles: Vec::new(),
        }
    }

    /// One trainer plus the actors and evaluators of `layout`, each with
    /// `config` retargeted at its own task.
    pub fn launch(
        config: &RunConfig,
        layout: ClusterLayout,
        store: Arc<dyn SharedStore>,
        factory: &dyn ComponentFactory,
    ) -> Result<Self, RoleError> {
        let mut cluster = Self::new(store);
        let tasks = std::iter::once(TaskSpec::trainer())
            .chain((0..layout.actors).map(TaskSpec::actor))
            .chain((0..layout.evaluators).map(TaskSpec::evaluator));
        for task in tasks {
            let mut role_config = config.clone();
            role_config.task = task;
            cluster.spawn(role_config, factory)?;
        }
        Ok(cluster)
    }

    /// Starts the role named by `config.task`.
    pub fn spawn(
        &mut self,
        config: RunConfig,
        factory: &dyn ComponentFactory,
    ) -> Result<Uuid, RoleError> {
        let task = config.task;
        let model = factory.model(&task)?;
        let env = match task.role {
            RoleKind::Trainer => None,
            RoleKind::Actor | RoleKind::Evaluator => Some(factory.environment(&task)?),
        };
        let orchestrator = RunOrchestrator::new(config, Arc::clone(&self.store), model, env)?;

        let id = Uuid::new_v4();
        let (sender, receiver) = oneshot::channel();
        let span = info_span!("role", task = %task, id = %id);
        tokio::spawn(
            async move {
                let result = orchestrator.run().await;
                if let Err(e) = &result {
                    error!(error = %e, "role failed");
                }
                let _ = sender.send(result);
            }
            .instrument(span),
        );

        self.handles.push(RoleHandle::new(id, task, receiver));
        Ok(id)
    }

    pub fn handles(&self) -> &[RoleHandle] {
        &self.handles
    }

    /// Waits for every role to finish.
    pub async fn join(self) -> Vec<(TaskSpec, Result<RunReport, ClusterError>)> {
        futures::future::join_all(self.handles.into_iter().map(|handle| async move {
            let task = handle.task();
            (task, handle.await)
        }))
        .await
    }
}
