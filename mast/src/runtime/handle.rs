use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::RoleError;
use crate::run::{RunReport, TaskSpec};
use crate::runtime::error::ClusterError;

pub(crate) type ReportReceiver = oneshot::Receiver<Result<RunReport, RoleError>>;

/// A role running on the local runtime. Resolves to the role's report once
/// its loop is over.
pub struct RoleHandle {
    id: Uuid,
    task: TaskSpec,
    receiver: ReportReceiver,
}

impl fmt::Debug for RoleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoleHandle")
            .field("id", &self.id)
            .field("task", &self.task)
            .finish()
    }
}

impl RoleHandle {
    pub(crate) fn new(id: Uuid, task: TaskSpec, receiver: ReportReceiver) -> Self {
        Self { id, task, receiver }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn task(&self) -> TaskSpec {
        self.task
    }
}

impl Future for RoleHandle {
    type Output = Result<RunReport, ClusterError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| match received {
                Ok(report) => report.map_err(ClusterError::from),
                Err(closed) => Err(closed.into()),
            })
    }
}
