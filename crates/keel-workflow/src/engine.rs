//! Stage-table workflow engine
//!
//! A workflow is a struct holding its inputs plus a `Stage` enum. Every
//! stage maps to a pair of plain function pointers through an exhaustive
//! `match` in [`Stage::handlers`]: one receives the payload of the work
//! that finished successfully, the other the reason it failed. A handler
//! answers with a [`Transition`]: schedule more work and wait on another
//! stage, complete, or fail.
//!
//! ```text
//!   INIT ──on_success(Null)──▶ Next { stage: A, work }
//!                                 │ set_stage(A); work.await
//!                   ┌─────────────┴─────────────┐
//!            A.on_success(payload)        A.on_failure(reason)
//!                   ▼                            ▼
//!             Next / Complete               Next / Fail
//! ```
//!
//! Runtime errors while recording a stage or a completion are delivered to
//! the failure handler of that stage like any failed work.

use std::fmt;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, warn};

use crate::runtime::{TaskId, TaskRuntime};
use crate::{Error, Result};

/// Data handed from a finished piece of work to the next stage
pub type Payload = Value;

/// Work scheduled by a handler; its result is delivered to the next stage
pub type Work<'a> = BoxFuture<'a, Result<Payload>>;

/// Success handler: workflow and the payload of the work that finished
pub type OnSuccess<W, S> = for<'a> fn(&'a W, Payload) -> BoxFuture<'a, Transition<'a, S>>;

/// Failure handler: workflow and the reason the work failed
pub type OnFailure<W, S> = for<'a> fn(&'a W, String) -> BoxFuture<'a, Transition<'a, S>>;

/// What a handler wants the engine to do next
pub enum Transition<'a, S> {
    /// Persist `stage`, run `work` and deliver its result to `stage`
    Next {
        /// Stage that receives the work's result
        stage: S,
        /// Work to run
        work: Work<'a>,
    },
    /// Task finished successfully
    Complete(Payload),
    /// Task stops here
    Fail(String),
}

impl<'a, S> Transition<'a, S> {
    /// Shorthand for [`Transition::Next`]
    pub fn next(stage: S, work: Work<'a>) -> Self {
        Transition::Next { stage, work }
    }

    /// Complete without a payload
    pub fn done() -> Self {
        Transition::Complete(Value::Null)
    }
}

impl<S: fmt::Debug> fmt::Debug for Transition<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Next { stage, .. } => f.debug_struct("Next").field("stage", stage).finish(),
            Transition::Complete(payload) => f.debug_tuple("Complete").field(payload).finish(),
            Transition::Fail(reason) => f.debug_tuple("Fail").field(reason).finish(),
        }
    }
}

/// Success and failure handler of one stage
pub struct Handlers<W, S> {
    /// Called with the payload when the stage's work succeeded
    pub on_success: OnSuccess<W, S>,
    /// Called with the reason when the stage's work failed
    pub on_failure: OnFailure<W, S>,
}

/// A workflow's stage enum
pub trait Stage<W>: Copy + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Entry stage; its success handler runs first with a null payload
    const INIT: Self;

    /// Handler pair for this stage
    fn handlers(self) -> Handlers<W, Self>;
}

/// A runnable workflow
pub trait Workflow: Send + Sync + Sized {
    /// Stage enum of this workflow
    type Stage: Stage<Self>;

    /// Task identity of this run
    fn task(&self) -> &TaskId;

    /// Runtime the run reports to
    fn runtime(&self) -> &dyn TaskRuntime;
}

/// Drive `workflow` from its init stage until it completes or fails
pub async fn run_workflow<W: Workflow>(workflow: &W) -> Result<Payload> {
    let runtime = workflow.runtime();
    let task = workflow.task();
    let _guard = runtime.begin(task).await?;

    let mut stage = <W::Stage as Stage<W>>::INIT;
    let mut outcome: std::result::Result<Payload, String> = Ok(Value::Null);
    let mut completion_failed = false;

    loop {
        let handlers = stage.handlers();
        let transition = match outcome {
            Ok(payload) => (handlers.on_success)(workflow, payload).await,
            Err(reason) => (handlers.on_failure)(workflow, reason).await,
        };

        match transition {
            Transition::Next { stage: next, work } => {
                outcome = match runtime.set_stage(task, &next.to_string()).await {
                    Ok(()) => work.await.map_err(|e| e.to_string()),
                    Err(e) => {
                        warn!(task = %task, stage = %next, error = %e, "failed to record stage");
                        Err(e.to_string())
                    }
                };
                stage = next;
            }
            Transition::Complete(payload) => match runtime.stage_complete(task).await {
                Ok(()) => {
                    debug!(task = %task, stage = %stage, "workflow complete");
                    return Ok(payload);
                }
                // the failure handler gets one chance; a second refusal ends the run
                Err(e) if !completion_failed => {
                    warn!(task = %task, stage = %stage, error = %e, "failed to record completion");
                    completion_failed = true;
                    outcome = Err(e.to_string());
                }
                Err(e) => return Err(e),
            },
            Transition::Fail(reason) => {
                if let Err(e) = runtime.stage_failed(task, &reason).await {
                    warn!(task = %task, stage = %stage, error = %e, "failed to record failure");
                }
                return Err(Error::WorkflowFailed {
                    task: task.to_string(),
                    stage: stage.to_string(),
                    reason,
                });
            }
        }
    }
}

/// Run `workflow` as a sub-task; used as the [`Work`] of a parent stage
pub fn subflow<'a, W: Workflow + 'a>(workflow: W) -> Work<'a> {
    async move { run_workflow(&workflow).await }.boxed()
}

/// Wrap plain async work
pub fn work<'a, F>(fut: F) -> Work<'a>
where
    F: std::future::Future<Output = Result<Payload>> + Send + 'a,
{
    fut.boxed()
}
