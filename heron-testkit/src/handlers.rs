use std::sync::Arc;

use async_trait::async_trait;
use heron::{Authentication, HandlerContext, JobHandler, JobId};
use parking_lot::Mutex;

/// What a [`ScriptedHandler`] does on its next execution.
#[derive(Clone, Debug)]
pub enum HandlerBehavior {
    Succeed,
    Fail { message: String },
    Panic { message: String },
}

/// One recorded handler invocation.
#[derive(Clone, Debug)]
pub struct HandlerCall {
    pub job_id: JobId,
    pub job_kind: String,
    pub auth: Option<Authentication>,
}

/// Handler whose outcome is scripted by the test and which records every
/// invocation, including the authentication it observed.
#[derive(Clone)]
pub struct ScriptedHandler {
    calls: Arc<Mutex<Vec<HandlerCall>>>,
    behavior: Arc<Mutex<HandlerBehavior>>,
}

impl ScriptedHandler {
    pub fn succeeding() -> Self {
        Self::with_behavior(HandlerBehavior::Succeed)
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_behavior(HandlerBehavior::Fail {
            message: message.into(),
        })
    }

    pub fn panicking(message: impl Into<String>) -> Self {
        Self::with_behavior(HandlerBehavior::Panic {
            message: message.into(),
        })
    }

    pub fn with_behavior(behavior: HandlerBehavior) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            behavior: Arc::new(Mutex::new(behavior)),
        }
    }

    /// Change the scripted outcome for subsequent executions.
    pub fn set_behavior(&self, behavior: HandlerBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// All invocations seen so far.
    pub fn calls(&self) -> Vec<HandlerCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl JobHandler for ScriptedHandler {
    async fn execute(&self, ctx: &HandlerContext) -> anyhow::Result<()> {
        self.calls.lock().push(HandlerCall {
            job_id: ctx.job.id,
            job_kind: ctx.job.kind.clone(),
            auth: ctx.auth.clone(),
        });

        let behavior = self.behavior.lock().clone();
        match behavior {
            HandlerBehavior::Succeed => Ok(()),
            HandlerBehavior::Fail { message } => anyhow::bail!(message),
            HandlerBehavior::Panic { message } => panic!("{message}"),
        }
    }
}

/// Handler that marks a meter on every execution, standing in for job logic
/// that counts its own activity.
pub struct MeterMarkingHandler {
    meter_name: String,
    times: i64,
}

impl MeterMarkingHandler {
    pub fn new(meter_name: impl Into<String>, times: i64) -> Self {
        Self {
            meter_name: meter_name.into(),
            times,
        }
    }
}

#[async_trait]
impl JobHandler for MeterMarkingHandler {
    async fn execute(&self, ctx: &HandlerContext) -> anyhow::Result<()> {
        ctx.meters.mark_times(&self.meter_name, self.times);
        Ok(())
    }
}
