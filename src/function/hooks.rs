use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::debug;

use super::{FunctionError, panic_message};
use crate::pipeline::error::PipelineError;

/// Optional hooks a function runs around the lifetime of one call.
///
/// Both default to doing nothing.
#[async_trait]
pub trait LifecycleHooks: Send + Sync {
    async fn init(&self) -> Result<(), FunctionError> {
        Ok(())
    }

    async fn destroy(&self) -> Result<(), FunctionError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    Init,
    Destroy,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hook::Init => f.write_str("init"),
            Hook::Destroy => f.write_str("destroy"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HookError {
    #[error("the {hook} hook took too long to run, aborting now")]
    Timeout { hook: Hook },

    #[error("the {hook} hook failed: {message}")]
    Runtime { hook: Hook, message: String },
}

impl From<HookError> for PipelineError {
    fn from(err: HookError) -> Self {
        match err {
            HookError::Timeout { hook } => PipelineError::HookTimeout { hook },
            HookError::Runtime { hook, message } => {
                PipelineError::HookRuntimeError { hook, message }
            }
        }
    }
}

/// Runs lifecycle hooks under a deadline, turning errors and panics into [`HookError`]s.
#[derive(Debug, Clone, Copy)]
pub struct HookRunner {
    timeout: Duration,
}

impl HookRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn run_init(&self, hooks: Option<&Arc<dyn LifecycleHooks>>) -> Result<(), HookError> {
        match hooks {
            Some(hooks) => self.run(Hook::Init, hooks.init()).await,
            None => Ok(()),
        }
    }

    pub async fn run_destroy(
        &self,
        hooks: Option<&Arc<dyn LifecycleHooks>>,
    ) -> Result<(), HookError> {
        match hooks {
            Some(hooks) => self.run(Hook::Destroy, hooks.destroy()).await,
            None => Ok(()),
        }
    }

    async fn run(
        &self,
        hook: Hook,
        fut: BoxFuture<'_, Result<(), FunctionError>>,
    ) -> Result<(), HookError> {
        debug!(%hook, timeout_ms = self.timeout.as_millis() as u64, "Running hook");

        match tokio::time::timeout(self.timeout, AssertUnwindSafe(fut).catch_unwind()).await {
            Err(_elapsed) => Err(HookError::Timeout { hook }),
            Ok(Err(panic)) => Err(HookError::Runtime {
                hook,
                message: panic_message(panic.as_ref()),
            }),
            Ok(Ok(Err(err))) => Err(HookError::Runtime {
                hook,
                message: err.message,
            }),
            Ok(Ok(Ok(()))) => Ok(()),
        }
    }
}
