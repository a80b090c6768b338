//! The user function as the invoker sees it: a declared parameter count, an interaction model
//! implied by its body, and optional lifecycle hooks.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::channel::Arguments;

pub mod hooks;
pub mod normalize;

pub use hooks::{HookRunner, LifecycleHooks};
pub use normalize::{NormalizedFunction, normalize};

/// The future returned by a streaming function, driven until it settles or the call terminates.
pub type Invocation = BoxFuture<'static, Result<(), FunctionError>>;

pub type RequestReplyFn = dyn Fn(Value) -> Result<Value, FunctionError> + Send + Sync;

/// A failure raised by user code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct FunctionError {
    pub message: String,
}

impl FunctionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A function that consumes its input channels and feeds its output channels.
///
/// `invoke` must not block: it is called once per call, on the task that also routes incoming
/// data, and should hand back an [`Invocation`] future (or spawn its own consumers) instead.
pub trait StreamingFunction: Send + Sync {
    fn invoke(&self, args: Arguments) -> Result<Invocation, FunctionError>;
}

impl<F> StreamingFunction for F
where
    F: Fn(Arguments) -> Result<Invocation, FunctionError> + Send + Sync,
{
    fn invoke(&self, args: Arguments) -> Result<Invocation, FunctionError> {
        self(args)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InteractionModel {
    #[default]
    RequestReply,
    Streaming,
}

impl InteractionModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionModel::RequestReply => "request-reply",
            InteractionModel::Streaming => "streaming",
        }
    }
}

impl fmt::Display for InteractionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
pub enum FunctionBody {
    RequestReply(Arc<RequestReplyFn>),
    Streaming(Arc<dyn StreamingFunction>),
}

/// A user function together with its statically declared descriptor.
#[derive(Clone)]
pub struct UserFunction {
    name: Arc<str>,
    parameter_count: usize,
    body: FunctionBody,
    hooks: Option<Arc<dyn LifecycleHooks>>,
}

impl UserFunction {
    pub fn new(name: impl Into<Arc<str>>, parameter_count: usize, body: FunctionBody) -> Self {
        Self {
            name: name.into(),
            parameter_count,
            body,
            hooks: None,
        }
    }

    /// A single-parameter request-reply function.
    pub fn request_reply<F>(name: impl Into<Arc<str>>, f: F) -> Self
    where
        F: Fn(Value) -> Result<Value, FunctionError> + Send + Sync + 'static,
    {
        Self::new(name, 1, FunctionBody::RequestReply(Arc::new(f)))
    }

    pub fn streaming<F>(name: impl Into<Arc<str>>, parameter_count: usize, f: F) -> Self
    where
        F: Fn(Arguments) -> Result<Invocation, FunctionError> + Send + Sync + 'static,
    {
        Self::new(name, parameter_count, FunctionBody::Streaming(Arc::new(f)))
    }

    pub fn with_hooks(mut self, hooks: impl LifecycleHooks + 'static) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    pub fn interaction_model(&self) -> InteractionModel {
        match self.body {
            FunctionBody::RequestReply(_) => InteractionModel::RequestReply,
            FunctionBody::Streaming(_) => InteractionModel::Streaming,
        }
    }

    pub fn body(&self) -> &FunctionBody {
        &self.body
    }

    pub fn hooks(&self) -> Option<&Arc<dyn LifecycleHooks>> {
        self.hooks.as_ref()
    }
}

impl fmt::Debug for UserFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserFunction")
            .field("name", &self.name)
            .field("parameter_count", &self.parameter_count)
            .field("interaction_model", &self.interaction_model())
            .field("hooks", &self.hooks.is_some())
            .finish()
    }
}

/// Best effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panicked".to_string()
    }
}
