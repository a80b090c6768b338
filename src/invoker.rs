//! The entry point a transport calls once per bidirectional call.

use std::pin::Pin;

use futures::Stream;
use tonic::{Request, Response, Status};
use tracing::info;

use crate::codec::ContentNegotiator;
use crate::function::UserFunction;
use crate::pipeline::{IntoSignal, InvocationPipeline, PipelineConfig, PipelineError};
use crate::signal::OutputSignal;

/// Outbound half of one call, as handed back to the transport.
pub type InvokeStream = Pin<Box<dyn Stream<Item = Result<OutputSignal, Status>> + Send + 'static>>;

/// Serves calls to one user function. Every call gets its own pipeline; the function, its codecs
/// and the configuration are shared.
#[derive(Debug, Clone)]
pub struct Invoker {
    function: UserFunction,
    negotiator: ContentNegotiator,
    config: PipelineConfig,
}

impl Invoker {
    /// Validate `function` once up front, so a request-reply function with the wrong arity is
    /// rejected before any call is served.
    pub fn new(
        function: UserFunction,
        negotiator: ContentNegotiator,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        crate::function::normalize(&function)?;
        info!(
            function = %function.name(),
            interaction_model = %function.interaction_model(),
            parameter_count = function.parameter_count(),
            "Invoker ready"
        );
        Ok(Self {
            function,
            negotiator,
            config,
        })
    }

    /// Start one call on `inbound` and return the stream of its output signals.
    ///
    /// The returned stream ends after the last output signal, or after the single terminal error.
    pub fn invoke<S, T>(&self, inbound: S) -> InvokeStream
    where
        S: Stream<Item = Result<T, Status>> + Send + 'static,
        T: IntoSignal + Send + 'static,
    {
        let pipeline = InvocationPipeline::new(
            &self.function,
            self.negotiator.clone(),
            self.config.clone(),
        );
        match pipeline {
            Ok(pipeline) => {
                let (outbound, _handle) = pipeline.spawn(inbound);
                Box::pin(outbound)
            }
            Err(err) => Box::pin(futures::stream::once(async move {
                Err::<OutputSignal, Status>(Status::from(err))
            })),
        }
    }

    /// Request/response shaped wrapper around [`invoke`](Invoker::invoke) for tonic services.
    pub async fn handle<S, T>(&self, request: Request<S>) -> Result<Response<InvokeStream>, Status>
    where
        S: Stream<Item = Result<T, Status>> + Send + 'static,
        T: IntoSignal + Send + 'static,
    {
        Ok(Response::new(self.invoke(request.into_inner())))
    }
}
