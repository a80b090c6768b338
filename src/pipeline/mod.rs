//! The invocation pipeline: one supervisor task per call that drives the
//! [`ProtocolMachine`] and carries out what it decides.
//!
//! The supervisor is the single owner of the destination. Inbound signals, finished outputs,
//! encoded output signals and the outcome of the function invocation all reach it as events, one
//! at a time, so termination is decided in exactly one place.

use std::panic::AssertUnwindSafe;
use std::pin::pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Status;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::channel::{Arguments, InputChannel, OutputChannel};
use crate::codec::ContentNegotiator;
use crate::function::{
    HookRunner, LifecycleHooks, NormalizedFunction, UserFunction, normalize, panic_message,
};
use crate::signal::{InputSignal, OutputSignal, Signal};
use crate::state_machine::StateMachine;
use crate::state_machine::protocol::{ProtocolInput, ProtocolMachine, ProtocolOutput};

pub mod adapters;
pub mod config;
pub mod error;


pub use adapters::{InputUnmarshaller, OutputMarshaller};
pub use config::PipelineConfig;
pub use error::{ErrorKind, PipelineError};

/// The outbound half of a call: output signals, or the one terminal error.
pub type Destination = mpsc::Sender<Result<OutputSignal, Status>>;

type SettledInvocation = BoxFuture<'static, Result<(), PipelineError>>;

#[derive(Debug)]
pub(crate) enum PipelineEvent {
    Emitted(OutputSignal),
    OutputFinished(usize),
    Failed(PipelineError),
}

/// Anything a transport can hand the pipeline as one inbound signal.
pub trait IntoSignal {
    fn into_signal(self) -> Result<Signal, PipelineError>;
}

impl IntoSignal for InputSignal {
    fn into_signal(self) -> Result<Signal, PipelineError> {
        Signal::try_from(self)
    }
}

impl IntoSignal for Signal {
    fn into_signal(self) -> Result<Signal, PipelineError> {
        Ok(self)
    }
}

impl IntoSignal for Bytes {
    fn into_signal(self) -> Result<Signal, PipelineError> {
        Signal::decode(&self)
    }
}

impl IntoSignal for Vec<u8> {
    fn into_signal(self) -> Result<Signal, PipelineError> {
        Signal::decode(&self)
    }
}

/// Everything needed to serve one call: the normalized function, its hooks, the shared content
/// negotiator and the configuration.
pub struct InvocationPipeline {
    function: NormalizedFunction,
    hooks: Option<Arc<dyn LifecycleHooks>>,
    negotiator: ContentNegotiator,
    config: PipelineConfig,
}

impl InvocationPipeline {
    /// Prepare a pipeline for `function`, failing if a request-reply function does not take
    /// exactly one parameter.
    pub fn new(
        function: &UserFunction,
        negotiator: ContentNegotiator,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            function: normalize(function)?,
            hooks: function.hooks().cloned(),
            negotiator,
            config,
        })
    }

    /// Run the pipeline on its own task, returning the outbound stream and the task's handle.
    pub fn spawn<S, T>(
        self,
        inbound: S,
    ) -> (
        ReceiverStream<Result<OutputSignal, Status>>,
        JoinHandle<Result<(), PipelineError>>,
    )
    where
        S: Stream<Item = Result<T, Status>> + Send + 'static,
        T: IntoSignal + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.config.destination_capacity.max(1));
        let handle = tokio::spawn(self.run(inbound, tx));
        (ReceiverStream::new(rx), handle)
    }

    /// Consume `inbound` until the call terminates, writing output signals to `destination`.
    ///
    /// The destination is closed exactly once, when this returns. A terminal error is written to
    /// it as the last item and also returned.
    pub async fn run<S, T>(self, inbound: S, destination: Destination) -> Result<(), PipelineError>
    where
        S: Stream<Item = Result<T, Status>> + Send,
        T: IntoSignal + Send,
    {
        let span = info_span!(
            "invocation",
            call_id = %Uuid::new_v4(),
            function = %self.function.name(),
        );
        Supervisor::new(self, destination)
            .run(inbound)
            .instrument(span)
            .await
    }
}

enum Step<T> {
    Event(PipelineEvent),
    Settled(Result<(), PipelineError>),
    Inbound(Option<Result<T, Status>>),
}

struct Supervisor {
    machine: ProtocolMachine,
    function: NormalizedFunction,
    hooks: Option<Arc<dyn LifecycleHooks>>,
    hook_runner: HookRunner,
    negotiator: ContentNegotiator,
    inputs: Vec<InputUnmarshaller>,
    marshallers: Vec<JoinHandle<()>>,
    invocation: Option<SettledInvocation>,
    events_tx: mpsc::Sender<PipelineEvent>,
    events_rx: mpsc::Receiver<PipelineEvent>,
    destination: Option<Destination>,
    destroyed: bool,
    outcome: Option<Result<(), PipelineError>>,
}

impl Supervisor {
    fn new(pipeline: InvocationPipeline, destination: Destination) -> Self {
        let (events_tx, events_rx) = mpsc::channel(pipeline.config.destination_capacity.max(1));
        Self {
            machine: ProtocolMachine::new(pipeline.function.parameter_count()),
            function: pipeline.function,
            hooks: pipeline.hooks,
            hook_runner: HookRunner::new(pipeline.config.hook_timeout),
            negotiator: pipeline.negotiator,
            inputs: Vec::new(),
            marshallers: Vec::new(),
            invocation: None,
            events_tx,
            events_rx,
            destination: Some(destination),
            destroyed: false,
            outcome: None,
        }
    }

    async fn run<S, T>(mut self, inbound: S) -> Result<(), PipelineError>
    where
        S: Stream<Item = Result<T, Status>> + Send,
        T: IntoSignal + Send,
    {
        info!(
            parameter_count = self.function.parameter_count(),
            interaction_model = %self.function.declared_model(),
            "Invocation pipeline initialized"
        );

        if let Err(err) = self.hook_runner.run_init(self.hooks.as_ref()).await {
            self.feed(ProtocolInput::Failed(err.into())).await;
        }

        let mut inbound = pin!(inbound);
        let mut source_open = true;

        while !self.machine.is_terminated() {
            let step = tokio::select! {
                biased;
                Some(event) = self.events_rx.recv() => Step::Event(event),
                result = settle(&mut self.invocation) => Step::Settled(result),
                item = inbound.next(), if source_open => Step::Inbound(item),
            };

            match step {
                Step::Event(PipelineEvent::Emitted(signal)) => self.emit(signal).await,
                Step::Event(PipelineEvent::OutputFinished(index)) => {
                    self.feed(ProtocolInput::OutputFinished(index)).await
                }
                Step::Event(PipelineEvent::Failed(err)) => {
                    self.feed(ProtocolInput::Failed(err)).await
                }
                Step::Settled(result) => {
                    self.invocation = None;
                    match result {
                        Ok(()) => {
                            debug!("Function invocation settled");
                            self.feed(ProtocolInput::InvocationSettled).await;
                        }
                        Err(err) => self.feed(ProtocolInput::Failed(err)).await,
                    }
                }
                Step::Inbound(Some(Ok(item))) => {
                    let input = match item.into_signal() {
                        Ok(signal) => ProtocolInput::Signal(signal),
                        Err(err) => ProtocolInput::Failed(err),
                    };
                    self.feed(input).await;
                }
                Step::Inbound(Some(Err(status))) => {
                    self.feed(ProtocolInput::Failed(PipelineError::Transport(status)))
                        .await
                }
                Step::Inbound(None) => {
                    debug!("Inbound source ended");
                    source_open = false;
                    self.feed(ProtocolInput::SourceEnded).await;
                }
            }
        }

        if self.machine.ignored() > 0 {
            debug!(ignored = self.machine.ignored(), "Inputs ignored after termination");
        }
        self.outcome.take().unwrap_or(Ok(()))
    }

    /// Hand `input` to the machine and carry out every command it produces.
    async fn feed(&mut self, input: ProtocolInput) {
        self.machine.process_input(input);

        while let Some(output) = self.machine.poll_output() {
            match output {
                ProtocolOutput::Wire {
                    input_count,
                    output_content_types,
                } => {
                    if let Err(err) = self.wire(input_count, &output_content_types) {
                        self.machine.process_input(ProtocolInput::Failed(err));
                    }
                }
                ProtocolOutput::Route {
                    arg_index,
                    content_type,
                    payload,
                } => {
                    let routed = match self.inputs.get(arg_index) {
                        Some(input) => input.write(&content_type, &payload),
                        None => Err(PipelineError::InputIndexOutOfRange {
                            index: arg_index,
                            input_count: self.inputs.len(),
                        }),
                    };
                    if let Err(err) = routed {
                        self.machine.process_input(ProtocolInput::Failed(err));
                    }
                }
                ProtocolOutput::EndInputs => self.end_inputs(),
                ProtocolOutput::Complete => self.complete().await,
                ProtocolOutput::Abort(err) => self.abort(err).await,
            }
        }
    }

    /// Allocate the argument channels, bind the output codecs and invoke the function once.
    fn wire(
        &mut self,
        input_count: usize,
        output_content_types: &[String],
    ) -> Result<(), PipelineError> {
        let marshallers = output_content_types
            .iter()
            .enumerate()
            .map(|(index, content_type)| {
                OutputMarshaller::new(index, content_type, &self.negotiator)
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            inputs = input_count,
            outputs = marshallers.len(),
            "Wiring argument channels"
        );

        let mut args = Arguments::default();
        for index in 0..input_count {
            let (tx, channel) = InputChannel::new(index);
            self.inputs
                .push(InputUnmarshaller::new(index, self.negotiator.clone(), tx));
            args.inputs.push(channel);
        }
        for marshaller in marshallers {
            let (channel, values) = OutputChannel::new(marshaller.index());
            debug!(
                index = marshaller.index(),
                content_type = marshaller.content_type(),
                "Output wired"
            );
            let drain = marshaller.drain(values, self.events_tx.clone());
            self.marshallers.push(tokio::spawn(drain.in_current_span()));
            args.outputs.push(channel);
        }

        let function = &self.function;
        let invoked = std::panic::catch_unwind(AssertUnwindSafe(|| function.invoke(args)));
        let invocation = match invoked {
            Ok(Ok(invocation)) => invocation,
            Ok(Err(err)) => return Err(PipelineError::FunctionInvocationError(err.message)),
            Err(panic) => {
                return Err(PipelineError::FunctionInvocationError(panic_message(
                    panic.as_ref(),
                )));
            }
        };

        self.invocation = Some(Box::pin(AssertUnwindSafe(invocation).catch_unwind().map(
            |settled| match settled {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(PipelineError::FunctionRuntimeError(err.message)),
                Err(panic) => Err(PipelineError::FunctionRuntimeError(panic_message(
                    panic.as_ref(),
                ))),
            },
        )));

        info!("Ready to process data");
        Ok(())
    }

    async fn emit(&mut self, signal: OutputSignal) {
        let Some(destination) = &self.destination else {
            return;
        };
        if destination.send(Ok(signal)).await.is_err() {
            self.feed(ProtocolInput::Failed(PipelineError::Transport(
                Status::cancelled("destination closed by the transport"),
            )))
            .await;
        }
    }

    fn end_inputs(&mut self) {
        if !self.inputs.is_empty() {
            debug!(count = self.inputs.len(), "Ending input channels");
        }
        self.inputs.iter_mut().for_each(InputUnmarshaller::end);
    }

    fn end_all(&mut self) {
        self.end_inputs();
        for marshaller in self.marshallers.drain(..) {
            marshaller.abort();
        }
        self.invocation = None;
    }

    async fn complete(&mut self) {
        self.end_all();
        let result = self.destroy().await;
        match &result {
            Ok(()) => info!("Invocation completed"),
            Err(err) => {
                error!(kind = %err.kind(), error = %err, "Invocation failed while shutting down");
                self.send_terminal_error(err).await;
            }
        }
        self.end_destination();
        self.outcome = Some(result);
    }

    async fn abort(&mut self, err: PipelineError) {
        error!(kind = %err.kind(), error = %err, "Invocation failed, stopping now");
        self.end_all();
        self.send_terminal_error(&err).await;
        if let Err(destroy_err) = self.destroy().await {
            warn!(
                kind = %destroy_err.kind(),
                error = %destroy_err,
                "Destroy hook failed after the call had already failed"
            );
        }
        self.end_destination();
        self.outcome = Some(Err(err));
    }

    async fn destroy(&mut self) -> Result<(), PipelineError> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;
        self.hook_runner
            .run_destroy(self.hooks.as_ref())
            .await
            .map_err(Into::into)
    }

    async fn send_terminal_error(&mut self, err: &PipelineError) {
        if let Some(destination) = &self.destination {
            if destination.send(Err(Status::from(err))).await.is_err() {
                debug!("Destination already closed, terminal error not delivered");
            }
        }
    }

    fn end_destination(&mut self) {
        if self.destination.take().is_some() {
            debug!("Destination ended");
        }
    }
}

/// Resolves when the function's invocation settles; never resolves when there is none.
async fn settle(invocation: &mut Option<SettledInvocation>) -> Result<(), PipelineError> {
    match invocation {
        Some(invocation) => invocation.await,
        None => std::future::pending().await,
    }
}
