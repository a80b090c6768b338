use std::collections::VecDeque;

use bytes::Bytes;
use tracing::{debug, trace};

use super::StateMachine;
use crate::pipeline::error::{ErrorKind, PipelineError};
use crate::signal::Signal;

/// The invocation protocol of one call, free of channels and tasks.
///
/// The machine decides what happens to every inbound signal and lifecycle event and emits the
/// resulting [`ProtocolOutput`] commands; the runner carries them out and reports back failures
/// and finished outputs as further input.
#[derive(Debug)]
pub struct ProtocolMachine {
    parameter_count: usize,
    state: ProtocolState,
    pending: VecDeque<ProtocolOutput>,
    ignored: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolState {
    AwaitingStart,
    Ready {
        input_count: usize,
        output_count: usize,
        finished: Vec<bool>,
        finished_outputs: usize,
        /// The function's invocation returned without error.
        settled: bool,
        source_ended: bool,
    },
    Terminated(Termination),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Completed,
    Failed(ErrorKind),
}

#[derive(Debug)]
pub enum ProtocolInput {
    Signal(Signal),
    /// The inbound source will not deliver any more signals.
    SourceEnded,
    /// An output channel was ended by the function and every value written to it was emitted.
    OutputFinished(usize),
    /// The function's invocation returned without error.
    InvocationSettled,
    /// A failure observed by the runner while carrying out a command or running user code.
    Failed(PipelineError),
}

#[derive(Debug)]
pub enum ProtocolOutput {
    /// Allocate the argument channels and invoke the function once.
    Wire {
        input_count: usize,
        output_content_types: Vec<String>,
    },
    /// Decode a payload into the input channel at `arg_index`.
    Route {
        arg_index: usize,
        content_type: String,
        payload: Bytes,
    },
    /// End every input channel.
    EndInputs,
    /// Every output finished and the invocation settled: end the destination.
    Complete,
    /// End every channel and the destination, surfacing the error.
    Abort(PipelineError),
}

impl ProtocolMachine {
    pub fn new(parameter_count: usize) -> Self {
        Self {
            parameter_count,
            state: ProtocolState::AwaitingStart,
            pending: VecDeque::new(),
            ignored: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &ProtocolState {
        &self.state
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.state, ProtocolState::Terminated(_))
    }

    /// Inputs dropped because the call had already terminated.
    pub fn ignored(&self) -> usize {
        self.ignored
    }

    fn process_signal(&mut self, signal: Signal) {
        if self.is_terminated() {
            trace!(kind = signal.kind(), "Ignoring signal after termination");
            self.ignored += 1;
            return;
        }

        match signal {
            Signal::Start {
                expected_output_content_types,
            } => self.process_start(expected_output_content_types),
            Signal::Data {
                arg_index,
                content_type,
                payload,
            } => self.process_data(arg_index, content_type, payload),
            Signal::Output { .. } => self.fail(PipelineError::InputTypeUnsupported(
                "output signals are emitted by the invoker, never accepted".to_string(),
            )),
        }
    }

    fn process_start(&mut self, content_types: Vec<String>) {
        if matches!(self.state, ProtocolState::Ready { .. }) {
            self.fail(PipelineError::TooManyStarts { content_types });
            return;
        }

        let output_count = content_types.len();
        if output_count > self.parameter_count {
            self.fail(PipelineError::InvalidOutputCount {
                output_count,
                parameter_count: self.parameter_count,
            });
            return;
        }

        let input_count = self.parameter_count - output_count;
        debug!(input_count, output_count, "Start signal received");
        self.state = ProtocolState::Ready {
            input_count,
            output_count,
            finished: vec![false; output_count],
            finished_outputs: 0,
            settled: false,
            source_ended: false,
        };
        self.pending.push_back(ProtocolOutput::Wire {
            input_count,
            output_content_types: content_types,
        });
    }

    fn process_data(&mut self, arg_index: usize, content_type: String, payload: Bytes) {
        let input_count = match self.state {
            ProtocolState::Ready { input_count, .. } => input_count,
            _ => {
                self.fail(PipelineError::MissingStart);
                return;
            }
        };

        if arg_index >= input_count {
            self.fail(PipelineError::InputIndexOutOfRange {
                index: arg_index,
                input_count,
            });
            return;
        }

        self.pending.push_back(ProtocolOutput::Route {
            arg_index,
            content_type,
            payload,
        });
    }

    fn process_source_ended(&mut self) {
        match self.state {
            ProtocolState::Terminated(_) => {
                self.ignored += 1;
                return;
            }
            ProtocolState::AwaitingStart => {
                debug!("Source ended before any start signal");
                self.pending.push_back(ProtocolOutput::EndInputs);
                self.complete();
                return;
            }
            ProtocolState::Ready {
                ref mut source_ended,
                ..
            } => *source_ended = true,
        }

        self.pending.push_back(ProtocolOutput::EndInputs);
        self.complete_if_done();
    }

    fn process_output_finished(&mut self, index: usize) {
        let ProtocolState::Ready {
            finished,
            finished_outputs,
            ..
        } = &mut self.state
        else {
            self.ignored += 1;
            return;
        };

        match finished.get_mut(index) {
            Some(done) if !*done => {
                *done = true;
                *finished_outputs += 1;
                debug!(index, finished_outputs = *finished_outputs, "Output finished");
            }
            _ => return,
        }

        self.complete_if_done();
    }

    fn process_invocation_settled(&mut self) {
        let ProtocolState::Ready { settled, .. } = &mut self.state else {
            self.ignored += 1;
            return;
        };
        *settled = true;
        self.complete_if_done();
    }

    /// A call is done once its invocation settled and every output finished. Without outputs the
    /// inbound source must also have ended, since nothing else marks the end of the call.
    fn complete_if_done(&mut self) {
        let done = match &self.state {
            ProtocolState::Ready {
                output_count,
                finished_outputs,
                settled,
                source_ended,
                ..
            } => {
                *settled
                    && finished_outputs == output_count
                    && (*output_count > 0 || *source_ended)
            }
            _ => false,
        };
        if done {
            debug!("Call done: ending destination");
            self.complete();
        }
    }

    fn fail(&mut self, err: PipelineError) {
        if self.is_terminated() {
            trace!(kind = %err.kind(), "Ignoring failure after termination");
            self.ignored += 1;
            return;
        }
        self.state = ProtocolState::Terminated(Termination::Failed(err.kind()));
        self.pending.push_back(ProtocolOutput::Abort(err));
    }

    fn complete(&mut self) {
        self.state = ProtocolState::Terminated(Termination::Completed);
        self.pending.push_back(ProtocolOutput::Complete);
    }
}

impl StateMachine for ProtocolMachine {
    type Input = ProtocolInput;
    type Output = ProtocolOutput;

    fn process_input(&mut self, input: Self::Input) {
        match input {
            ProtocolInput::Signal(signal) => self.process_signal(signal),
            ProtocolInput::SourceEnded => self.process_source_ended(),
            ProtocolInput::OutputFinished(index) => self.process_output_finished(index),
            ProtocolInput::InvocationSettled => self.process_invocation_settled(),
            ProtocolInput::Failed(err) => self.fail(err),
        }
    }

    fn poll_output(&mut self) -> Option<Self::Output> {
        self.pending.pop_front()
    }
}
