//! Bridges a bidirectional stream of signals to a user function that consumes input channels and
//! produces output channels.
//!
//! A call starts with one start signal declaring the content types of the outputs, followed by data
//! signals addressed to input arguments by index. Each call is served by an
//! [`InvocationPipeline`](pipeline::InvocationPipeline): a pure
//! [`ProtocolMachine`](state_machine::protocol::ProtocolMachine) decides, a supervisor task acts.

pub mod channel;
pub mod codec;
pub mod function;
pub mod invoker;
pub mod pipeline;
pub mod samples;
pub mod signal;
pub mod state_machine;

pub use channel::{Arguments, ChannelClosed, InputChannel, OutputChannel};
pub use codec::{CodecRegistry, ContentNegotiator};
pub use function::{FunctionError, Invocation, InteractionModel, LifecycleHooks, UserFunction};
pub use invoker::{InvokeStream, Invoker};
pub use pipeline::{ErrorKind, InvocationPipeline, PipelineConfig, PipelineError};
pub use signal::{InputSignal, OutputSignal, Signal};
