pub mod protocol;

/// A call's protocol logic, kept apart from the tasks and channels that carry it out.
///
/// The invoker needs every decision about a call (when to wire, when to end the inputs, when the
/// call is over, which error is terminal) to be a function of what has happened so far. A
/// [`StateMachine`] is fed one [`Input`](StateMachine::Input) per observed event through
/// [`process_input`](StateMachine::process_input) and queues the resulting
/// [`Output`](StateMachine::Output)s, which the runner drains with
/// [`poll_output`](StateMachine::poll_output).
///
/// The machine owns no channels, tasks, clocks or IO and never awaits. The runner turns the world
/// into inputs: a failed decode or a failing function arrives as
/// [`ProtocolInput::Failed`](protocol::ProtocolInput::Failed), the function returning without
/// error as [`ProtocolInput::InvocationSettled`](protocol::ProtocolInput::InvocationSettled), and a
/// drained result as [`ProtocolInput::OutputFinished`](protocol::ProtocolInput::OutputFinished).
/// Replaying the same inputs therefore yields the same outputs, which is what the machine tests
/// rely on. Logging is fine as long as no decision depends on it.
///
/// [`InvocationPipeline`](crate::pipeline::InvocationPipeline) is the runner of the
/// [`ProtocolMachine`](protocol::ProtocolMachine).
pub trait StateMachine {
    /// The type of input that is [processed](StateMachine::process_input) by the state machine.
    type Input;
    /// The type of output that is [polled](StateMachine::poll_output) by the state machine.
    type Output;

    /// Process the provided `input` into the state machine.
    fn process_input(&mut self, input: Self::Input);

    /// Poll the state machine for output, returning the first available output if present.
    fn poll_output(&mut self) -> Option<Self::Output>;
}
