use std::fmt;

use tonic::{Code, Status};

use crate::function::hooks::Hook;

/// The stable kind of a [`PipelineError`], used in log fields and surfaced status messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InputTypeInvalid,
    InputTypeUnsupported,
    TooManyStarts,
    InvalidOutputCount,
    MissingStart,
    InputIndexOutOfRange,
    InputContentTypeUnsupported,
    InputInvalid,
    OutputContentTypeUnsupported,
    OutputInvalid,
    FunctionInvocationError,
    FunctionRuntimeError,
    HookTimeout,
    HookRuntimeError,
    UnsupportedFunctionArity,
    Transport,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InputTypeInvalid => "error-streaming-input-type-invalid",
            ErrorKind::InputTypeUnsupported => "error-streaming-input-type-unsupported",
            ErrorKind::TooManyStarts => "error-streaming-too-many-starts",
            ErrorKind::InvalidOutputCount => "error-streaming-invalid-output-count",
            ErrorKind::MissingStart => "error-streaming-missing-start",
            ErrorKind::InputIndexOutOfRange => "error-streaming-input-index-out-of-range",
            ErrorKind::InputContentTypeUnsupported => "error-input-content-type-unsupported",
            ErrorKind::InputInvalid => "error-input-invalid",
            ErrorKind::OutputContentTypeUnsupported => "error-output-content-type-unsupported",
            ErrorKind::OutputInvalid => "error-output-invalid",
            ErrorKind::FunctionInvocationError => "streaming-function-invocation-error",
            ErrorKind::FunctionRuntimeError => "streaming-function-runtime-error",
            ErrorKind::HookTimeout => "error-hook-timeout",
            ErrorKind::HookRuntimeError => "error-hook-runtime-error",
            ErrorKind::UnsupportedFunctionArity => "error-promoting-function",
            ErrorKind::Transport => "error-transport",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every way an invocation can fail. All of them are fatal to the call they occur in.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{0}")]
    InputTypeInvalid(String),

    #[error("{0}")]
    InputTypeUnsupported(String),

    #[error(
        "start signal has already been received. Rejecting new start signal with content types [{}]",
        .content_types.join(",")
    )]
    TooManyStarts { content_types: Vec<String> },

    #[error("invalid output count {output_count}: function has only {parameter_count} parameter(s)")]
    InvalidOutputCount {
        output_count: usize,
        parameter_count: usize,
    },

    #[error("start signal has not been received or processed yet. Rejecting data signal")]
    MissingStart,

    #[error("invalid input #{index}: function has only {input_count} input(s)")]
    InputIndexOutOfRange { index: usize, input_count: usize },

    #[error("unsupported input #{index}'s content-type {content_type}")]
    InputContentTypeUnsupported { index: usize, content_type: String },

    #[error("invalid input #{index}: {message}")]
    InputInvalid { index: usize, message: String },

    #[error("unrecognized output #{index}'s content-type {content_type}")]
    OutputContentTypeUnsupported { index: usize, content_type: String },

    #[error("invalid output #{index}: {message}")]
    OutputInvalid { index: usize, message: String },

    #[error("function invocation failed: {0}")]
    FunctionInvocationError(String),

    #[error("function failed while processing: {0}")]
    FunctionRuntimeError(String),

    #[error("the {hook} hook took too long to run, aborting now")]
    HookTimeout { hook: Hook },

    #[error("the {hook} hook failed: {message}")]
    HookRuntimeError { hook: Hook, message: String },

    #[error(
        "request-reply function {function} must have exactly 1 argument, {parameter_count} found"
    )]
    UnsupportedFunctionArity {
        function: String,
        parameter_count: usize,
    },

    #[error("transport error: {0}")]
    Transport(Status),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::InputTypeInvalid(_) => ErrorKind::InputTypeInvalid,
            PipelineError::InputTypeUnsupported(_) => ErrorKind::InputTypeUnsupported,
            PipelineError::TooManyStarts { .. } => ErrorKind::TooManyStarts,
            PipelineError::InvalidOutputCount { .. } => ErrorKind::InvalidOutputCount,
            PipelineError::MissingStart => ErrorKind::MissingStart,
            PipelineError::InputIndexOutOfRange { .. } => ErrorKind::InputIndexOutOfRange,
            PipelineError::InputContentTypeUnsupported { .. } => {
                ErrorKind::InputContentTypeUnsupported
            }
            PipelineError::InputInvalid { .. } => ErrorKind::InputInvalid,
            PipelineError::OutputContentTypeUnsupported { .. } => {
                ErrorKind::OutputContentTypeUnsupported
            }
            PipelineError::OutputInvalid { .. } => ErrorKind::OutputInvalid,
            PipelineError::FunctionInvocationError(_) => ErrorKind::FunctionInvocationError,
            PipelineError::FunctionRuntimeError(_) => ErrorKind::FunctionRuntimeError,
            PipelineError::HookTimeout { .. } => ErrorKind::HookTimeout,
            PipelineError::HookRuntimeError { .. } => ErrorKind::HookRuntimeError,
            PipelineError::UnsupportedFunctionArity { .. } => ErrorKind::UnsupportedFunctionArity,
            PipelineError::Transport(_) => ErrorKind::Transport,
        }
    }

    fn code(&self) -> Code {
        match self.kind() {
            ErrorKind::InputTypeInvalid
            | ErrorKind::InputTypeUnsupported
            | ErrorKind::InvalidOutputCount
            | ErrorKind::InputIndexOutOfRange
            | ErrorKind::InputContentTypeUnsupported
            | ErrorKind::InputInvalid
            | ErrorKind::OutputContentTypeUnsupported => Code::InvalidArgument,
            ErrorKind::TooManyStarts | ErrorKind::MissingStart => Code::FailedPrecondition,
            ErrorKind::OutputInvalid
            | ErrorKind::FunctionInvocationError
            | ErrorKind::HookRuntimeError
            | ErrorKind::UnsupportedFunctionArity => Code::Internal,
            ErrorKind::FunctionRuntimeError => Code::Unknown,
            ErrorKind::HookTimeout => Code::DeadlineExceeded,
            ErrorKind::Transport => match self {
                PipelineError::Transport(status) => status.code(),
                _ => Code::Unavailable,
            },
        }
    }
}

impl From<&PipelineError> for Status {
    fn from(err: &PipelineError) -> Self {
        Status::new(err.code(), format!("{}: {}", err.kind(), err))
    }
}

impl From<PipelineError> for Status {
    fn from(err: PipelineError) -> Self {
        Status::from(&err)
    }
}
