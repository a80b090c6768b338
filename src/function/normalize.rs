use std::sync::Arc;

use futures::StreamExt;
use tracing::debug;

use super::{
    FunctionBody, FunctionError, InteractionModel, Invocation, RequestReplyFn, StreamingFunction,
    UserFunction,
};
use crate::channel::Arguments;
use crate::pipeline::error::PipelineError;

/// A function in the one shape the pipeline invokes: N input channels then M output channels.
#[derive(Clone)]
pub struct NormalizedFunction {
    name: Arc<str>,
    parameter_count: usize,
    declared_model: InteractionModel,
    body: Arc<dyn StreamingFunction>,
}

impl NormalizedFunction {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter count of the streaming shape, which is what a start signal is checked against.
    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    pub fn declared_model(&self) -> InteractionModel {
        self.declared_model
    }

    pub fn invoke(&self, args: Arguments) -> Result<Invocation, FunctionError> {
        self.body.invoke(args)
    }
}

impl std::fmt::Debug for NormalizedFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NormalizedFunction")
            .field("name", &self.name)
            .field("parameter_count", &self.parameter_count)
            .field("declared_model", &self.declared_model)
            .finish_non_exhaustive()
    }
}

/// Bring `function` into the streaming shape.
///
/// Streaming functions pass through untouched. Request-reply functions must declare exactly one
/// parameter and are wrapped so that every input value is mapped to one output value.
pub fn normalize(function: &UserFunction) -> Result<NormalizedFunction, PipelineError> {
    let body = match function.body() {
        FunctionBody::Streaming(body) => {
            return Ok(NormalizedFunction {
                name: function.name.clone(),
                parameter_count: function.parameter_count(),
                declared_model: InteractionModel::Streaming,
                body: Arc::clone(body),
            });
        }
        FunctionBody::RequestReply(f) => f,
    };

    if function.parameter_count() != 1 {
        return Err(PipelineError::UnsupportedFunctionArity {
            function: function.name().to_string(),
            parameter_count: function.parameter_count(),
        });
    }

    debug!(function = %function.name(), "Promoting request-reply function to streaming");
    Ok(NormalizedFunction {
        name: function.name.clone(),
        parameter_count: 2,
        declared_model: InteractionModel::RequestReply,
        body: Arc::new(Mapping { f: Arc::clone(body) }),
    })
}

/// Maps every value of the single input through a request-reply function into the single output.
struct Mapping {
    f: Arc<RequestReplyFn>,
}

impl StreamingFunction for Mapping {
    fn invoke(&self, args: Arguments) -> Result<Invocation, FunctionError> {
        let ([mut input], [mut output]) = args.into_arrays::<1, 1>()?;
        let f = Arc::clone(&self.f);

        Ok(Box::pin(async move {
            while let Some(value) = input.next().await {
                let result = f(value).map_err(|err| {
                    FunctionError::new(format!("request-reply function failed: {}", err.message))
                })?;
                if output.send(result).is_err() {
                    debug!("Output closed, stopping request-reply mapping");
                    return Ok(());
                }
            }
            output.end();
            Ok::<(), FunctionError>(())
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use serde_json::{Value, json};

    use super::*;
    use crate::channel::{InputChannel, OutputChannel};

    fn squaring() -> UserFunction {
        UserFunction::request_reply("square", |x: Value| {
            x.as_i64()
                .map(|n| json!(n * n))
                .ok_or_else(|| FunctionError::new(format!("{x} is not a number")))
        })
    }

    fn wire(values: &[Value]) -> (Arguments, tokio::sync::mpsc::UnboundedReceiver<Value>) {
        let (tx, input) = InputChannel::new(0);
        for value in values {
            tx.send(value.clone()).unwrap();
        }
        drop(tx);
        let (output, rx) = OutputChannel::new(0);
        (
            Arguments {
                inputs: vec![input],
                outputs: vec![output],
            },
            rx,
        )
    }

    async fn collect(mut rx: tokio::sync::mpsc::UnboundedReceiver<Value>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Some(value) = rx.recv().await {
            out.push(value);
        }
        out
    }

    #[tokio::test]
    async fn test_promotes_request_reply() {
        let normalized = normalize(&squaring()).unwrap();
        assert_eq!(normalized.parameter_count(), 2);
        assert_eq!(normalized.declared_model(), InteractionModel::RequestReply);

        let (args, rx) = wire(&[json!(1), json!(2), json!(4)]);
        normalized.invoke(args).unwrap().await.unwrap();

        assert_eq!(collect(rx).await, vec![json!(1), json!(4), json!(16)]);
    }

    #[tokio::test]
    async fn test_streaming_passes_through() {
        let function = UserFunction::streaming("echo", 2, |args: Arguments| {
            let ([mut input], [output]) = args.into_arrays::<1, 1>()?;
            Ok(Box::pin(async move {
                while let Some(value) = input.next().await {
                    output.send(value).map_err(|e| FunctionError::new(e.to_string()))?;
                }
                Ok::<(), FunctionError>(())
            }) as Invocation)
        });
        let normalized = normalize(&function).unwrap();
        assert_eq!(normalized.declared_model(), InteractionModel::Streaming);

        let (args, rx) = wire(&[json!("a"), json!("b")]);
        normalized.invoke(args).unwrap().await.unwrap();
        assert_eq!(collect(rx).await, vec![json!("a"), json!("b")]);
    }

    #[test]
    fn test_rejects_wrong_arity_without_invoking() {
        let invoked = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&invoked);
        let function = UserFunction::new(
            "add",
            2,
            FunctionBody::RequestReply(Arc::new(move |x: Value| {
                flag.store(true, Ordering::SeqCst);
                Ok::<Value, FunctionError>(x)
            })),
        );

        let err = normalize(&function).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::UnsupportedFunctionArity { parameter_count: 2, .. }
        ));
        assert_eq!(
            err.to_string(),
            "request-reply function add must have exactly 1 argument, 2 found"
        );
        assert!(!invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_runtime_failure_aborts_mapping() {
        let normalized = normalize(&squaring()).unwrap();
        let (args, rx) = wire(&[json!(3), json!("three"), json!(4)]);

        let err = normalized.invoke(args).unwrap().await.unwrap_err();
        assert_eq!(err.message, "request-reply function failed: \"three\" is not a number");
        assert_eq!(collect(rx).await, vec![json!(9)]);
    }

    #[test]
    fn test_wrapper_rejects_other_shapes() {
        let normalized = normalize(&squaring()).unwrap();
        let (_tx, input) = InputChannel::new(0);
        let args = Arguments {
            inputs: vec![input],
            outputs: vec![],
        };
        assert!(normalized.invoke(args).is_err());
    }
}
