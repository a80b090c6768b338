//! Argument channels handed to the user function, one per parameter.
//!
//! Input channels are read by the function and fed by the pipeline; output channels are written
//! by the function and drained by the pipeline. Both are unbounded FIFOs so writes never block.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Sink, Stream};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::function::FunctionError;

/// Returned when writing to an output channel that was ended, or whose pipeline has terminated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("output channel #{index} is closed")]
pub struct ChannelClosed {
    pub index: usize,
}

/// The read half of one input argument.
#[derive(Debug)]
pub struct InputChannel {
    index: usize,
    rx: mpsc::UnboundedReceiver<Value>,
}

impl InputChannel {
    /// Create an input channel for argument `index` along with the sender the pipeline feeds.
    pub(crate) fn new(index: usize) -> (mpsc::UnboundedSender<Value>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { index, rx })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Receive the next value, or `None` once the input has ended and been drained.
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }
}

impl Stream for InputChannel {
    type Item = Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// The write half of one output argument.
///
/// Ending the channel, explicitly through [`end`](OutputChannel::end) or by dropping it, tells the
/// pipeline no more values will follow for this result index.
#[derive(Debug)]
pub struct OutputChannel {
    index: usize,
    tx: Option<mpsc::UnboundedSender<Value>>,
}

impl OutputChannel {
    /// Create an output channel for result `index` along with the receiver the pipeline drains.
    pub(crate) fn new(index: usize) -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                index,
                tx: Some(tx),
            },
            rx,
        )
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_ended(&self) -> bool {
        self.tx.as_ref().is_none_or(|tx| tx.is_closed())
    }

    pub fn send(&self, value: impl Into<Value>) -> Result<(), ChannelClosed> {
        let closed = ChannelClosed { index: self.index };
        self.tx
            .as_ref()
            .ok_or_else(|| closed.clone())?
            .send(value.into())
            .map_err(|_| closed)
    }

    /// End this output. Calling it again has no effect.
    pub fn end(&mut self) {
        self.tx.take();
    }
}

impl Sink<Value> for OutputChannel {
    type Error = ChannelClosed;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.is_ended() {
            Poll::Ready(Err(ChannelClosed { index: self.index }))
        } else {
            Poll::Ready(Ok(()))
        }
    }

    fn start_send(self: Pin<&mut Self>, item: Value) -> Result<(), Self::Error> {
        self.send(item)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        self.end();
        Poll::Ready(Ok(()))
    }
}

/// The positional arguments of one invocation: every input, then every output, in index order.
#[derive(Debug, Default)]
pub struct Arguments {
    pub inputs: Vec<InputChannel>,
    pub outputs: Vec<OutputChannel>,
}

impl Arguments {
    /// Split into fixed-size input and output arrays, failing when the wiring has another shape.
    pub fn into_arrays<const I: usize, const O: usize>(
        self,
    ) -> Result<([InputChannel; I], [OutputChannel; O]), FunctionError> {
        let (inputs, outputs) = (self.inputs.len(), self.outputs.len());
        let mismatch = || {
            FunctionError::new(format!(
                "expected {} input(s) and {} output(s), got {} input(s) and {} output(s)",
                I, O, inputs, outputs
            ))
        };
        let inputs = <[InputChannel; I]>::try_from(self.inputs).map_err(|_| mismatch())?;
        let outputs = <[OutputChannel; O]>::try_from(self.outputs).map_err(|_| mismatch())?;
        Ok((inputs, outputs))
    }
}

#[cfg(test)]
mod tests {
    use futures::{SinkExt, StreamExt};
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_input_preserves_order_and_ends() {
        let (tx, mut input) = InputChannel::new(0);
        tx.send(json!(1)).unwrap();
        tx.send(json!(2)).unwrap();
        drop(tx);

        assert_eq!(input.next().await, Some(json!(1)));
        assert_eq!(input.recv().await, Some(json!(2)));
        assert_eq!(input.next().await, None);
    }

    #[tokio::test]
    async fn test_output_end_is_idempotent() {
        let (mut output, mut rx) = OutputChannel::new(3);
        output.send(json!("a")).unwrap();
        output.end();
        output.end();

        assert!(output.is_ended());
        assert_eq!(output.send(json!("b")), Err(ChannelClosed { index: 3 }));
        assert_eq!(rx.recv().await, Some(json!("a")));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_output_as_sink() {
        let (mut output, mut rx) = OutputChannel::new(0);
        output.send_all(&mut futures::stream::iter([json!(1), json!(2)]).map(Ok)).await.unwrap();
        output.close().await.unwrap();

        assert_eq!(rx.recv().await, Some(json!(1)));
        assert_eq!(rx.recv().await, Some(json!(2)));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_into_arrays_checks_shape() {
        let (_tx, input) = InputChannel::new(0);
        let (output, _rx) = OutputChannel::new(0);
        let args = Arguments {
            inputs: vec![input],
            outputs: vec![output],
        };

        let err = args.into_arrays::<2, 0>().unwrap_err();
        assert_eq!(
            err.message,
            "expected 2 input(s) and 0 output(s), got 1 input(s) and 1 output(s)"
        );

        let (_tx, input) = InputChannel::new(0);
        let args = Arguments {
            inputs: vec![input],
            outputs: vec![],
        };
        let ([input], []) = args.into_arrays::<1, 0>().unwrap();
        assert_eq!(input.index(), 0);
    }

    #[test]
    fn test_output_reports_closed_receiver() {
        let (output, rx) = OutputChannel::new(1);
        drop(rx);
        assert!(output.is_ended());
        assert!(output.send(json!(1)).is_err());
    }
}
