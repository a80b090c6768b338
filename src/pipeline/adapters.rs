use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::PipelineEvent;
use super::error::PipelineError;
use crate::codec::{Codec, ContentNegotiator};
use crate::signal::OutputSignal;

/// Decodes data payloads addressed to one argument and feeds them to its input channel.
#[derive(Debug)]
pub struct InputUnmarshaller {
    index: usize,
    negotiator: ContentNegotiator,
    tx: Option<mpsc::UnboundedSender<Value>>,
}

impl InputUnmarshaller {
    pub fn new(
        index: usize,
        negotiator: ContentNegotiator,
        tx: mpsc::UnboundedSender<Value>,
    ) -> Self {
        Self {
            index,
            negotiator,
            tx: Some(tx),
        }
    }

    /// Decode `payload` as `content_type` and append it to the input channel.
    pub fn write(&self, content_type: &str, payload: &[u8]) -> Result<(), PipelineError> {
        let codec = self.negotiator.codec_for(content_type).map_err(|_| {
            PipelineError::InputContentTypeUnsupported {
                index: self.index,
                content_type: content_type.to_string(),
            }
        })?;

        let value = codec.unmarshal(payload).map_err(|err| PipelineError::InputInvalid {
            index: self.index,
            message: err.message,
        })?;

        trace!(index = self.index, %value, "Forwarding input");
        match &self.tx {
            Some(tx) => {
                if tx.send(value).is_err() {
                    debug!(index = self.index, "Function dropped its input, discarding value");
                }
            }
            None => debug!(index = self.index, "Input already ended, discarding value"),
        }
        Ok(())
    }

    /// Signal that no more values will arrive. Calling it again has no effect.
    pub fn end(&mut self) {
        if self.tx.take().is_some() {
            debug!(index = self.index, "Input ended");
        }
    }
}

/// Encodes the values one output channel receives into output signals.
#[derive(Debug, Clone)]
pub struct OutputMarshaller {
    index: usize,
    codec: Codec,
}

impl OutputMarshaller {
    /// Bind result `index` to the codec negotiated for `content_type`.
    pub fn new(
        index: usize,
        content_type: &str,
        negotiator: &ContentNegotiator,
    ) -> Result<Self, PipelineError> {
        let codec = negotiator.codec_for(content_type).map_err(|_| {
            PipelineError::OutputContentTypeUnsupported {
                index,
                content_type: content_type.to_string(),
            }
        })?;
        Ok(Self { index, codec })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn content_type(&self) -> &str {
        self.codec.content_type()
    }

    pub fn marshal(&self, value: &Value) -> Result<OutputSignal, PipelineError> {
        let payload = self
            .codec
            .marshal(value)
            .map_err(|err| PipelineError::OutputInvalid {
                index: self.index,
                message: err.message,
            })?;
        Ok(OutputSignal::data(
            self.index as i32,
            self.codec.content_type(),
            payload,
        ))
    }

    /// Emit one signal per value in write order, then report the output as finished once the
    /// function has ended it.
    pub(crate) async fn drain(
        self,
        mut values: mpsc::UnboundedReceiver<Value>,
        events: mpsc::Sender<PipelineEvent>,
    ) {
        while let Some(value) = values.recv().await {
            let event = match self.marshal(&value) {
                Ok(signal) => PipelineEvent::Emitted(signal),
                Err(err) => {
                    let _ = events.send(PipelineEvent::Failed(err)).await;
                    return;
                }
            };
            if events.send(event).await.is_err() {
                return;
            }
        }

        let _ = events.send(PipelineEvent::OutputFinished(self.index)).await;
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde_json::json;

    use super::*;
    use crate::signal::OutputFrame;

    #[tokio::test]
    async fn test_unmarshaller_decodes_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut unmarshaller = InputUnmarshaller::new(0, ContentNegotiator::default(), tx);

        unmarshaller.write("text/plain", b"aha").unwrap();
        unmarshaller.write("application/json", b"\"take me on\"").unwrap();
        unmarshaller.end();
        unmarshaller.end();

        assert_eq!(rx.recv().await, Some(json!("aha")));
        assert_eq!(rx.recv().await, Some(json!("take me on")));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_unmarshaller_rejects_unsupported_content_type() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let unmarshaller = InputUnmarshaller::new(0, ContentNegotiator::default(), tx);

        let err = unmarshaller.write("application/x-doom", b"aha").unwrap_err();
        assert_eq!(
            err.to_string(),
            "unsupported input #0's content-type application/x-doom"
        );
    }

    #[test]
    fn test_unmarshaller_rejects_invalid_payload() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let unmarshaller = InputUnmarshaller::new(1, ContentNegotiator::default(), tx);

        let err = unmarshaller.write("application/json", b"{nope").unwrap_err();
        assert!(matches!(err, PipelineError::InputInvalid { index: 1, .. }));
    }

    #[test]
    fn test_marshaller_rejects_unknown_content_type() {
        let err = OutputMarshaller::new(0, "text/nope", &ContentNegotiator::default()).unwrap_err();
        assert_eq!(err.to_string(), "unrecognized output #0's content-type text/nope");
    }

    #[tokio::test]
    async fn test_marshaller_drains_then_finishes() {
        let marshaller =
            OutputMarshaller::new(0, "application/json", &ContentNegotiator::default()).unwrap();
        let (values_tx, values_rx) = mpsc::unbounded_channel();
        let (events_tx, mut events_rx) = mpsc::channel(4);

        values_tx.send(json!(42)).unwrap();
        values_tx.send(json!("forty-two")).unwrap();
        drop(values_tx);
        marshaller.drain(values_rx, events_tx).await;

        let mut payloads = Vec::new();
        while let Some(event) = events_rx.recv().await {
            match event {
                PipelineEvent::Emitted(signal) => {
                    let OutputFrame {
                        content_type,
                        payload,
                        result_index,
                    } = signal.frame().cloned().unwrap();
                    assert_eq!(content_type, "application/json");
                    assert_eq!(result_index, 0);
                    payloads.push(payload);
                }
                PipelineEvent::OutputFinished(index) => {
                    assert_eq!(index, 0);
                    break;
                }
                PipelineEvent::Failed(err) => panic!("unexpected failure: {err}"),
            }
        }
        assert_eq!(
            payloads,
            vec![Bytes::from_static(b"42"), Bytes::from_static(b"\"forty-two\"")]
        );
    }

    #[tokio::test]
    async fn test_marshaller_reports_unrepresentable_value() {
        let marshaller =
            OutputMarshaller::new(2, "application/octet-stream", &ContentNegotiator::default())
                .unwrap();
        let (values_tx, values_rx) = mpsc::unbounded_channel();
        let (events_tx, mut events_rx) = mpsc::channel(4);

        values_tx.send(json!({"not": "bytes"})).unwrap();
        values_tx.send(json!("never sent")).unwrap();
        marshaller.drain(values_rx, events_tx).await;

        assert!(matches!(
            events_rx.recv().await,
            Some(PipelineEvent::Failed(PipelineError::OutputInvalid { index: 2, .. }))
        ));
        assert!(events_rx.recv().await.is_none());
    }
}
