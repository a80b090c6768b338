//! Wire envelope exchanged with the transport and the [`Signal`] sum type the pipeline matches on.
//!
//! The envelope messages are written out by hand with the prost derives so the crate builds
//! without `protoc`. Field tags follow the invoker protocol:
//!
//! ```text
//! message StartFrame   { repeated string expected_content_types = 1; }
//! message InputFrame   { string content_type = 1; bytes payload = 2; int32 arg_index = 3; }
//! message OutputFrame  { string content_type = 1; bytes payload = 2; int32 result_index = 3; }
//! message InputSignal  { oneof frame { StartFrame start = 1; InputFrame data = 2; } }
//! message OutputSignal { oneof frame { OutputFrame data = 1; } }
//! ```

use bytes::Bytes;
use prost::Message;

use crate::pipeline::error::PipelineError;

#[derive(Clone, PartialEq, Message)]
pub struct StartFrame {
    #[prost(string, repeated, tag = "1")]
    pub expected_content_types: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct InputFrame {
    #[prost(string, tag = "1")]
    pub content_type: String,
    #[prost(bytes = "bytes", tag = "2")]
    pub payload: Bytes,
    #[prost(int32, tag = "3")]
    pub arg_index: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct OutputFrame {
    #[prost(string, tag = "1")]
    pub content_type: String,
    #[prost(bytes = "bytes", tag = "2")]
    pub payload: Bytes,
    #[prost(int32, tag = "3")]
    pub result_index: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct InputSignal {
    #[prost(oneof = "input_signal::Frame", tags = "1, 2")]
    pub frame: Option<input_signal::Frame>,
}

pub mod input_signal {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Frame {
        #[prost(message, tag = "1")]
        Start(super::StartFrame),
        #[prost(message, tag = "2")]
        Data(super::InputFrame),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct OutputSignal {
    #[prost(oneof = "output_signal::Frame", tags = "1")]
    pub frame: Option<output_signal::Frame>,
}

pub mod output_signal {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Frame {
        #[prost(message, tag = "1")]
        Data(super::OutputFrame),
    }
}

impl InputSignal {
    pub fn start<I, S>(content_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            frame: Some(input_signal::Frame::Start(StartFrame {
                expected_content_types: content_types.into_iter().map(Into::into).collect(),
            })),
        }
    }

    pub fn data(
        arg_index: i32,
        content_type: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            frame: Some(input_signal::Frame::Data(InputFrame {
                content_type: content_type.into(),
                payload: payload.into(),
                arg_index,
            })),
        }
    }
}

impl OutputSignal {
    pub fn data(
        result_index: i32,
        content_type: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            frame: Some(output_signal::Frame::Data(OutputFrame {
                content_type: content_type.into(),
                payload: payload.into(),
                result_index,
            })),
        }
    }

    /// The output frame carried by this signal, if any.
    pub fn frame(&self) -> Option<&OutputFrame> {
        match &self.frame {
            Some(output_signal::Frame::Data(frame)) => Some(frame),
            None => None,
        }
    }
}

/// The discriminated unit exchanged with the transport.
///
/// Inbound envelopes are converted into [`Signal::Start`] or [`Signal::Data`]; the pipeline only
/// ever emits [`Signal::Output`], which converts back into an [`OutputSignal`] envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Start {
        expected_output_content_types: Vec<String>,
    },
    Data {
        arg_index: usize,
        content_type: String,
        payload: Bytes,
    },
    Output {
        result_index: usize,
        content_type: String,
        payload: Bytes,
    },
}

impl Signal {
    /// Decode a raw envelope received from a transport that hands over undecoded bytes.
    pub fn decode(raw: &[u8]) -> Result<Self, PipelineError> {
        let envelope = InputSignal::decode(raw)
            .map_err(|e| PipelineError::InputTypeInvalid(format!("invalid input type: {e}")))?;
        Self::try_from(envelope)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Signal::Start { .. } => "start",
            Signal::Data { .. } => "data",
            Signal::Output { .. } => "output",
        }
    }
}

impl TryFrom<InputSignal> for Signal {
    type Error = PipelineError;

    fn try_from(envelope: InputSignal) -> Result<Self, Self::Error> {
        match envelope.frame {
            Some(input_signal::Frame::Start(start)) => Ok(Signal::Start {
                expected_output_content_types: start.expected_content_types,
            }),
            Some(input_signal::Frame::Data(data)) => {
                let arg_index = usize::try_from(data.arg_index).map_err(|_| {
                    PipelineError::InputTypeInvalid(format!(
                        "invalid input type: negative argument index {}",
                        data.arg_index
                    ))
                })?;
                Ok(Signal::Data {
                    arg_index,
                    content_type: data.content_type,
                    payload: data.payload,
                })
            }
            None => Err(PipelineError::InputTypeUnsupported(
                "input is neither a start nor a data signal".to_string(),
            )),
        }
    }
}

impl TryFrom<Signal> for OutputSignal {
    type Error = PipelineError;

    fn try_from(signal: Signal) -> Result<Self, Self::Error> {
        match signal {
            Signal::Output {
                result_index,
                content_type,
                payload,
            } => {
                let index = i32::try_from(result_index).map_err(|_| PipelineError::OutputInvalid {
                    index: result_index,
                    message: "result index does not fit the envelope".to_string(),
                })?;
                Ok(OutputSignal::data(index, content_type, payload))
            }
            other => Err(PipelineError::InputTypeUnsupported(format!(
                "{} signals are never emitted outward",
                other.kind()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_envelope_converts() {
        let signal =
            Signal::try_from(InputSignal::start(["text/plain", "application/json"])).unwrap();
        assert_eq!(
            signal,
            Signal::Start {
                expected_output_content_types: vec![
                    "text/plain".to_string(),
                    "application/json".to_string()
                ],
            }
        );
    }

    #[test]
    fn test_empty_envelope_is_unsupported() {
        let err = Signal::try_from(InputSignal::default()).unwrap_err();
        assert!(matches!(err, PipelineError::InputTypeUnsupported(_)));
    }

    #[test]
    fn test_negative_index_is_invalid() {
        let err = Signal::try_from(InputSignal::data(-1, "text/plain", "x")).unwrap_err();
        assert!(matches!(err, PipelineError::InputTypeInvalid(_)));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        // field 1, wire type 7 does not exist
        let err = Signal::decode(&[0x0f, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, PipelineError::InputTypeInvalid(_)));
    }

    #[test]
    fn test_decode_wire_bytes() {
        let raw = InputSignal::data(2, "text/plain", "aha").encode_to_vec();
        let signal = Signal::decode(&raw).unwrap();
        assert_eq!(
            signal,
            Signal::Data {
                arg_index: 2,
                content_type: "text/plain".to_string(),
                payload: Bytes::from_static(b"aha"),
            }
        );
    }

    #[test]
    fn test_only_output_goes_outward() {
        let out = OutputSignal::try_from(Signal::Output {
            result_index: 1,
            content_type: "text/plain".to_string(),
            payload: Bytes::from_static(b"49"),
        })
        .unwrap();
        let frame = out.frame().unwrap();
        assert_eq!(frame.result_index, 1);
        assert_eq!(&frame.payload[..], b"49");

        let start = Signal::Start {
            expected_output_content_types: vec![],
        };
        assert!(OutputSignal::try_from(start).is_err());
    }
}
