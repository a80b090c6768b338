//! Sample functions used to exercise the invoker end to end.
//!
//! Numbers arrive either as JSON numbers or as their text form (`text/plain` inputs decode to
//! strings); integers stay integers until squaring them would overflow.

use std::collections::VecDeque;

use futures::StreamExt;
use futures::future::try_join;
use serde_json::Value;

use crate::channel::{Arguments, ChannelClosed};
use crate::function::{FunctionError, Invocation, UserFunction};

const WINDOW: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn parse(value: &Value) -> Result<Self, FunctionError> {
        let parsed = match value {
            Value::Number(n) => n
                .as_i64()
                .map(Number::Int)
                .or_else(|| n.as_f64().map(Number::Float)),
            Value::String(text) => {
                let text = text.trim();
                text.parse::<i64>()
                    .map(Number::Int)
                    .ok()
                    .or_else(|| text.parse::<f64>().ok().map(Number::Float))
            }
            _ => None,
        };
        parsed.ok_or_else(|| FunctionError::new(format!("{value} is not a number")))
    }

    fn as_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Float(f) => f,
        }
    }

    fn square(self) -> Self {
        match self {
            Number::Int(n) => n
                .checked_mul(n)
                .map(Number::Int)
                .unwrap_or(Number::Float(self.as_f64() * self.as_f64())),
            Number::Float(f) => Number::Float(f * f),
        }
    }

    fn add(self, other: Self) -> Self {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a
                .checked_add(b)
                .map(Number::Int)
                .unwrap_or(Number::Float(a as f64 + b as f64)),
            (a, b) => Number::Float(a.as_f64() + b.as_f64()),
        }
    }
}

impl From<Number> for Value {
    fn from(number: Number) -> Self {
        match number {
            Number::Int(n) => Value::from(n),
            Number::Float(f) => Value::from(f),
        }
    }
}

fn closed(err: ChannelClosed) -> FunctionError {
    FunctionError::new(err.to_string())
}

/// Request-reply: one number in, its square out.
pub fn square() -> UserFunction {
    UserFunction::request_reply("square", |value: Value| {
        Number::parse(&value).map(|n| n.square().into())
    })
}

/// Streaming form of [`square`]: one input of numbers, one output of their squares.
pub fn streaming_square() -> UserFunction {
    UserFunction::streaming("streaming-square", 2, |args: Arguments| {
        let ([mut numbers], [mut squares]) = args.into_arrays::<1, 1>()?;
        Ok(Box::pin(async move {
            while let Some(value) = numbers.next().await {
                let squared = Number::parse(&value)?.square();
                squares.send(squared).map_err(closed)?;
            }
            squares.end();
            Ok::<(), FunctionError>(())
        }) as Invocation)
    })
}

/// Emits the sum of the squares of the last three numbers, once three have been seen.
pub fn windowed_sum_of_squares() -> UserFunction {
    UserFunction::streaming("windowed-sum-of-squares", 2, |args: Arguments| {
        let ([mut numbers], [mut sums]) = args.into_arrays::<1, 1>()?;
        Ok(Box::pin(async move {
            let mut window = VecDeque::with_capacity(WINDOW);
            while let Some(value) = numbers.next().await {
                if window.len() == WINDOW {
                    window.pop_front();
                }
                window.push_back(Number::parse(&value)?.square());
                if window.len() == WINDOW {
                    let sum = window
                        .iter()
                        .copied()
                        .fold(Number::Int(0), Number::add);
                    sums.send(sum).map_err(closed)?;
                }
            }
            sums.end();
            Ok::<(), FunctionError>(())
        }) as Invocation)
    })
}

/// Two inputs, two outputs: squares the numbers of the first input and doubles each word of the
/// second. The two inputs are consumed independently.
pub fn repeater() -> UserFunction {
    UserFunction::streaming("repeater", 4, |args: Arguments| {
        let ([mut numbers, mut words], [mut squares, mut repeated]) =
            args.into_arrays::<2, 2>()?;

        let squaring = async move {
            while let Some(value) = numbers.next().await {
                squares
                    .send(Number::parse(&value)?.square())
                    .map_err(closed)?;
            }
            squares.end();
            Ok::<(), FunctionError>(())
        };

        let repeating = async move {
            while let Some(word) = words.next().await {
                let word = match word {
                    Value::String(word) => word,
                    other => other.to_string(),
                };
                repeated.send(word.repeat(2)).map_err(closed)?;
            }
            repeated.end();
            Ok::<(), FunctionError>(())
        };

        Ok(Box::pin(async move {
            try_join(squaring, repeating).await?;
            Ok::<(), FunctionError>(())
        }) as Invocation)
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::function::{FunctionBody, normalize};

    fn apply(function: &UserFunction, value: Value) -> Result<Value, FunctionError> {
        match function.body() {
            FunctionBody::RequestReply(f) => f(value),
            FunctionBody::Streaming(_) => panic!("not a request-reply function"),
        }
    }

    #[test]
    fn test_square_accepts_numbers_and_text() {
        let square = square();
        assert_eq!(apply(&square, json!(7)).unwrap(), json!(49));
        assert_eq!(apply(&square, json!("-3")).unwrap(), json!(9));
        assert_eq!(apply(&square, json!("1.5")).unwrap(), json!(2.25));
        assert_eq!(
            apply(&square, json!("seven")).unwrap_err().message,
            "\"seven\" is not a number"
        );
    }

    #[test]
    fn test_square_overflow_falls_back_to_float() {
        let squared = apply(&square(), json!(i64::MAX)).unwrap();
        assert!(squared.is_f64());
    }

    #[test]
    fn test_sum_stays_integral() {
        let sum = [1, 4, 9]
            .into_iter()
            .map(Number::Int)
            .fold(Number::Int(0), Number::add);
        assert_eq!(sum, Number::Int(14));
    }

    #[test]
    fn test_declared_shapes() {
        assert_eq!(normalize(&square()).unwrap().parameter_count(), 2);
        assert_eq!(streaming_square().parameter_count(), 2);
        assert_eq!(windowed_sum_of_squares().parameter_count(), 2);
        assert_eq!(repeater().parameter_count(), 4);
    }
}
