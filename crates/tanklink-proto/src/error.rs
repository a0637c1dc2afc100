//! Protocol-level error types.

use thiserror::Error;

/// Failure to turn an inbound `(topic, payload)` pair into a typed message.
///
/// Decoding is pure and total over its inputs: every malformed frame maps to
/// one of these variants, never a panic.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The topic does not belong to any channel this client understands.
    #[error("unrecognized topic `{topic}`")]
    UnrecognizedTopic { topic: String },

    /// The payload was not valid JSON, or not the expected shape.
    #[error("malformed payload on `{topic}`: {reason}")]
    MalformedPayload { topic: String, reason: String },

    /// The payload was structurally valid but a required key was absent.
    #[error("payload on `{topic}` is missing `{field}`")]
    MissingField { topic: String, field: &'static str },

    /// The response carried a command code this client has no mapping for.
    #[error("unknown command code {code} on `{topic}`")]
    UnknownCommand { topic: String, code: u32 },
}

/// A command parameter rejected before anything is put on the wire.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Numeric parameter outside the device's accepted range.
    #[error("{field} must be between {min} and {max}, got {value}")]
    Range {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// A parameter that is malformed in some non-numeric way.
    #[error("invalid {parameter}: {reason}")]
    Parameter {
        parameter: &'static str,
        reason: &'static str,
    },
}

impl ValidationError {
    pub(crate) fn range_check(
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    ) -> Result<(), Self> {
        if value < min || value > max {
            return Err(Self::Range {
                field,
                value,
                min,
                max,
            });
        }
        Ok(())
    }
}
