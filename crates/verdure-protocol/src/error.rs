//! Protocol parse/serialize errors.

/// Errors produced while parsing or serializing envelopes.
///
/// None of these are fatal: the dispatcher drops the offending message and
/// keeps the connection.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The text frame was not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// The JSON object had no string `type` field.
    #[error("envelope has no `type` field")]
    MissingType,

    /// The `type` value is not one this client understands.
    #[error("unknown envelope type `{0}`")]
    UnknownType(String),

    /// The `type` was recognized but a required field was missing or of the
    /// wrong shape.
    #[error("malformed `{kind}` envelope: {detail}")]
    Malformed {
        /// The envelope `type` value.
        kind: String,
        /// What serde rejected.
        detail: String,
    },

    /// Serialization failed (should not happen for well-formed envelopes).
    #[error("failed to serialize envelope: {0}")]
    Serialize(String),
}
