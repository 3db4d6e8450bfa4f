//! Error types for the simulator core.

/// Errors surfaced by core operations that are fatal at their call site.
///
/// Protocol-level anomalies (unknown transaction id, message to/from an
/// unregistered node, duplicate registration) are not represented here —
/// per the error handling policy, those are logged at warning level and
/// never propagate as an `Err`.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// `distance`/`bucket_index` were called with mismatched ID lengths.
    #[error("ID lengths must be equal (got {a} and {b})")]
    InvalidLength { a: usize, b: usize },

    /// `create_response` was called on a request type with no documented
    /// response mapping.
    #[error("cannot automatically determine response type for {0:?}")]
    UnmappableResponse(crate::message::MessageType),

    /// A hex field in a message, scenario entry, or report failed to decode.
    #[error("invalid hex string: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Convenience result type for fallible core operations.
pub type Result<T> = std::result::Result<T, SimError>;
