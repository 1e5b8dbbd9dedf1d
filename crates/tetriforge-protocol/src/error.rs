//! Error types for the protocol layer.
//!
//! Each crate in Tetriforge defines its own error enum. A `HostError` is
//! always about delivering something to a remote peer; an `OptionsError`
//! is always about a rejected set of game options.

/// A notification could not be delivered to the remote peer.
///
/// Raised by [`Callback::notify`](crate::Callback::notify). The core treats
/// any `HostError` on delivery as a lost connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    /// The peer's delivery channel is gone.
    #[error("connection closed")]
    ConnectionClosed,

    /// The Host failed to start or deliver for another reason.
    #[error("host failure: {0}")]
    Failure(String),
}

/// A set of game options failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionsError {
    /// The weights of an occurrence table do not reach 100.
    #[error("{table} weights sum to {sum}, expected 100")]
    WeightSum { table: &'static str, sum: u64 },

    #[error("{table} is missing {value}")]
    MissingEntry { table: &'static str, value: String },

    #[error("{table} lists {value} more than once")]
    DuplicateEntry { table: &'static str, value: String },

    /// A numeric option is outside its allowed range.
    #[error("{field} = {value} is outside {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
}
