use thiserror::Error;

/// Errors that can occur while writing or reading bundled messages
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BundleError {
    /// An unreliable message does not fit in a single packet
    #[error("Message of {size} bytes exceeds the maximum of {max} bytes for an unreliable message")]
    MessageTooLong { size: usize, max: usize },

    /// Messages cannot be added once the bundle has been finalised
    #[error("Bundle has already been finalised")]
    AlreadyFinalised,

    /// A delivered message has an unknown kind byte
    #[error("Unknown message kind {kind}")]
    UnknownMessageKind { kind: u8 },

    /// A delivered message is cut short
    #[error("Message needs {needed} bytes but only {remaining} remain")]
    TruncatedMessage { needed: usize, remaining: usize },
}
