use thiserror::Error;

/// Domain error taxonomy. Every operation either fully succeeds or reports
/// exactly one of these; none leaves the store partially updated.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Already registered")]
    Conflict,

    /// Missing, expired, and already-used tokens are deliberately collapsed
    /// into one kind; callers cannot distinguish them.
    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("No access")]
    NoAccess,

    #[error("Subscription limit reached")]
    QuotaExceeded,

    /// The membership oracle could not be asked. Not a denial; state is left
    /// untouched and the caller may retry.
    #[error("Membership check indeterminate")]
    OracleUnknown,

    #[error("Store failure: {0}")]
    Store(#[from] anyhow::Error),
}
