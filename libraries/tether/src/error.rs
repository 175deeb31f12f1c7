#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Search or registry could not be reached. Retrying is up to the caller.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// The registry rejected a write.
    #[error("write rejected: {0}")]
    WriteConflict(String),
    /// A toggle or fetch named an empty or unknown identifier.
    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),
    /// The live favorites subscription errored out.
    #[error("favorites subscription lost: {0}")]
    SubscriptionLost(String),
}
