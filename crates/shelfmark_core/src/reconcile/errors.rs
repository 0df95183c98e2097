use crate::sources::errors::SourceError;

/// Failures that stop a reconciliation call. Data-quality conflicts never show up here,
/// they are resolved by merging.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// The canonical store rejected a read or write.
    #[error("canonical store failure: {0}")]
    Db(#[from] sqlx::Error),
    /// A source failed in a way that leaves nothing to reconcile.
    #[error("source failure: {0}")]
    Source(#[from] SourceError),
}
