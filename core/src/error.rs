use thiserror::Error;

/// Failure of a catalog search. Callers map `Validation` to a client error
/// and `Storage` to a server error.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("{0}")]
    Validation(String),
    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl SearchError {
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
