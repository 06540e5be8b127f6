use thiserror::Error;

use crate::capabilities::{ApiError, StoreError};

/// Crate-level error umbrella.
///
/// Logic violations (mismatched result totals, an unsubscribe queue
/// intersecting the subscription set) are reported as warnings, not errors,
/// and entity not-found is an absent slot, not an error — so the umbrella
/// only carries the two failure sources that abort an operation.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("api error: {0}")]
    Api(#[from] ApiError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl CoreError {
    /// HTTP status of the underlying failure, if it was a server response.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api(e) => e.status(),
            Self::Store(_) => None,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
