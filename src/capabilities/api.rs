use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::fetch::FetchKey;
use crate::model::{GameId, ModFilter, ModId, ModProfile, RequestPage};

/// Largest page the remote service will return in a single response.
pub const MAX_PAGE_SIZE: usize = 100;

/// Failure of a single API operation.
///
/// `Status` carries the HTTP status of a completed-but-unsuccessful
/// response; `Connection` is a transport failure with no status at all.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("connection failed: {message}")]
    Connection { message: String },

    #[error("server responded {status}: {message}")]
    Status { status: u16, message: String },

    #[error("request abandoned before completion")]
    Cancelled,
}

impl ApiError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Connection { .. } | Self::Cancelled => None,
        }
    }

    /// Whether retrying the same request could reasonably succeed.
    /// Retry itself is caller policy; the core never retries internally.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } => true,
            Self::Status { status, .. } => {
                matches!(status, 408 | 429) || (500..600).contains(status)
            }
            Self::Cancelled => false,
        }
    }

    #[must_use]
    pub fn is_auth_rejection(&self) -> bool {
        self.status() == Some(401)
    }
}

/// The injected REST capability.
///
/// The core never talks to the wire itself: all remote access goes through
/// an implementation of this trait supplied by the host. Implementations
/// own authentication headers, timeouts, and rate limiting.
#[async_trait]
pub trait ModApiClient: Send + Sync {
    /// One page of the mod catalogue matching `filter`.
    async fn fetch_mods_page(
        &self,
        filter: &ModFilter,
        offset: usize,
        limit: usize,
    ) -> Result<RequestPage<ModProfile>, ApiError>;

    /// A single mod record.
    async fn fetch_mod(&self, id: ModId) -> Result<ModProfile, ApiError>;

    /// One page of the authenticated user's subscriptions for `game_id`.
    async fn fetch_subscriptions_page(
        &self,
        game_id: GameId,
        offset: usize,
        limit: usize,
    ) -> Result<RequestPage<ModProfile>, ApiError>;

    async fn subscribe(&self, id: ModId) -> Result<(), ApiError>;

    async fn unsubscribe(&self, id: ModId) -> Result<(), ApiError>;

    /// Raw byte fetch for URL-addressed resources (logos, images).
    async fn fetch_url(&self, key: &FetchKey) -> Result<Bytes, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(ApiError::from_status(404, "gone").status(), Some(404));
        assert_eq!(ApiError::connection("refused").status(), None);
        assert_eq!(ApiError::Cancelled.status(), None);
    }

    #[test]
    fn retryability() {
        assert!(ApiError::connection("reset").is_retryable());
        assert!(ApiError::from_status(503, "unavailable").is_retryable());
        assert!(ApiError::from_status(429, "slow down").is_retryable());
        assert!(!ApiError::from_status(400, "bad request").is_retryable());
        assert!(!ApiError::from_status(404, "missing").is_retryable());
        assert!(!ApiError::Cancelled.is_retryable());
    }

    #[test]
    fn auth_rejection_is_401_only() {
        assert!(ApiError::from_status(401, "token invalid").is_auth_rejection());
        assert!(!ApiError::from_status(403, "forbidden").is_auth_rejection());
        assert!(!ApiError::connection("down").is_auth_rejection());
    }
}
