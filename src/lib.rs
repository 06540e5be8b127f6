#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

//! Client-side core for integrating a game with a remote mod service.
//!
//! The crate tracks the local user's subscription state, reconciles it
//! against the server's authoritative (paginated, eventually consistent)
//! subscription list, caches paged query results per filter, and coalesces
//! concurrent fetches for the same resource into a single request. The
//! HTTP transport and durable storage are injected capabilities
//! ([`ModApiClient`], [`UserDataStore`], [`ModStore`]); rendering, image
//! decoding, and platform file-system details live in the host.

pub mod capabilities;
pub mod coalesce;
pub mod error;
pub mod fetch;
pub mod local_user;
pub mod model;
pub mod page_cache;
pub mod profiles;
pub mod subscriptions;

pub use capabilities::{
    ApiError, FileModStore, JsonFileUserStore, MemoryModStore, MemoryUserStore, ModApiClient,
    ModStore, StoreError, UserDataStore, MAX_PAGE_SIZE,
};
pub use error::{CoreError, CoreResult};
pub use fetch::{FetchCoalescer, FetchConfig, FetchKey, FetchKeyError};
pub use local_user::{AuthenticationState, LocalUser};
pub use model::{
    GameId, ModFilter, ModId, ModProfile, RequestPage, SortField, UserId, UserProfile,
};
pub use page_cache::PagedResultCache;
pub use profiles::ModProfileService;
pub use subscriptions::{SubscriptionService, SyncConfig};
