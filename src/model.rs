use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a mod on the remote service.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ModId(pub u32);

impl ModId {
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ModId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the game this client is integrated with.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct GameId(pub u32);

impl GameId {
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct UserId(pub u32);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The last-known remote profile of the local user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
}

/// The subset of the remote mod record the core tracks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModProfile {
    pub id: ModId,
    pub game_id: GameId,
    pub name: String,
    pub logo_url: Option<String>,
    pub date_updated: u64,
}

/// One page of an offset-addressed query result.
///
/// `result_total` is the server-reported count of all results matching the
/// query; it is authoritative and must agree between pages of the same
/// query. `size` is the page size that was requested, which may exceed
/// `items.len()` on the final page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPage<T> {
    pub size: usize,
    pub result_offset: usize,
    pub result_total: usize,
    pub items: Vec<T>,
}

impl<T> RequestPage<T> {
    #[must_use]
    pub fn empty(size: usize, result_offset: usize, result_total: usize) -> Self {
        Self {
            size,
            result_offset,
            result_total,
            items: Vec::new(),
        }
    }

    /// Exclusive end of the logical index range this page covers.
    #[must_use]
    pub fn end_offset(&self) -> usize {
        self.result_offset + self.items.len()
    }

    /// Whether this page is the last one of its query.
    #[must_use]
    pub fn is_tail(&self) -> bool {
        self.result_total <= self.result_offset + self.size
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortField {
    #[default]
    Id,
    Name,
    DateUpdated,
    Popularity,
}

/// Structural query filter. Value equality of the whole filter is the
/// cache key for paged results.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModFilter {
    pub game_id: Option<GameId>,
    pub name_query: Option<String>,
    pub ids: Option<Vec<ModId>>,
    pub sort: SortField,
    pub ascending: bool,
}

impl ModFilter {
    #[must_use]
    pub fn for_game(game_id: GameId) -> Self {
        Self {
            game_id: Some(game_id),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_ids(mut self, ids: Vec<ModId>) -> Self {
        self.ids = Some(ids);
        self
    }

    #[must_use]
    pub fn with_name_query(mut self, query: impl Into<String>) -> Self {
        self.name_query = Some(query.into());
        self
    }

    #[must_use]
    pub fn sorted_by(mut self, sort: SortField, ascending: bool) -> Self {
        self.sort = sort;
        self.ascending = ascending;
        self
    }
}
