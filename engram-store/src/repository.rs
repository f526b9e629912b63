//! Storage port
//!
//! Adapters depend on this trait rather than on [`EpisodeStore`] so that
//! tests can substitute their own implementation.

use crate::episode::{Episode, UpdateParams};
use crate::error::Result;
use crate::search::SearchParams;
use crate::store::EpisodeStore;

/// Blocking episode persistence, safe to share across threads
pub trait EpisodeRepository: Send + Sync {
    /// Persist a new episode, filling in server-assigned fields on the record
    fn insert(&self, episode: &mut Episode) -> Result<String>;

    fn get(&self, id: &str) -> Result<Episode>;

    /// Sparse patch; errors with NoUpdatesProvided or NotFound
    fn update(&self, id: &str, params: &UpdateParams) -> Result<()>;

    /// Hard delete; errors with NotFound
    fn delete(&self, id: &str) -> Result<()>;

    fn search(&self, params: &SearchParams) -> Result<Vec<Episode>>;

    /// Total stored episodes
    fn count(&self) -> Result<usize>;
}

impl EpisodeRepository for EpisodeStore {
    fn insert(&self, episode: &mut Episode) -> Result<String> {
        EpisodeStore::insert(self, episode)
    }

    fn get(&self, id: &str) -> Result<Episode> {
        EpisodeStore::get(self, id)
    }

    fn update(&self, id: &str, params: &UpdateParams) -> Result<()> {
        EpisodeStore::update(self, id, params)
    }

    fn delete(&self, id: &str) -> Result<()> {
        EpisodeStore::delete(self, id)
    }

    fn search(&self, params: &SearchParams) -> Result<Vec<Episode>> {
        EpisodeStore::search(self, params)
    }

    fn count(&self) -> Result<usize> {
        EpisodeStore::count(self)
    }
}
