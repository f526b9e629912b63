//! Application service shared by the MCP and HTTP adapters
//!
//! Embedding and storage calls block, so both are moved onto the blocking
//! pool. Embedding failures degrade the request instead of failing it.

use std::sync::Arc;
use std::time::Duration;

use engram_store::{
    embed_or_degrade, Embedder, EmbeddingOutcome, Episode, EpisodeRepository, SearchParams,
    StoreError,
};

use crate::error::{ServerError, ServerResult};
use crate::handlers::{
    AddMemoryParams, AddedMemory, GetEpisodesRequest, SearchRequest, StatusReport,
    UpdateEpisodeRequest,
};

/// Episode operations exposed to clients
#[derive(Clone)]
pub struct MemoryService {
    repo: Arc<dyn EpisodeRepository>,
    embedder: Arc<dyn Embedder>,
    embed_timeout: Duration,
}

impl MemoryService {
    pub fn new(
        repo: Arc<dyn EpisodeRepository>,
        embedder: Arc<dyn Embedder>,
        embed_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            embedder,
            embed_timeout,
        }
    }

    async fn blocking<T, F>(&self, op: F) -> ServerResult<T>
    where
        F: FnOnce(&dyn EpisodeRepository) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let repo = Arc::clone(&self.repo);
        tokio::task::spawn_blocking(move || op(repo.as_ref()))
            .await
            .map_err(|e| ServerError::Task(e.to_string()))?
            .map_err(ServerError::from)
    }

    async fn embed(&self, text: &str) -> ServerResult<EmbeddingOutcome> {
        let embedder = Arc::clone(&self.embedder);
        let text = text.to_string();
        let timeout = self.embed_timeout;
        tokio::task::spawn_blocking(move || embed_or_degrade(embedder.as_ref(), &text, timeout))
            .await
            .map_err(|e| ServerError::Task(e.to_string()))
    }

    /// Store a new episode, embedding its content when the gateway is up
    pub async fn add_memory(&self, params: AddMemoryParams) -> ServerResult<AddedMemory> {
        // Validate before spending an embedding call
        params.clone().into_episode(None)?;

        let outcome = self.embed(&params.content).await?;
        let embedded = outcome.is_embedded();
        let mut episode = params.into_episode(outcome.into_vector())?;

        let episode = self
            .blocking(move |repo| {
                repo.insert(&mut episode)?;
                Ok(episode)
            })
            .await?;

        tracing::info!(
            id = %episode.id,
            group = %episode.group_id,
            embedded,
            "Stored episode"
        );
        Ok(AddedMemory { episode, embedded })
    }

    /// Composite search; a query that cannot be embedded is ranked by recency
    pub async fn search(&self, request: SearchRequest) -> ServerResult<Vec<Episode>> {
        let mut params = request.to_params()?;
        if let Some(query) = request.query_text() {
            if let Some(vector) = self.embed(query).await?.into_vector() {
                params = params.with_query_embedding(vector);
            }
        }
        self.run_search(params).await
    }

    /// Most recent episodes, newest first
    pub async fn get_episodes(&self, request: GetEpisodesRequest) -> ServerResult<Vec<Episode>> {
        let params = request.to_params()?;
        self.run_search(params).await
    }

    async fn run_search(&self, params: SearchParams) -> ServerResult<Vec<Episode>> {
        let episodes = self.blocking(move |repo| repo.search(&params)).await?;
        tracing::debug!(results = episodes.len(), "Search complete");
        Ok(episodes)
    }

    pub async fn get_episode(&self, id: &str) -> ServerResult<Episode> {
        let id = id.to_string();
        self.blocking(move |repo| repo.get(&id)).await
    }

    pub async fn update_episode(&self, id: &str, request: UpdateEpisodeRequest) -> ServerResult<()> {
        if id.trim().is_empty() {
            return Err(ServerError::validation("episode id is required"));
        }
        let params = request.to_params()?;
        let id = id.to_string();
        self.blocking(move |repo| repo.update(&id, &params)).await
    }

    /// Hard delete; only the CLI calls this
    pub async fn delete_episode(&self, id: &str) -> ServerResult<()> {
        let id = id.to_string();
        self.blocking(move |repo| repo.delete(&id)).await
    }

    pub async fn status(&self) -> StatusReport {
        match self.blocking(|repo| repo.count()).await {
            Ok(episode_count) => StatusReport {
                status: "operational",
                version: env!("CARGO_PKG_VERSION"),
                episode_count,
                database_ready: true,
            },
            Err(e) => {
                tracing::warn!(error = %e, "Status check could not count episodes");
                StatusReport {
                    status: "degraded",
                    version: env!("CARGO_PKG_VERSION"),
                    episode_count: 0,
                    database_ready: false,
                }
            }
        }
    }

    /// Readiness probe: a one-row search must succeed
    pub async fn ready(&self) -> ServerResult<()> {
        let params = SearchParams::default().with_max_results(1);
        self.run_search(params).await.map(|_| ())
    }
}

/// Take sole ownership of a shared handle, waiting up to `grace` for
/// blocking tasks that still hold clones to finish.
pub async fn reclaim<T>(mut shared: Arc<T>, grace: Duration) -> Option<T> {
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        match Arc::try_unwrap(shared) {
            Ok(value) => return Some(value),
            Err(still_shared) if tokio::time::Instant::now() < deadline => {
                shared = still_shared;
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            Err(still_shared) => {
                tracing::warn!(
                    handles = Arc::strong_count(&still_shared),
                    "Handles still outstanding after {:?}",
                    grace
                );
                return None;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use engram_store::{EpisodeStore, EMBEDDING_DIMENSION};
    use tempfile::TempDir;

    /// Embeds by hashing words into buckets, or fails when unavailable
    pub struct BagOfWords {
        pub available: bool,
    }

    impl Embedder for BagOfWords {
        fn embed(&self, text: &str, _timeout: Duration) -> engram_store::Result<Vec<f32>> {
            if !self.available {
                return Err(StoreError::unavailable("connection refused"));
            }
            let mut v = vec![0.0; EMBEDDING_DIMENSION];
            for word in text.split_whitespace() {
                let bucket = word
                    .bytes()
                    .fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize));
                v[bucket % EMBEDDING_DIMENSION] += 1.0;
            }
            Ok(v)
        }

        fn model(&self) -> &str {
            "bag-of-words"
        }
    }

    pub fn service(dir: &TempDir, available: bool) -> MemoryService {
        let store = EpisodeStore::open(dir.path()).unwrap();
        MemoryService::new(
            Arc::new(store),
            Arc::new(BagOfWords { available }),
            Duration::from_millis(100),
        )
    }

    pub fn add(content: &str, tags: &[&str]) -> AddMemoryParams {
        AddMemoryParams {
            content: content.to_string(),
            source: "test-agent".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }
}
