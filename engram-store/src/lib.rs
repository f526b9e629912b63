//! Engram Episode Store
//!
//! Append-mostly log of agent-memory episodes with vector similarity search.
//!
//! ## Features
//!
//! - **Durable episodes** - RocksDB column families with atomic, synced write batches
//! - **Composite search** - group, source, time, tag and expiry filters ranked by
//!   cosine similarity or recency
//! - **HNSW index** - instant-distance graph over stored embeddings
//! - **Schema migrations** - shadow-table rebuilds swapped in atomically
//! - **Degradable embeddings** - gateway failures never fail a write
//!
//! ## Example
//!
//! ```ignore
//! use engram_store::{
//!     embed_or_degrade, Episode, EpisodeStore, HttpEmbedder, SearchParams, DEFAULT_EMBED_TIMEOUT,
//! };
//!
//! let store = EpisodeStore::open("./engram.db")?;
//! let embedder = HttpEmbedder::new(Default::default());
//!
//! let mut episode = Episode::builder()
//!     .content("Staging deploys need the VPN")
//!     .source("ops-agent")
//!     .tag("deploy")
//!     .build()?;
//! episode.embedding = embed_or_degrade(&embedder, &episode.content, DEFAULT_EMBED_TIMEOUT)
//!     .into_vector();
//! store.insert(&mut episode)?;
//!
//! let hits = store.search(&SearchParams::default().with_tags(["deploy"]))?;
//! ```

pub mod ann;
pub mod codec;
pub mod embedding;
pub mod engine;
pub mod episode;
pub mod error;
pub mod migration;
pub mod repository;
pub mod schema;
pub mod search;
pub mod store;
pub mod temporal;
pub mod value;

// Re-exports for convenience
pub use embedding::{
    embed_or_degrade, CachingEmbedder, Embedder, EmbeddingConfig, EmbeddingOutcome,
    HttpEmbedder, DEFAULT_EMBED_TIMEOUT,
};
pub use episode::{
    Episode, EpisodeBuilder, EpisodeBuilderError, UpdateParams, DEFAULT_GROUP_ID,
    DEFAULT_MAX_RESULTS, EMBEDDING_DIMENSION,
};
pub use error::{ErrorKind, Result, StoreError};
pub use repository::EpisodeRepository;
pub use search::SearchParams;
pub use store::{EpisodeStore, StoreConfig};
