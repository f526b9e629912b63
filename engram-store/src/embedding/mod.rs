//! Embedding gateway
//!
//! The store never embeds text itself. Callers go through [`embed_or_degrade`],
//! which turns any gateway failure into [`EmbeddingOutcome::Degraded`] so a
//! write or search proceeds without a vector.

mod cache;
mod client;

use std::time::Duration;

pub use cache::CachingEmbedder;
pub use client::{EmbeddingConfig, HttpEmbedder};

use crate::episode::EMBEDDING_DIMENSION;
use crate::error::Result;

/// Timeout applied to a single embedding call unless configured otherwise
pub const DEFAULT_EMBED_TIMEOUT: Duration = Duration::from_secs(5);

/// Text to vector
pub trait Embedder: Send + Sync {
    /// Embed `text`, giving up after `timeout`
    fn embed(&self, text: &str, timeout: Duration) -> Result<Vec<f32>>;

    /// Model identifier
    fn model(&self) -> &str;
}

impl<E: Embedder + ?Sized> Embedder for std::sync::Arc<E> {
    fn embed(&self, text: &str, timeout: Duration) -> Result<Vec<f32>> {
        (**self).embed(text, timeout)
    }

    fn model(&self) -> &str {
        (**self).model()
    }
}

/// Result of an embedding attempt
#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddingOutcome {
    Embedded(Vec<f32>),
    /// No usable vector; the caller continues without one
    Degraded { reason: String },
}

impl EmbeddingOutcome {
    pub fn is_embedded(&self) -> bool {
        matches!(self, Self::Embedded(_))
    }

    pub fn into_vector(self) -> Option<Vec<f32>> {
        match self {
            Self::Embedded(vector) => Some(vector),
            Self::Degraded { .. } => None,
        }
    }
}

/// Embed `text`, absorbing failures and wrong-length vectors
pub fn embed_or_degrade(embedder: &dyn Embedder, text: &str, timeout: Duration) -> EmbeddingOutcome {
    match embedder.embed(text, timeout) {
        Ok(vector) if vector.len() == EMBEDDING_DIMENSION => {
            log::debug!("Generated embedding with {} dimensions", vector.len());
            EmbeddingOutcome::Embedded(vector)
        }
        Ok(vector) => {
            let reason = format!(
                "model {} returned {} dimensions, expected {}",
                embedder.model(),
                vector.len(),
                EMBEDDING_DIMENSION
            );
            log::warn!("Discarding embedding: {}", reason);
            EmbeddingOutcome::Degraded { reason }
        }
        Err(e) => {
            log::warn!("Failed to generate embedding: {}", e);
            EmbeddingOutcome::Degraded {
                reason: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::StoreError;

    /// Embedder returning a fixed vector or a fixed failure
    pub struct FixedEmbedder {
        pub vector: Option<Vec<f32>>,
    }

    impl Embedder for FixedEmbedder {
        fn embed(&self, _text: &str, _timeout: Duration) -> Result<Vec<f32>> {
            self.vector
                .clone()
                .ok_or_else(|| StoreError::unavailable("connection refused"))
        }

        fn model(&self) -> &str {
            "fixed"
        }
    }
}
