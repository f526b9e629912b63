//! Episode types and builders
//!
//! An episode is one unit of agent memory: immutable content plus a small
//! set of mutable annotations (tags, expiry, metadata).

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::temporal;

/// Dimensionality of the embedding column
pub const EMBEDDING_DIMENSION: usize = 768;

/// Group assigned when the caller leaves `group_id` empty
pub const DEFAULT_GROUP_ID: &str = "default";

/// Result cap applied when a search leaves `max_results` unset or zero
pub const DEFAULT_MAX_RESULTS: usize = 10;

/// A stored unit of agent memory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    /// Unique id, assigned on insert when empty
    #[serde(default)]
    pub id: String,

    /// Text body
    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Identifier of the writing client
    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_description: Option<String>,

    /// Namespace partition, "default" when empty at insert
    #[serde(default)]
    pub group_id: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Fixed-dimension embedding, absent when the gateway was unavailable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    /// Assigned by the store on insert when unset
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    /// When the fact became true
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_at: Option<DateTime<Utc>>,

    /// Excluded from default searches once in the past
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<DateTime<Utc>>,

    /// Opaque JSON document, returned verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

impl Episode {
    /// Create a builder for an episode
    pub fn builder() -> EpisodeBuilder {
        EpisodeBuilder::new()
    }

    /// Whether the episode is visible to searches that exclude expired rows
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        temporal::is_live(self.expired_at, now)
    }

    /// Whether the episode carries every one of the given tags
    pub fn has_all_tags(&self, tags: &[String]) -> bool {
        tags.iter().all(|tag| self.tags.contains(tag))
    }

    /// Fill server-assigned fields that the caller left empty. created_at
    /// is kept at microsecond precision, matching the index key resolution.
    pub(crate) fn apply_insert_defaults(&mut self, now: DateTime<Utc>) {
        if self.id.is_empty() {
            self.id = uuid::Uuid::new_v4().to_string();
        }
        self.created_at = Some(self.created_at.unwrap_or(now).trunc_subsecs(6));
        if self.group_id.is_empty() {
            self.group_id = DEFAULT_GROUP_ID.to_string();
        }
    }
}

/// Builder for creating episodes
#[derive(Debug, Default)]
pub struct EpisodeBuilder {
    episode: Episode,
}

impl EpisodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an explicit id
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.episode.id = id.into();
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.episode.content = content.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.episode.name = Some(name.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.episode.source = source.into();
        self
    }

    pub fn source_model(mut self, model: impl Into<String>) -> Self {
        self.episode.source_model = Some(model.into());
        self
    }

    pub fn source_description(mut self, description: impl Into<String>) -> Self {
        self.episode.source_description = Some(description.into());
        self
    }

    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.episode.group_id = group_id.into();
        self
    }

    /// Add a single tag
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.episode.tags.push(tag.into());
        self
    }

    /// Replace all tags
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.episode.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn embedding(mut self, embedding: Vec<f32>) -> Self {
        self.episode.embedding = Some(embedding);
        self
    }

    /// Set the embedding only when one is available
    pub fn maybe_embedding(mut self, embedding: Option<Vec<f32>>) -> Self {
        self.episode.embedding = embedding;
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.episode.created_at = Some(at);
        self
    }

    pub fn valid_at(mut self, at: DateTime<Utc>) -> Self {
        self.episode.valid_at = Some(at);
        self
    }

    pub fn expired_at(mut self, at: DateTime<Utc>) -> Self {
        self.episode.expired_at = Some(at);
        self
    }

    pub fn metadata(mut self, metadata: impl Into<String>) -> Self {
        self.episode.metadata = Some(metadata.into());
        self
    }

    /// Build the Episode
    pub fn build(self) -> Result<Episode, EpisodeBuilderError> {
        if self.episode.content.trim().is_empty() {
            return Err(EpisodeBuilderError::MissingContent);
        }
        if self.episode.source.trim().is_empty() {
            return Err(EpisodeBuilderError::MissingSource);
        }
        Ok(self.episode)
    }
}

/// Errors that can occur when building an Episode
#[derive(Debug, thiserror::Error)]
pub enum EpisodeBuilderError {
    #[error("Missing required field: content")]
    MissingContent,
    #[error("Missing required field: source")]
    MissingSource,
}

/// Sparse patch applied by `update`. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

impl UpdateParams {
    /// True when no field is set
    pub fn is_empty(&self) -> bool {
        self.tags.is_none() && self.expired_at.is_none() && self.metadata.is_none()
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_expired_at(mut self, at: DateTime<Utc>) -> Self {
        self.expired_at = Some(at);
        self
    }

    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_builder_requires_content_and_source() {
        assert!(matches!(
            Episode::builder().source("cli").build(),
            Err(EpisodeBuilderError::MissingContent)
        ));
        assert!(matches!(
            Episode::builder().content("note").build(),
            Err(EpisodeBuilderError::MissingSource)
        ));
    }

    #[test]
    fn test_builder_keeps_tag_order() {
        let episode = Episode::builder()
            .content("deploy finished")
            .source("ci")
            .tag("zeta")
            .tag("alpha")
            .build()
            .unwrap();
        assert_eq!(episode.tags, vec!["zeta", "alpha"]);
        assert!(episode.has_all_tags(&["alpha".to_string()]));
        assert!(!episode.has_all_tags(&["alpha".to_string(), "beta".to_string()]));
    }

    #[test]
    fn test_insert_defaults() {
        let now = Utc::now();
        let mut episode = Episode::builder()
            .content("x")
            .source("y")
            .build()
            .unwrap();
        episode.apply_insert_defaults(now);

        assert!(!episode.id.is_empty());
        assert_eq!(episode.group_id, DEFAULT_GROUP_ID);
        assert_eq!(episode.created_at, Some(now.trunc_subsecs(6)));

        // Caller-supplied values survive
        let mut explicit = Episode::builder()
            .id("fixed")
            .content("x")
            .source("y")
            .group_id("team")
            .build()
            .unwrap();
        explicit.apply_insert_defaults(now);
        assert_eq!(explicit.id, "fixed");
        assert_eq!(explicit.group_id, "team");
    }

    #[test]
    fn test_liveness() {
        let now = Utc::now();
        let mut episode = Episode::default();
        assert!(episode.is_live_at(now));
        episode.expired_at = Some(now - Duration::minutes(1));
        assert!(!episode.is_live_at(now));
        episode.expired_at = Some(now + Duration::minutes(1));
        assert!(episode.is_live_at(now));
    }

    #[test]
    fn test_update_params_empty() {
        assert!(UpdateParams::default().is_empty());
        assert!(!UpdateParams::default().with_metadata("{}").is_empty());
    }
}
