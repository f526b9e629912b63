//! Memory request parameters and their conversion into store queries.
//!
//! Both transports deserialize into these types, so field names and
//! timestamp handling are identical over MCP and HTTP.

use chrono::{DateTime, Utc};
use engram_store::{Episode, EpisodeBuilderError, SearchParams, UpdateParams};
use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

/// Parse an optional RFC3339 timestamp. Empty strings count as absent.
pub fn parse_timestamp(field: &str, value: Option<&str>) -> ServerResult<Option<DateTime<Utc>>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => DateTime::parse_from_rfc3339(text)
            .map(|ts| Some(ts.with_timezone(&Utc)))
            .map_err(|_| {
                ServerError::validation(format!("invalid {field} format, use RFC3339"))
            }),
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

/// Non-positive limits fall back to the store default
fn positive_limit(value: Option<i64>) -> Option<usize> {
    value
        .filter(|n| *n > 0)
        .map(|n| usize::try_from(n).unwrap_or(usize::MAX))
}

// ==========================================
// Add Memory
// ==========================================

/// Parameters for storing an episode.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddMemoryParams {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub source_model: Option<String>,
    #[serde(default)]
    pub source_description: Option<String>,
    /// Namespace; the store assigns "default" when absent
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// When the fact became true (RFC3339)
    #[serde(default)]
    pub valid_at: Option<String>,
    /// JSON document as text
    #[serde(default)]
    pub metadata: Option<String>,
}

impl AddMemoryParams {
    /// Build the episode to insert, attaching the embedding when one exists
    pub fn into_episode(self, embedding: Option<Vec<f32>>) -> ServerResult<Episode> {
        let valid_at = parse_timestamp("valid_at", self.valid_at.as_deref())?;

        let mut builder = Episode::builder()
            .content(self.content.as_str())
            .source(self.source.as_str())
            .tags(self.tags.iter().filter(|t| !t.is_empty()).cloned())
            .maybe_embedding(embedding);
        if let Some(name) = non_empty(&self.name) {
            builder = builder.name(name);
        }
        if let Some(model) = non_empty(&self.source_model) {
            builder = builder.source_model(model);
        }
        if let Some(description) = non_empty(&self.source_description) {
            builder = builder.source_description(description);
        }
        if let Some(group) = non_empty(&self.group_id) {
            builder = builder.group_id(group);
        }
        if let Some(at) = valid_at {
            builder = builder.valid_at(at);
        }
        if let Some(metadata) = non_empty(&self.metadata) {
            builder = builder.metadata(metadata);
        }

        builder.build().map_err(|e| match e {
            EpisodeBuilderError::MissingContent => ServerError::validation("content is required"),
            EpisodeBuilderError::MissingSource => ServerError::validation("source is required"),
        })
    }
}

/// Result of storing an episode.
#[derive(Debug, Clone, Serialize)]
pub struct AddedMemory {
    pub episode: Episode,
    /// False when the embedding service was unavailable
    pub embedded: bool,
}

// ==========================================
// Search
// ==========================================

/// Parameters for a composite search.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub before: Option<String>,
    #[serde(default)]
    pub after: Option<String>,
    /// Episodes must carry every one of these
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub include_expired: bool,
    #[serde(default)]
    pub max_results: Option<i64>,
}

impl SearchRequest {
    /// Query text worth embedding
    pub fn query_text(&self) -> Option<&str> {
        non_empty(&self.query)
    }

    /// Store parameters without the query vector
    pub fn to_params(&self) -> ServerResult<SearchParams> {
        let mut params = SearchParams::default().with_tags(self.tags.iter().cloned());
        if let Some(query) = self.query_text() {
            params = params.with_query(query);
        }
        if let Some(group) = non_empty(&self.group_id) {
            params = params.with_group(group);
        }
        if let Some(source) = non_empty(&self.source) {
            params = params.with_source(source);
        }
        if let Some(before) = parse_timestamp("before", self.before.as_deref())? {
            params = params.with_before(before);
        }
        if let Some(after) = parse_timestamp("after", self.after.as_deref())? {
            params = params.with_after(after);
        }
        if self.include_expired {
            params = params.including_expired();
        }
        if let Some(max) = positive_limit(self.max_results) {
            params = params.with_max_results(max);
        }
        Ok(params)
    }
}

/// Query-string form of [`SearchRequest`]; tags are comma-separated.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchQuery {
    pub query: Option<String>,
    pub group_id: Option<String>,
    pub source: Option<String>,
    pub before: Option<String>,
    pub after: Option<String>,
    pub tags: Option<String>,
    #[serde(default)]
    pub include_expired: bool,
    pub max_results: Option<i64>,
}

impl From<SearchQuery> for SearchRequest {
    fn from(q: SearchQuery) -> Self {
        let tags = q
            .tags
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            query: q.query,
            group_id: q.group_id,
            source: q.source,
            before: q.before,
            after: q.after,
            tags,
            include_expired: q.include_expired,
            max_results: q.max_results,
        }
    }
}

// ==========================================
// Episode listing
// ==========================================

/// Parameters for a temporal listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GetEpisodesRequest {
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub before: Option<String>,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub max_results: Option<i64>,
}

impl GetEpisodesRequest {
    pub fn to_params(&self) -> ServerResult<SearchParams> {
        SearchRequest {
            group_id: self.group_id.clone(),
            before: self.before.clone(),
            after: self.after.clone(),
            max_results: self.max_results,
            ..Default::default()
        }
        .to_params()
    }
}

// ==========================================
// Update
// ==========================================

/// Sparse update of an episode's mutable fields.
///
/// An empty `tags` list leaves the stored tags untouched; there is no way
/// to clear tags through an update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateEpisodeRequest {
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default, alias = "expires_at")]
    pub expired_at: Option<String>,
    #[serde(default)]
    pub metadata: Option<String>,
}

impl UpdateEpisodeRequest {
    /// Empty tag lists and empty metadata count as not supplied
    pub fn to_params(&self) -> ServerResult<UpdateParams> {
        let mut params = UpdateParams::default();
        if let Some(tags) = self.tags.as_ref().filter(|t| !t.is_empty()) {
            params = params.with_tags(tags.iter().cloned());
        }
        if let Some(at) = parse_timestamp("expired_at", self.expired_at.as_deref())? {
            params = params.with_expired_at(at);
        }
        if let Some(metadata) = non_empty(&self.metadata) {
            params = params.with_metadata(metadata);
        }
        Ok(params)
    }
}

/// Health summary of the memory system.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub status: &'static str,
    pub version: &'static str,
    pub episode_count: usize,
    pub database_ready: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp("before", None).unwrap(), None);
        assert_eq!(parse_timestamp("before", Some("")).unwrap(), None);
        assert_eq!(
            parse_timestamp("before", Some("2024-03-01T12:00:00+02:00")).unwrap(),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap())
        );

        let err = parse_timestamp("before", Some("yesterday")).unwrap_err();
        assert_eq!(err.to_string(), "invalid before format, use RFC3339");
    }

    #[test]
    fn test_add_memory_params_deserialize() {
        let json = r#"{
            "content": "the staging db moved to port 5433",
            "source": "claude-desktop",
            "source_model": "model-x",
            "tags": ["infra", "db"],
            "valid_at": "2024-01-01T00:00:00Z",
            "metadata": "{\"ticket\": 12}"
        }"#;
        let params: AddMemoryParams = serde_json::from_str(json).unwrap();
        let episode = params.into_episode(None).unwrap();

        assert_eq!(episode.source, "claude-desktop");
        assert_eq!(episode.source_model.as_deref(), Some("model-x"));
        assert_eq!(episode.tags, vec!["infra", "db"]);
        assert!(episode.valid_at.is_some());
        assert!(episode.group_id.is_empty());
        assert!(episode.name.is_none());
    }

    #[test]
    fn test_add_memory_requires_content_and_source() {
        let params: AddMemoryParams = serde_json::from_str(r#"{"source": "cli"}"#).unwrap();
        assert_eq!(
            params.into_episode(None).unwrap_err().to_string(),
            "content is required"
        );

        let params: AddMemoryParams = serde_json::from_str(r#"{"content": "x"}"#).unwrap();
        assert_eq!(
            params.into_episode(None).unwrap_err().to_string(),
            "source is required"
        );
    }

    #[test]
    fn test_add_memory_rejects_bad_valid_at() {
        let params = AddMemoryParams {
            content: "x".into(),
            source: "y".into(),
            valid_at: Some("01/02/2024".into()),
            ..Default::default()
        };
        assert!(matches!(
            params.into_episode(None),
            Err(ServerError::Validation(_))
        ));
    }

    #[test]
    fn test_search_query_splits_tags() {
        let query = SearchQuery {
            tags: Some("alpha, beta,,gamma".into()),
            max_results: Some(3),
            ..Default::default()
        };
        let request = SearchRequest::from(query);
        assert_eq!(request.tags, vec!["alpha", "beta", "gamma"]);

        let params = request.to_params().unwrap();
        assert_eq!(params.limit(), 3);
        assert_eq!(params.tags, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_search_blank_fields_ignored() {
        let request = SearchRequest {
            query: Some("  ".into()),
            group_id: Some(String::new()),
            ..Default::default()
        };
        assert!(request.query_text().is_none());
        let params = request.to_params().unwrap();
        assert!(params.query.is_empty());
        assert!(params.group_id.is_none());
    }

    #[test]
    fn test_update_request_sparse() {
        let request: UpdateEpisodeRequest =
            serde_json::from_str(r#"{"tags": [], "metadata": ""}"#).unwrap();
        assert!(request.to_params().unwrap().is_empty());

        let request: UpdateEpisodeRequest =
            serde_json::from_str(r#"{"expires_at": "2030-01-01T00:00:00Z"}"#).unwrap();
        let params = request.to_params().unwrap();
        assert!(params.expired_at.is_some());
        assert!(params.tags.is_none());
    }

    #[test]
    fn test_non_positive_max_results_uses_default() {
        let request: SearchRequest = serde_json::from_str(r#"{"max_results": -1}"#).unwrap();
        assert_eq!(request.to_params().unwrap().limit(), 10);

        let request: SearchRequest = serde_json::from_str(r#"{"max_results": 0}"#).unwrap();
        assert_eq!(request.to_params().unwrap().limit(), 10);

        let request: GetEpisodesRequest =
            serde_json::from_str(r#"{"max_results": -5}"#).unwrap();
        assert_eq!(request.to_params().unwrap().limit(), 10);

        let request: SearchRequest = serde_json::from_str(r#"{"max_results": 4}"#).unwrap();
        assert_eq!(request.to_params().unwrap().limit(), 4);
    }
}
