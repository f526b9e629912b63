//! Composite search over episodes
//!
//! A search is planned into an index access path, a conjunction of
//! predicates that every returned episode satisfies exactly, and a ranking
//! (cosine similarity or recency) capped at `max_results`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::ann::cosine_similarity;
use crate::episode::{Episode, DEFAULT_MAX_RESULTS, EMBEDDING_DIMENSION};

/// Search request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    /// Raw query text. When non-empty only embedded episodes match.
    #[serde(default)]
    pub query: String,

    /// Precomputed query vector used for similarity ranking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_embedding: Option<Vec<f32>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Only episodes created strictly before this instant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<DateTime<Utc>>,

    /// Only episodes created strictly after this instant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<DateTime<Utc>>,

    /// Every listed tag must be present
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default)]
    pub include_expired: bool,

    /// Result cap; unset or zero means the default of 10
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
}

impl SearchParams {
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_query_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.query_embedding = Some(embedding);
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_before(mut self, before: DateTime<Utc>) -> Self {
        self.before = Some(before);
        self
    }

    pub fn with_after(mut self, after: DateTime<Utc>) -> Self {
        self.after = Some(after);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn including_expired(mut self) -> Self {
        self.include_expired = true;
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    /// Effective result cap
    pub fn limit(&self) -> usize {
        match self.max_results {
            Some(n) if n > 0 => n,
            _ => DEFAULT_MAX_RESULTS,
        }
    }
}

/// A single filter condition
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    HasEmbedding,
    GroupEquals(String),
    SourceEquals(String),
    CreatedBefore(DateTime<Utc>),
    CreatedAfter(DateTime<Utc>),
    /// `expired_at IS NULL OR expired_at > now`
    LiveAt(DateTime<Utc>),
    HasTag(String),
}

impl Predicate {
    pub fn matches(&self, episode: &Episode) -> bool {
        match self {
            Predicate::HasEmbedding => episode.embedding.is_some(),
            Predicate::GroupEquals(group) => &episode.group_id == group,
            Predicate::SourceEquals(source) => &episode.source == source,
            Predicate::CreatedBefore(ts) => episode.created_at.is_some_and(|c| c < *ts),
            Predicate::CreatedAfter(ts) => episode.created_at.is_some_and(|c| c > *ts),
            Predicate::LiveAt(now) => episode.is_live_at(*now),
            Predicate::HasTag(tag) => episode.tags.contains(tag),
        }
    }
}

/// Index chosen to drive the scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessPath {
    Group(String),
    Source(String),
    CreatedAt,
}

/// Result ordering
#[derive(Debug, Clone, PartialEq)]
pub enum Ranking {
    /// Descending cosine similarity to the query vector
    Similarity(Vec<f32>),
    /// Descending created_at
    Recency,
}

/// A planned search
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub access: AccessPath,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    pub predicates: Vec<Predicate>,
    pub ranking: Ranking,
    pub limit: usize,
}

impl QueryPlan {
    /// Plan a search evaluated at `now`
    pub fn build(params: &SearchParams, now: DateTime<Utc>) -> Self {
        let mut predicates = Vec::new();
        if !params.query.is_empty() {
            predicates.push(Predicate::HasEmbedding);
        }
        if let Some(group) = &params.group_id {
            predicates.push(Predicate::GroupEquals(group.clone()));
        }
        if let Some(source) = &params.source {
            predicates.push(Predicate::SourceEquals(source.clone()));
        }
        if let Some(before) = params.before {
            predicates.push(Predicate::CreatedBefore(before));
        }
        if let Some(after) = params.after {
            predicates.push(Predicate::CreatedAfter(after));
        }
        if !params.include_expired {
            predicates.push(Predicate::LiveAt(now));
        }
        predicates.extend(params.tags.iter().cloned().map(Predicate::HasTag));

        let access = match (&params.group_id, &params.source) {
            (Some(group), _) => AccessPath::Group(group.clone()),
            (None, Some(source)) => AccessPath::Source(source.clone()),
            (None, None) => AccessPath::CreatedAt,
        };

        Self {
            access,
            after: params.after,
            before: params.before,
            predicates,
            ranking: ranking_for(params.query_embedding.as_deref()),
            limit: params.limit(),
        }
    }

    pub fn matches(&self, episode: &Episode) -> bool {
        self.predicates.iter().all(|p| p.matches(episode))
    }
}

/// Pick similarity ranking when the query vector is usable
fn ranking_for(query_embedding: Option<&[f32]>) -> Ranking {
    match query_embedding {
        None | Some([]) => Ranking::Recency,
        Some(vector) => match encode_query_vector(vector) {
            Ok(vector) => Ranking::Similarity(vector),
            Err(reason) => {
                log::warn!(
                    "Failed to encode query embedding ({}), ordering by recency",
                    reason
                );
                Ranking::Recency
            }
        },
    }
}

fn encode_query_vector(vector: &[f32]) -> std::result::Result<Vec<f32>, String> {
    if vector.len() != EMBEDDING_DIMENSION {
        return Err(format!(
            "{} dimensions, expected {}",
            vector.len(),
            EMBEDDING_DIMENSION
        ));
    }
    if vector.iter().any(|x| !x.is_finite()) {
        return Err("non-finite component".to_string());
    }
    Ok(vector.to_vec())
}

/// Recency order: created_at descending, then id descending
pub fn recency_order(a: &Episode, b: &Episode) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}

/// Order candidates by the plan's ranking and apply the cap
pub fn rank(mut episodes: Vec<Episode>, ranking: &Ranking, limit: usize) -> Vec<Episode> {
    match ranking {
        Ranking::Recency => episodes.sort_by(recency_order),
        Ranking::Similarity(query) => {
            let mut scored: Vec<(f32, Episode)> = episodes
                .into_iter()
                .map(|episode| {
                    let score = episode
                        .embedding
                        .as_deref()
                        .map(|v| cosine_similarity(query, v))
                        .unwrap_or(f32::NEG_INFINITY);
                    (score, episode)
                })
                .collect();
            scored.sort_by(|(sa, a), (sb, b)| {
                sb.partial_cmp(sa)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| recency_order(a, b))
            });
            episodes = scored.into_iter().map(|(_, episode)| episode).collect();
        }
    }
    episodes.truncate(limit);
    episodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn episode(id: &str, minutes_ago: i64, embedding: Option<Vec<f32>>) -> Episode {
        Episode {
            id: id.to_string(),
            content: format!("episode {id}"),
            source: "test".into(),
            group_id: "default".into(),
            embedding,
            created_at: Some(Utc::now() - Duration::minutes(minutes_ago)),
            ..Default::default()
        }
    }

    fn axis(hot: usize, value: f32) -> Vec<f32> {
        let mut v = vec![0.0; EMBEDDING_DIMENSION];
        v[hot] = value;
        v
    }

    #[test]
    fn test_limit_defaults() {
        assert_eq!(SearchParams::default().limit(), DEFAULT_MAX_RESULTS);
        assert_eq!(SearchParams::default().with_max_results(0).limit(), 10);
        assert_eq!(SearchParams::default().with_max_results(2).limit(), 2);
    }

    #[test]
    fn test_plan_predicates_in_order() {
        let now = Utc::now();
        let params = SearchParams::default()
            .with_query("deploy")
            .with_group("ops")
            .with_tags(["a", "b"]);
        let plan = QueryPlan::build(&params, now);

        assert_eq!(plan.access, AccessPath::Group("ops".into()));
        assert_eq!(
            plan.predicates,
            vec![
                Predicate::HasEmbedding,
                Predicate::GroupEquals("ops".into()),
                Predicate::LiveAt(now),
                Predicate::HasTag("a".into()),
                Predicate::HasTag("b".into()),
            ]
        );
        assert_eq!(plan.ranking, Ranking::Recency);
    }

    #[test]
    fn test_access_path_prefers_group_then_source() {
        let now = Utc::now();
        let by_source = QueryPlan::build(&SearchParams::default().with_source("cli"), now);
        assert_eq!(by_source.access, AccessPath::Source("cli".into()));
        let unfiltered = QueryPlan::build(&SearchParams::default().including_expired(), now);
        assert_eq!(unfiltered.access, AccessPath::CreatedAt);
        assert!(unfiltered.predicates.is_empty());
    }

    #[test]
    fn test_bad_query_vector_falls_back_to_recency() {
        let now = Utc::now();
        let short = SearchParams::default().with_query_embedding(vec![0.1, 0.2]);
        assert_eq!(QueryPlan::build(&short, now).ranking, Ranking::Recency);

        let mut nan = axis(0, 1.0);
        nan[3] = f32::NAN;
        let nan = SearchParams::default().with_query_embedding(nan);
        assert_eq!(QueryPlan::build(&nan, now).ranking, Ranking::Recency);

        let good = SearchParams::default().with_query_embedding(axis(0, 1.0));
        assert!(matches!(
            QueryPlan::build(&good, now).ranking,
            Ranking::Similarity(_)
        ));
    }

    #[test]
    fn test_strict_time_bounds() {
        let ep = episode("a", 10, None);
        let created = ep.created_at.unwrap();
        assert!(!Predicate::CreatedBefore(created).matches(&ep));
        assert!(!Predicate::CreatedAfter(created).matches(&ep));
        assert!(Predicate::CreatedBefore(created + Duration::seconds(1)).matches(&ep));
        assert!(Predicate::CreatedAfter(created - Duration::seconds(1)).matches(&ep));
    }

    #[test]
    fn test_rank_by_similarity() {
        let first = episode("first", 30, Some(axis(0, 1.0)));
        let second = episode("second", 1, Some(axis(1, 1.0)));
        let mut query = axis(0, 0.9);
        query[1] = 0.1;

        let ranked = rank(
            vec![second.clone(), first.clone()],
            &Ranking::Similarity(query),
            10,
        );
        assert_eq!(ranked[0].id, "first");
        assert_eq!(ranked[1].id, "second");
    }

    #[test]
    fn test_rank_ties_broken_by_recency_then_id() {
        let created = Utc::now();
        let mut a = episode("a", 0, Some(axis(0, 1.0)));
        let mut b = episode("b", 0, Some(axis(0, 1.0)));
        a.created_at = Some(created);
        b.created_at = Some(created);
        let older = episode("c", 60, Some(axis(0, 1.0)));

        let ranked = rank(
            vec![older, a, b],
            &Ranking::Similarity(axis(0, 1.0)),
            10,
        );
        let ids: Vec<&str> = ranked.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_rank_recency_and_cap() {
        let eps = vec![
            episode("old", 40, None),
            episode("new", 1, None),
            episode("mid", 20, None),
        ];
        let ranked = rank(eps, &Ranking::Recency, 2);
        let ids: Vec<&str> = ranked.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid"]);
    }
}
