//! Route handlers for the REST API.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use engram_store::Episode;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::ServerResult;
use crate::handlers::{
    AddMemoryParams, GetEpisodesRequest, SearchQuery, SearchRequest, StatusReport,
    UpdateEpisodeRequest,
};
use crate::memory::MemoryService;

#[derive(Debug, Serialize)]
pub struct AddMemoryResponse {
    pub success: bool,
    pub episode: Episode,
    pub embedded: bool,
}

#[derive(Debug, Serialize)]
pub struct EpisodeList {
    pub episodes: Vec<Episode>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct UpdateResponse {
    pub success: bool,
    pub message: &'static str,
}

/// Liveness; never touches the store
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// OpenAPI description of this API
pub async fn openapi() -> Json<Value> {
    Json(super::openapi::document())
}

/// Readiness; 503 when the store cannot serve a probe query
pub async fn ready(State(service): State<MemoryService>) -> Response {
    match service.ready().await {
        Ok(()) => Json(json!({ "status": "ready" })).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "not ready", "error": e.public_message() })),
            )
                .into_response()
        }
    }
}

pub async fn add_memory(
    State(service): State<MemoryService>,
    Json(params): Json<AddMemoryParams>,
) -> ServerResult<Json<AddMemoryResponse>> {
    let added = service.add_memory(params).await?;
    Ok(Json(AddMemoryResponse {
        success: true,
        episode: added.episode,
        embedded: added.embedded,
    }))
}

pub async fn search_query(
    State(service): State<MemoryService>,
    Query(query): Query<SearchQuery>,
) -> ServerResult<Json<Vec<Episode>>> {
    Ok(Json(service.search(query.into()).await?))
}

pub async fn search_body(
    State(service): State<MemoryService>,
    Json(request): Json<SearchRequest>,
) -> ServerResult<Json<Vec<Episode>>> {
    Ok(Json(service.search(request).await?))
}

pub async fn list_episodes(
    State(service): State<MemoryService>,
    Query(request): Query<GetEpisodesRequest>,
) -> ServerResult<Json<EpisodeList>> {
    let episodes = service.get_episodes(request).await?;
    Ok(Json(EpisodeList {
        count: episodes.len(),
        episodes,
    }))
}

pub async fn get_episode(
    State(service): State<MemoryService>,
    Path(id): Path<String>,
) -> ServerResult<Json<Episode>> {
    Ok(Json(service.get_episode(&id).await?))
}

pub async fn update_episode(
    State(service): State<MemoryService>,
    Path(id): Path<String>,
    Json(request): Json<UpdateEpisodeRequest>,
) -> ServerResult<Json<UpdateResponse>> {
    service.update_episode(&id, request).await?;
    Ok(Json(UpdateResponse {
        success: true,
        message: "Episode updated successfully",
    }))
}

pub async fn status(State(service): State<MemoryService>) -> Json<StatusReport> {
    Json(service.status().await)
}
