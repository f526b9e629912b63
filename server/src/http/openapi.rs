//! OpenAPI 3.0 description of the REST API, served at `/openapi.json`.

use serde_json::{json, Value};

fn json_body(schema: &str) -> Value {
    json!({
        "content": {
            "application/json": { "schema": { "$ref": format!("#/components/schemas/{schema}") } }
        }
    })
}

fn request_body(schema: &str) -> Value {
    let mut body = json_body(schema);
    body["required"] = json!(true);
    body
}

fn response(description: &str, schema: &str) -> Value {
    let mut response = json_body(schema);
    response["description"] = json!(description);
    response
}

fn error(description: &str) -> Value {
    response(description, "ErrorResponse")
}

fn query_param(name: &str, description: &str, ty: &str) -> Value {
    json!({
        "name": name,
        "in": "query",
        "description": description,
        "schema": { "type": ty }
    })
}

fn episode_id_param() -> Value {
    json!({
        "name": "id",
        "in": "path",
        "required": true,
        "description": "Episode id",
        "schema": { "type": "string" }
    })
}

fn paths() -> Value {
    json!({
        "/health": {
            "get": {
                "summary": "Liveness check",
                "operationId": "getHealth",
                "responses": { "200": response("Server is running", "HealthResponse") }
            }
        },
        "/ready": {
            "get": {
                "summary": "Readiness check",
                "operationId": "getReady",
                "responses": {
                    "200": response("Store can serve queries", "HealthResponse"),
                    "503": response("Store is unavailable", "HealthResponse")
                }
            }
        },
        "/api/v1/memory": {
            "post": {
                "summary": "Add a memory",
                "description": "Store an episode, embedding its content when the gateway is reachable",
                "operationId": "addMemory",
                "requestBody": request_body("AddMemoryRequest"),
                "responses": {
                    "200": response("Episode stored", "AddMemoryResponse"),
                    "400": error("Invalid request"),
                    "500": error("Storage failure")
                }
            }
        },
        "/api/v1/memory/search": {
            "get": {
                "summary": "Search memories",
                "operationId": "searchMemories",
                "parameters": [
                    query_param("query", "Text to rank by similarity", "string"),
                    query_param("group_id", "Group to search", "string"),
                    query_param("source", "Source filter", "string"),
                    query_param("tags", "Comma-separated tags, all required", "string"),
                    query_param("before", "Created before (RFC3339)", "string"),
                    query_param("after", "Created after (RFC3339)", "string"),
                    query_param("include_expired", "Include expired episodes", "boolean"),
                    query_param("max_results", "Result limit; non-positive means 10", "integer")
                ],
                "responses": {
                    "200": response("Matching episodes", "EpisodeArray"),
                    "400": error("Invalid filter")
                }
            },
            "post": {
                "summary": "Search memories with a JSON body",
                "operationId": "searchMemoriesBody",
                "requestBody": request_body("SearchRequest"),
                "responses": {
                    "200": response("Matching episodes", "EpisodeArray"),
                    "400": error("Invalid filter")
                }
            }
        },
        "/api/v1/memory/episodes": {
            "get": {
                "summary": "List recent episodes",
                "operationId": "listEpisodes",
                "parameters": [
                    query_param("group_id", "Group to list", "string"),
                    query_param("before", "Created before (RFC3339)", "string"),
                    query_param("after", "Created after (RFC3339)", "string"),
                    query_param("max_results", "Result limit; non-positive means 10", "integer")
                ],
                "responses": {
                    "200": response("Episodes, newest first", "EpisodeList"),
                    "400": error("Invalid filter")
                }
            }
        },
        "/api/v1/memory/episodes/{id}": {
            "get": {
                "summary": "Fetch an episode",
                "operationId": "getEpisode",
                "parameters": [episode_id_param()],
                "responses": {
                    "200": response("The episode", "Episode"),
                    "404": error("No such episode")
                }
            },
            "put": {
                "summary": "Update tags, expiry or metadata",
                "operationId": "updateEpisode",
                "parameters": [episode_id_param()],
                "requestBody": request_body("UpdateEpisodeRequest"),
                "responses": {
                    "200": response("Episode updated", "UpdateResponse"),
                    "400": error("No updates or invalid value"),
                    "404": error("No such episode")
                }
            }
        },
        "/api/v1/status": {
            "get": {
                "summary": "Memory system status",
                "operationId": "getStatus",
                "responses": { "200": response("Status report", "StatusReport") }
            }
        }
    })
}

fn schemas() -> Value {
    let string = json!({ "type": "string" });
    let timestamp = json!({ "type": "string", "format": "date-time" });
    let tags = json!({ "type": "array", "items": { "type": "string" } });

    json!({
        "Episode": {
            "type": "object",
            "properties": {
                "id": string,
                "content": string,
                "name": string,
                "source": string,
                "source_model": string,
                "source_description": string,
                "group_id": string,
                "tags": tags,
                "created_at": timestamp,
                "valid_at": timestamp,
                "expired_at": timestamp,
                "metadata": string
            }
        },
        "EpisodeArray": { "type": "array", "items": { "$ref": "#/components/schemas/Episode" } },
        "EpisodeList": {
            "type": "object",
            "properties": {
                "episodes": { "$ref": "#/components/schemas/EpisodeArray" },
                "count": { "type": "integer" }
            }
        },
        "AddMemoryRequest": {
            "type": "object",
            "required": ["content", "source"],
            "properties": {
                "content": string,
                "source": string,
                "name": string,
                "source_model": string,
                "source_description": string,
                "group_id": string,
                "tags": tags,
                "valid_at": timestamp,
                "metadata": { "type": "string", "description": "JSON document as text" }
            }
        },
        "AddMemoryResponse": {
            "type": "object",
            "properties": {
                "success": { "type": "boolean" },
                "episode": { "$ref": "#/components/schemas/Episode" },
                "embedded": { "type": "boolean" }
            }
        },
        "SearchRequest": {
            "type": "object",
            "properties": {
                "query": string,
                "group_id": string,
                "source": string,
                "tags": tags,
                "before": timestamp,
                "after": timestamp,
                "include_expired": { "type": "boolean" },
                "max_results": { "type": "integer", "default": 10 }
            }
        },
        "UpdateEpisodeRequest": {
            "type": "object",
            "properties": {
                "tags": tags,
                "expired_at": timestamp,
                "metadata": string
            }
        },
        "UpdateResponse": {
            "type": "object",
            "properties": { "success": { "type": "boolean" }, "message": string }
        },
        "StatusReport": {
            "type": "object",
            "properties": {
                "status": string,
                "version": string,
                "episode_count": { "type": "integer" },
                "database_ready": { "type": "boolean" }
            }
        },
        "HealthResponse": {
            "type": "object",
            "properties": { "status": string, "error": string }
        },
        "ErrorResponse": {
            "type": "object",
            "properties": { "error": string }
        }
    })
}

/// The full OpenAPI document
pub fn document() -> Value {
    json!({
        "openapi": "3.0.0",
        "info": {
            "title": "Engram Memory API",
            "description": "Episodic memory with temporal, tag and semantic search",
            "version": env!("CARGO_PKG_VERSION")
        },
        "paths": paths(),
        "components": { "schemas": schemas() }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refs_resolve() {
        let doc = document();
        let text = doc.to_string();
        let schemas = doc["components"]["schemas"].as_object().unwrap();

        for reference in text.split("#/components/schemas/").skip(1) {
            let name: String = reference
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric())
                .collect();
            assert!(schemas.contains_key(&name), "dangling ref {name}");
        }
    }
}
