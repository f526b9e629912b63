//! MCP Tool Definitions
//!
//! The five memory tools. Argument names are snake_case and match the
//! HTTP request bodies.

use super::protocol::{PropertySchema, Tool, ToolInputSchema};
use std::collections::BTreeMap;

pub const ADD_MEMORY: &str = "add_memory";
pub const SEARCH: &str = "search";
pub const GET_EPISODES: &str = "get_episodes";
pub const UPDATE_EPISODE: &str = "update_episode";
pub const GET_STATUS: &str = "get_status";

/// Get all available memory tools
pub fn get_all_tools() -> Vec<Tool> {
    vec![
        add_memory_tool(),
        search_tool(),
        get_episodes_tool(),
        update_episode_tool(),
        get_status_tool(),
    ]
}

fn string_prop(description: &'static str) -> PropertySchema {
    PropertySchema {
        property_type: "string",
        description: Some(description),
        default: None,
        items: None,
    }
}

fn integer_prop(description: &'static str, default: u64) -> PropertySchema {
    PropertySchema {
        property_type: "integer",
        description: Some(description),
        default: Some(serde_json::json!(default)),
        items: None,
    }
}

fn boolean_prop(description: &'static str, default: bool) -> PropertySchema {
    PropertySchema {
        property_type: "boolean",
        description: Some(description),
        default: Some(serde_json::json!(default)),
        items: None,
    }
}

fn string_array_prop(description: &'static str) -> PropertySchema {
    PropertySchema {
        property_type: "array",
        description: Some(description),
        default: None,
        items: Some(Box::new(PropertySchema {
            property_type: "string",
            description: None,
            default: None,
            items: None,
        })),
    }
}

fn object_schema(
    properties: Vec<(&'static str, PropertySchema)>,
    required: Vec<&'static str>,
) -> ToolInputSchema {
    ToolInputSchema {
        schema_type: "object",
        properties: properties.into_iter().collect::<BTreeMap<_, _>>(),
        required,
    }
}

fn add_memory_tool() -> Tool {
    Tool {
        name: ADD_MEMORY,
        description: "Store a new episode in memory",
        input_schema: object_schema(
            vec![
                ("content", string_prop("The episode content to store")),
                ("name", string_prop("Human-readable label for the episode")),
                (
                    "source",
                    string_prop(
                        "Identifier for the client writing this memory. Use one value per client so results can be filtered by it later.",
                    ),
                ),
                ("source_model", string_prop("Model that produced the episode")),
                ("source_description", string_prop("Freeform context about the episode")),
                (
                    "group_id",
                    string_prop(
                        "Advanced: namespace for isolating memories. Omit it in almost all cases; the server assigns a default.",
                    ),
                ),
                ("tags", string_array_prop("Tags for categorization")),
                ("valid_at", string_prop("When the information became true (RFC3339)")),
                ("metadata", string_prop("JSON string with additional metadata")),
            ],
            vec!["content", "source"],
        ),
    }
}

fn search_tool() -> Tool {
    Tool {
        name: SEARCH,
        description: "Search episodes using semantic similarity plus optional time, tag, source and group filters. Usually only 'query' is needed.",
        input_schema: object_schema(
            vec![
                (
                    "query",
                    string_prop("Natural language description of what to look for"),
                ),
                ("max_results", integer_prop("Maximum number of results", 10)),
                ("before", string_prop("Only episodes created before this time (RFC3339)")),
                ("after", string_prop("Only episodes created after this time (RFC3339)")),
                (
                    "tags",
                    string_array_prop("Only episodes carrying ALL of these tags"),
                ),
                (
                    "source",
                    string_prop("Advanced: only episodes written by this source client"),
                ),
                (
                    "group_id",
                    string_prop("Advanced: only episodes in this group namespace"),
                ),
                (
                    "include_expired",
                    boolean_prop("Include episodes whose expiry has passed", false),
                ),
            ],
            vec![],
        ),
    }
}

fn get_episodes_tool() -> Tool {
    Tool {
        name: GET_EPISODES,
        description: "Retrieve the most recent episodes, newest first. Call with no arguments for the latest ones.",
        input_schema: object_schema(
            vec![
                ("max_results", integer_prop("Maximum number of episodes", 10)),
                ("before", string_prop("Only episodes created before this time (RFC3339)")),
                ("after", string_prop("Only episodes created after this time (RFC3339)")),
                (
                    "group_id",
                    string_prop("Advanced: only episodes in this group namespace"),
                ),
            ],
            vec![],
        ),
    }
}

fn update_episode_tool() -> Tool {
    Tool {
        name: UPDATE_EPISODE,
        description: "Update the tags, metadata or expiration of an episode. Content is immutable.",
        input_schema: object_schema(
            vec![
                ("id", string_prop("Episode ID to update")),
                ("tags", string_array_prop("Replacement tags")),
                ("expired_at", string_prop("Expiration time (RFC3339)")),
                ("metadata", string_prop("Replacement JSON metadata string")),
            ],
            vec!["id"],
        ),
    }
}

fn get_status_tool() -> Tool {
    Tool {
        name: GET_STATUS,
        description: "Health check for the memory system",
        input_schema: object_schema(vec![], vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_names_unique() {
        let tools = get_all_tools();
        let mut names: Vec<_> = tools.iter().map(|t| t.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), tools.len());
    }

    #[test]
    fn test_required_fields_are_declared() {
        for tool in get_all_tools() {
            for field in &tool.input_schema.required {
                assert!(
                    tool.input_schema.properties.contains_key(field),
                    "{} requires undeclared {}",
                    tool.name,
                    field
                );
            }
        }
    }

    #[test]
    fn test_schema_serialization() {
        let json = serde_json::to_value(add_memory_tool()).unwrap();
        assert_eq!(json["inputSchema"]["type"], "object");
        assert_eq!(json["inputSchema"]["properties"]["tags"]["items"]["type"], "string");
        assert_eq!(json["inputSchema"]["required"], serde_json::json!(["content", "source"]));
    }
}
