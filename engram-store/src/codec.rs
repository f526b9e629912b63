//! Conversion between episodes and stored rows
//!
//! Decoding is exhaustive over the value shapes the engine can hand back for
//! each column; anything else is a decode error rather than silent data loss.

use chrono::{DateTime, Utc};

use crate::episode::Episode;
use crate::error::{Result, StoreError};
use crate::schema::col;
use crate::value::{Row, Value};

/// Encode an episode into row order. Empty tags, embeddings and metadata
/// become NULL.
pub fn encode_episode(episode: &Episode) -> Row {
    let mut row = vec![Value::Null; col::COUNT];
    row[col::ID] = Value::Varchar(episode.id.clone());
    row[col::CONTENT] = Value::Varchar(episode.content.clone());
    row[col::NAME] = opt_text(&episode.name);
    row[col::SOURCE] = Value::Varchar(episode.source.clone());
    row[col::SOURCE_MODEL] = opt_text(&episode.source_model);
    row[col::SOURCE_DESCRIPTION] = opt_text(&episode.source_description);
    row[col::GROUP_ID] = Value::Varchar(episode.group_id.clone());
    row[col::TAGS] = encode_tags(&episode.tags);
    row[col::EMBEDDING] = match &episode.embedding {
        Some(v) if !v.is_empty() => Value::FloatArray(v.clone()),
        _ => Value::Null,
    };
    row[col::CREATED_AT] = opt_timestamp(episode.created_at);
    row[col::VALID_AT] = opt_timestamp(episode.valid_at);
    row[col::EXPIRED_AT] = opt_timestamp(episode.expired_at);
    row[col::METADATA] = encode_metadata(episode.metadata.as_deref());
    row
}

pub fn encode_tags(tags: &[String]) -> Value {
    if tags.is_empty() {
        Value::Null
    } else {
        Value::List(tags.iter().cloned().map(Value::Varchar).collect())
    }
}

pub fn encode_metadata(metadata: Option<&str>) -> Value {
    match metadata {
        Some(text) if !text.is_empty() => Value::Json(text.to_string()),
        _ => Value::Null,
    }
}

fn opt_text(value: &Option<String>) -> Value {
    value.clone().map(Value::Varchar).unwrap_or(Value::Null)
}

fn opt_timestamp(value: Option<DateTime<Utc>>) -> Value {
    value.map(Value::TimestampTz).unwrap_or(Value::Null)
}

/// Decode a stored row
pub fn decode_episode(row: Row) -> Result<Episode> {
    if row.len() != col::COUNT {
        return Err(StoreError::decode(format!(
            "row has {} columns, expected {}",
            row.len(),
            col::COUNT
        )));
    }
    let mut values = row.into_iter();
    let mut next = || values.next().unwrap_or(Value::Null);

    let id = required_text("id", next())?;
    let content = required_text("content", next())?;
    let name = optional_text("name", next())?;
    let source = required_text("source", next())?;
    let source_model = optional_text("source_model", next())?;
    let source_description = optional_text("source_description", next())?;
    let group_id = required_text("group_id", next())?;
    let tags = decode_tags(next())?;
    let embedding = decode_embedding(next())?;
    let created_at = Some(required_timestamp("created_at", next())?);
    let valid_at = optional_timestamp("valid_at", next())?;
    let expired_at = optional_timestamp("expired_at", next())?;
    let metadata = decode_metadata(next())?;

    Ok(Episode {
        id,
        content,
        name,
        source,
        source_model,
        source_description,
        group_id,
        tags,
        embedding,
        created_at,
        valid_at,
        expired_at,
        metadata,
    })
}

fn unexpected(column: &str, value: &Value) -> StoreError {
    StoreError::decode(format!(
        "unexpected {} value in column {}",
        value.type_name(),
        column
    ))
}

fn required_text(column: &str, value: Value) -> Result<String> {
    match value {
        Value::Varchar(s) => Ok(s),
        other => Err(unexpected(column, &other)),
    }
}

fn optional_text(column: &str, value: Value) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::Varchar(s) => Ok(Some(s)),
        other => Err(unexpected(column, &other)),
    }
}

fn required_timestamp(column: &str, value: Value) -> Result<DateTime<Utc>> {
    optional_timestamp(column, value)?
        .ok_or_else(|| StoreError::decode(format!("column {column} is NULL")))
}

fn optional_timestamp(column: &str, value: Value) -> Result<Option<DateTime<Utc>>> {
    match value {
        Value::Null => Ok(None),
        Value::TimestampTz(ts) => Ok(Some(ts)),
        Value::Timestamp(naive) => Ok(Some(crate::temporal::assume_utc(naive))),
        other => Err(unexpected(column, &other)),
    }
}

/// Tags come back as a list of strings
pub fn decode_tags(value: Value) -> Result<Vec<String>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::List(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Varchar(s) => Ok(s),
                other => Err(unexpected("tags", &other)),
            })
            .collect(),
        other => Err(unexpected("tags", &other)),
    }
}

/// Embeddings come back as a float array or a generic list of numbers
pub fn decode_embedding(value: Value) -> Result<Option<Vec<f32>>> {
    match value {
        Value::Null => Ok(None),
        Value::FloatArray(v) => Ok(Some(v)),
        Value::List(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Float(f) => Ok(f),
                Value::Double(d) => Ok(d as f32),
                other => Err(unexpected("embedding", &other)),
            })
            .collect::<Result<Vec<f32>>>()
            .map(Some),
        other => Err(unexpected("embedding", &other)),
    }
}

/// Metadata text is returned verbatim; structured values are re-encoded
pub fn decode_metadata(value: Value) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::Json(text) | Value::Varchar(text) => Ok(Some(text)),
        structured @ (Value::Struct(_) | Value::List(_)) => {
            let json = to_json(structured)?;
            Ok(Some(serde_json::to_string(&json)?))
        }
        other => Err(unexpected("metadata", &other)),
    }
}

fn to_json(value: Value) -> Result<serde_json::Value> {
    use serde_json::Value as Json;

    Ok(match value {
        Value::Null => Json::Null,
        Value::Boolean(b) => Json::Bool(b),
        Value::BigInt(i) => Json::from(i),
        Value::Double(d) => serde_json::Number::from_f64(d)
            .map(Json::Number)
            .ok_or_else(|| StoreError::decode("non-finite number in metadata"))?,
        Value::Float(f) => serde_json::Number::from_f64(f64::from(f))
            .map(Json::Number)
            .ok_or_else(|| StoreError::decode("non-finite number in metadata"))?,
        Value::Varchar(s) => Json::String(s),
        Value::Json(text) => serde_json::from_str(&text)?,
        Value::FloatArray(v) => Json::Array(
            v.into_iter()
                .map(|f| to_json(Value::Float(f)))
                .collect::<Result<_>>()?,
        ),
        Value::List(items) => Json::Array(items.into_iter().map(to_json).collect::<Result<_>>()?),
        Value::Struct(fields) => Json::Object(
            fields
                .into_iter()
                .map(|(k, v)| Ok((k, to_json(v)?)))
                .collect::<Result<_>>()?,
        ),
        Value::Timestamp(naive) => Json::String(naive.to_string()),
        Value::TimestampTz(ts) => Json::String(ts.to_rfc3339()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Episode {
        Episode {
            id: "ep-1".into(),
            content: "the build cache lives in /var/cache".into(),
            name: Some("cache location".into()),
            source: "agent".into(),
            source_model: Some("model-x".into()),
            source_description: None,
            group_id: "ops".into(),
            tags: vec!["infra".into(), "cache".into()],
            embedding: Some(vec![0.25, -1.5, 3.0]),
            created_at: Some(Utc::now()),
            valid_at: None,
            expired_at: None,
            metadata: Some(r#"{ "k": [1, 2] }"#.into()),
        }
    }

    #[test]
    fn test_encode_decode_preserves_fields() {
        let episode = sample();
        let decoded = decode_episode(encode_episode(&episode)).unwrap();
        assert_eq!(decoded, episode);
    }

    #[test]
    fn test_empty_collections_become_null() {
        let mut episode = sample();
        episode.tags.clear();
        episode.embedding = Some(Vec::new());
        episode.metadata = Some(String::new());

        let row = encode_episode(&episode);
        assert!(row[col::TAGS].is_null());
        assert!(row[col::EMBEDDING].is_null());
        assert!(row[col::METADATA].is_null());

        let decoded = decode_episode(row).unwrap();
        assert!(decoded.tags.is_empty());
        assert!(decoded.embedding.is_none());
        assert!(decoded.metadata.is_none());
    }

    #[test]
    fn test_embedding_from_generic_list() {
        let value = Value::List(vec![Value::Float(1.0), Value::Double(0.5)]);
        assert_eq!(decode_embedding(value).unwrap(), Some(vec![1.0, 0.5]));
        assert!(decode_embedding(Value::List(vec![Value::Varchar("x".into())])).is_err());
    }

    #[test]
    fn test_unrecognized_shapes_fail() {
        assert!(decode_tags(Value::Varchar("a,b".into())).is_err());
        assert!(decode_tags(Value::List(vec![Value::BigInt(1)])).is_err());
        assert!(decode_metadata(Value::BigInt(7)).is_err());
        assert!(decode_embedding(Value::Json("[1,2]".into())).is_err());
    }

    #[test]
    fn test_structured_metadata_reencoded() {
        let value = Value::Struct(vec![
            ("flag".into(), Value::Boolean(true)),
            (
                "items".into(),
                Value::List(vec![Value::BigInt(1), Value::Varchar("two".into())]),
            ),
        ]);
        assert_eq!(
            decode_metadata(value).unwrap().as_deref(),
            Some(r#"{"flag":true,"items":[1,"two"]}"#)
        );
    }

    #[test]
    fn test_wrong_arity_rejected() {
        assert!(decode_episode(vec![Value::Null; 3]).is_err());
    }
}
