//! Reads an update body sent either as JSON or as `multipart/form-data`.
//!
//! Multipart text parts are coerced into the JSON shape of the request so a
//! single deserializer handles both encodings.

use actix_multipart::Multipart;
use actix_web::http::header;
use actix_web::{web, HttpRequest};
use futures::TryStreamExt;
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};
use crate::services::thumbnails::{UploadedImage, PREVIEW_FIELD, THUMBNAIL_FIELD};

const MAX_JSON_SIZE: usize = 256 * 1024;
const MAX_TEXT_FIELD_SIZE: usize = 64 * 1024;

const BOOLEAN_FIELDS: &[&str] = &["nsfw", "waitTranscoding", "commentsEnabled", "downloadEnabled"];
const INTEGER_FIELDS: &[&str] = &["category", "licence", "privacy", "channelId"];
const NULLABLE_FIELDS: &[&str] = &[
    "category",
    "licence",
    "language",
    "description",
    "support",
    "originallyPublishedAt",
    "scheduleUpdate",
];

#[derive(Debug)]
pub struct RawUpdate {
    pub body: Value,
    pub images: Vec<UploadedImage>,
}

fn bad_request(e: impl std::fmt::Display) -> AppError {
    AppError::BadRequest(e.to_string())
}

pub async fn read_update(
    req: &HttpRequest,
    payload: web::Payload,
    max_image_size: usize,
) -> AppResult<RawUpdate> {
    let is_multipart = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"));

    if is_multipart {
        read_multipart(Multipart::new(req.headers(), payload), max_image_size).await
    } else {
        read_json(payload).await
    }
}

async fn read_json(mut payload: web::Payload) -> AppResult<RawUpdate> {
    let mut bytes = Vec::new();
    while let Some(chunk) = payload.try_next().await.map_err(bad_request)? {
        if bytes.len() + chunk.len() > MAX_JSON_SIZE {
            return Err(AppError::PayloadTooLarge {
                size: bytes.len() + chunk.len(),
                max: MAX_JSON_SIZE,
            });
        }
        bytes.extend_from_slice(&chunk);
    }

    let body = if bytes.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Map::new())
    } else {
        serde_json::from_slice(&bytes).map_err(bad_request)?
    };
    if !body.is_object() {
        return Err(AppError::BadRequest("Body must be a JSON object".to_string()));
    }

    Ok(RawUpdate {
        body,
        images: Vec::new(),
    })
}

async fn read_multipart(mut payload: Multipart, max_image_size: usize) -> AppResult<RawUpdate> {
    let mut fields = Map::new();
    let mut images = Vec::new();

    while let Some(mut field) = payload.try_next().await.map_err(bad_request)? {
        let Some(name) = field.name().map(str::to_owned) else {
            return Err(AppError::BadRequest("No field name".to_string()));
        };

        if name == THUMBNAIL_FIELD || name == PREVIEW_FIELD {
            let content_type = field.content_type().map(|mime| mime.essence_str().to_string());
            let mut data = Vec::new();
            while let Some(chunk) = field.try_next().await.map_err(bad_request)? {
                if data.len() + chunk.len() > max_image_size {
                    return Err(AppError::PayloadTooLarge {
                        size: data.len() + chunk.len(),
                        max: max_image_size,
                    });
                }
                data.extend_from_slice(&chunk);
            }
            images.push(UploadedImage {
                field: name,
                content_type,
                data,
            });
            continue;
        }

        let mut text = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(bad_request)? {
            if text.len() + chunk.len() > MAX_TEXT_FIELD_SIZE {
                return Err(AppError::BadRequest(format!("Field {} is too long", name)));
            }
            text.extend_from_slice(&chunk);
        }
        let text = String::from_utf8(text).map_err(bad_request)?;
        insert_text_field(&mut fields, &name, text);
    }

    Ok(RawUpdate {
        body: Value::Object(fields),
        images,
    })
}

/// Places one text part into the JSON body, following the bracket notation
/// form encoders use for arrays and nested objects.
pub fn insert_text_field(fields: &mut Map<String, Value>, name: &str, text: String) {
    if name == "tags" || name == "tags[]" {
        let tags = fields
            .entry("tags")
            .or_insert_with(|| Value::Array(Vec::new()));
        match tags {
            Value::Array(items) => items.push(Value::String(text)),
            other => *other = Value::Array(vec![Value::String(text)]),
        }
        return;
    }

    if let Some(key) = name
        .strip_prefix("scheduleUpdate[")
        .and_then(|rest| rest.strip_suffix(']'))
    {
        let value = match key {
            "privacy" => coerce_integer(text),
            _ => Value::String(text),
        };
        let schedule = fields
            .entry("scheduleUpdate")
            .or_insert_with(|| Value::Object(Map::new()));
        if !schedule.is_object() {
            *schedule = Value::Object(Map::new());
        }
        if let Value::Object(schedule) = schedule {
            schedule.insert(key.to_string(), value);
        }
        return;
    }

    let value = if NULLABLE_FIELDS.contains(&name) && (text == "null" || text.is_empty()) {
        Value::Null
    } else if BOOLEAN_FIELDS.contains(&name) {
        match text.as_str() {
            "true" | "1" => Value::Bool(true),
            "false" | "0" => Value::Bool(false),
            _ => Value::String(text),
        }
    } else if INTEGER_FIELDS.contains(&name) {
        coerce_integer(text)
    } else {
        Value::String(text)
    };
    fields.insert(name.to_string(), value);
}

/// Unparseable numbers stay strings and fail deserialization later.
fn coerce_integer(text: String) -> Value {
    match text.trim().parse::<i64>() {
        Ok(number) => Value::from(number),
        Err(_) => Value::String(text),
    }
}
