//! Message to publish translation
//!
//! A [`PublishStrategy`] turns one queue [`Message`] into an ordered list of
//! `(feed, payload)` calls. Strategies are pure: they never touch the broker,
//! so a translation error leaves the calls produced before it intact and the
//! worker decides what to do with both.

use crate::config::PublishMode;
use crate::error::BridgeError;
use crate::protocol::{resolve_feed_name, Message};
use bytes::Bytes;
use serde_json::{Map, Value};
use tracing::{debug, error};

/// `extendedData` key holding per-face prediction records
pub const PREDICTIONS_KEY: &str = "predictions";

/// `extendedData` key holding a prediction error string
pub const ERROR_KEY: &str = "error";

const FACE_ATTRIBUTES_KEY: &str = "faceAttributes";

/// A single publish the worker should issue
#[derive(Debug, Clone, PartialEq)]
pub struct PublishCall {
    pub feed: String,
    pub payload: Bytes,
}

impl PublishCall {
    pub fn new(feed: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            feed: feed.into(),
            payload: payload.into(),
        }
    }
}

/// Result of translating one message
///
/// `calls` holds every call produced before `error` stopped the traversal.
#[derive(Debug, Default)]
pub struct Translation {
    pub calls: Vec<PublishCall>,
    pub error: Option<BridgeError>,
}

impl Translation {
    pub fn complete(calls: Vec<PublishCall>) -> Self {
        Self { calls, error: None }
    }

    pub fn partial(calls: Vec<PublishCall>, error: BridgeError) -> Self {
        Self {
            calls,
            error: Some(error),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Translation of a message into broker publishes
pub trait PublishStrategy: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    fn translate(&self, message: &Message, default_feed: &str) -> Translation;
}

/// Strategy for a configured publish mode
pub fn strategy_for(mode: PublishMode) -> Box<dyn PublishStrategy> {
    match mode {
        PublishMode::RawJson => Box::new(RawJson),
        PublishMode::FlattenedFaceAttributes => Box::new(FlattenedFaceAttributes),
        PublishMode::GenericValues => Box::new(GenericValues),
    }
}

/// Payload for a single value: strings and numbers are sent raw, structures as JSON
pub fn value_payload(value: &Value) -> Bytes {
    match value {
        Value::String(s) => Bytes::from(s.clone()),
        Value::Number(n) => Bytes::from(n.to_string()),
        Value::Bool(b) => Bytes::from(b.to_string()),
        Value::Null => Bytes::new(),
        structured => Bytes::from(structured.to_string()),
    }
}

/// Arithmetic mean of a mapping of numeric values, or 0 when the mapping is
/// empty or holds anything that is not a number
pub fn mean_of_mapping(values: &Map<String, Value>) -> f64 {
    if values.is_empty() {
        error!("Error flattening mapping, returning 0: mapping is empty");
        return 0.0;
    }

    let mut sum = 0.0;
    for (key, value) in values {
        match value.as_f64() {
            Some(number) => sum += number,
            None => {
                error!(
                    "Error flattening mapping, returning 0: value for '{}' is not numeric",
                    key
                );
                return 0.0;
            }
        }
    }

    sum / values.len() as f64
}

fn number_payload(value: f64) -> Bytes {
    Bytes::from(value.to_string())
}

/// Whole message as canonical JSON to the default feed
#[derive(Debug, Default, Clone, Copy)]
pub struct RawJson;

impl PublishStrategy for RawJson {
    fn name(&self) -> &'static str {
        "raw_json"
    }

    fn translate(&self, message: &Message, default_feed: &str) -> Translation {
        match message.stringify() {
            Ok(payload) => Translation::complete(vec![PublishCall::new(
                resolve_feed_name(None, default_feed),
                payload,
            )]),
            Err(e) => Translation::partial(
                Vec::new(),
                BridgeError::publish_translation(format!("cannot serialize message: {e}")),
            ),
        }
    }
}

/// One publish per face attribute, the attribute name used as the feed
#[derive(Debug, Default, Clone, Copy)]
pub struct FlattenedFaceAttributes;

impl PublishStrategy for FlattenedFaceAttributes {
    fn name(&self) -> &'static str {
        "flattened_face_attributes"
    }

    fn translate(&self, message: &Message, _default_feed: &str) -> Translation {
        let mut calls = Vec::new();

        let faces = match message.extended_data.get(PREDICTIONS_KEY) {
            Some(Value::Array(faces)) => faces,
            Some(other) => {
                return Translation::partial(
                    calls,
                    BridgeError::publish_translation(format!(
                        "'{PREDICTIONS_KEY}' must be a list, got {}",
                        json_kind(other)
                    )),
                )
            }
            None => {
                let reason = match message.extended_data.get(ERROR_KEY) {
                    Some(Value::String(e)) => format!("prediction failed: {e}"),
                    _ => format!("extendedData has no '{PREDICTIONS_KEY}'"),
                };
                return Translation::partial(calls, BridgeError::publish_translation(reason));
            }
        };

        if faces.is_empty() {
            return Translation::partial(
                calls,
                BridgeError::publish_translation(format!("'{PREDICTIONS_KEY}' is empty")),
            );
        }

        for (index, face) in faces.iter().enumerate() {
            let Some(attributes) = face.get(FACE_ATTRIBUTES_KEY).and_then(Value::as_object) else {
                return Translation::partial(
                    calls,
                    BridgeError::publish_translation(format!(
                        "prediction {index} has no '{FACE_ATTRIBUTES_KEY}' mapping"
                    )),
                );
            };

            for (key, value) in attributes {
                let payload = match value {
                    Value::Object(nested) => number_payload(mean_of_mapping(nested)),
                    scalar => value_payload(scalar),
                };
                debug!(feed = %key, face = index, "Flattened face attribute");
                calls.push(PublishCall::new(key.clone(), payload));
            }
        }

        Translation::complete(calls)
    }
}

/// One publish per top-level `extendedData` entry, in insertion order
///
/// Keys are used verbatim as feed names. The reserved `predictions` and
/// `error` entries are skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericValues;

impl PublishStrategy for GenericValues {
    fn name(&self) -> &'static str {
        "generic_values"
    }

    fn translate(&self, message: &Message, _default_feed: &str) -> Translation {
        let calls = message
            .extended_data
            .iter()
            .filter(|(key, _)| key.as_str() != PREDICTIONS_KEY && key.as_str() != ERROR_KEY)
            .map(|(key, value)| PublishCall::new(key.clone(), value_payload(value)))
            .collect();

        Translation::complete(calls)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}
