use serde_json::Value;

use crate::{
    config::TopicSpec,
    error::{DecodeError, RegisterError, RouteError},
    model::Environment,
};

/// How a topic's raw payload turns into channel values.
#[derive(Debug, Clone)]
pub enum Decode {
    /// Bare decimal ASCII text, applied to one channel.
    Scalar { key: String },
    /// JSON object; `(field, channel key)` pairs are extracted in order.
    Json { fields: Vec<(String, String)> },
}

/// Immutable association between a topic name, a decode rule, and the
/// channel(s) it feeds. Registered once at startup, read-only afterward.
#[derive(Debug, Clone)]
pub struct TopicBinding {
    pub topic: String,
    pub decode: Decode,
}

impl From<&TopicSpec> for TopicBinding {
    fn from(spec: &TopicSpec) -> Self {
        match spec {
            TopicSpec::Scalar { topic, key } => Self {
                topic: topic.clone(),
                decode: Decode::Scalar { key: key.clone() },
            },
            TopicSpec::Json { topic, fields } => Self {
                topic: topic.clone(),
                decode: Decode::Json {
                    fields: fields.clone(),
                },
            },
        }
    }
}

#[derive(Debug, Default)]
pub struct TopicRouter {
    bindings: Vec<TopicBinding>,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a binding, validating that every referenced channel exists
    /// and the topic is not already bound.
    pub fn register(
        &mut self,
        binding: TopicBinding,
        model: &Environment,
    ) -> Result<(), RegisterError> {
        if self.bindings.iter().any(|b| b.topic == binding.topic) {
            return Err(RegisterError::DuplicateTopic(binding.topic));
        }
        let keys: Vec<&String> = match &binding.decode {
            Decode::Scalar { key } => vec![key],
            Decode::Json { fields } => fields.iter().map(|(_, key)| key).collect(),
        };
        for key in keys {
            if !model.contains(key) {
                return Err(RegisterError::UnknownChannel(key.clone()));
            }
        }
        self.bindings.push(binding);
        Ok(())
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(|binding| binding.topic.as_str())
    }

    /// Decodes a payload and applies it to the model, returning the keys
    /// whose values changed (in binding order).
    ///
    /// An unbound topic is ignored, not an error: broker-level wildcard
    /// delivery may carry unrelated topics. All fields of a structured
    /// payload are decoded before any is applied, so a failing payload
    /// leaves the model unmodified.
    pub fn dispatch(
        &self,
        topic: &str,
        payload: &[u8],
        model: &mut Environment,
    ) -> Result<Vec<String>, RouteError> {
        let Some(binding) = self.bindings.iter().find(|b| b.topic == topic) else {
            return Ok(Vec::new());
        };

        let decoded = decode(&binding.decode, payload)?;

        let mut changed = Vec::with_capacity(decoded.len());
        for (key, value) in decoded {
            if model.update(&key, value)? {
                changed.push(key);
            }
        }
        Ok(changed)
    }
}

fn decode(decode: &Decode, payload: &[u8]) -> Result<Vec<(String, f32)>, DecodeError> {
    match decode {
        Decode::Scalar { key } => {
            let text = std::str::from_utf8(payload)?.trim();
            let value = text
                .parse::<f32>()
                .map_err(|_| DecodeError::NotNumeric(text.to_string()))?;
            Ok(vec![(key.clone(), value)])
        }
        Decode::Json { fields } => {
            let value: Value = serde_json::from_slice(payload)?;
            let object = value.as_object().ok_or(DecodeError::NotJsonObject)?;
            fields
                .iter()
                .map(|(field, key)| {
                    let number = object
                        .get(field)
                        .and_then(Value::as_f64)
                        .ok_or_else(|| DecodeError::MissingField(field.clone()))?;
                    Ok((key.clone(), number as f32))
                })
                .collect()
        }
    }
}
