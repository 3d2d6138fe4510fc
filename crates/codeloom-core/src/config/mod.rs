//! Plugin-facing configuration assembled from layered JSON objects.
//!
//! Layers are merged as they are added: objects merge key by key, any other
//! value replaces what an earlier layer held. Lookups accept dotted keys
//! (`csharp.namespace`) which walk nested objects.

use std::fs;

use camino::Utf8Path;
use codeloom_plugins::ConfigProvider;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised while building a [`JsonConfig`].
#[derive(Debug, Error)]
pub enum JsonConfigError {
    /// A layer was not a JSON object.
    #[error("configuration layer must be a JSON object, found {found}")]
    NotAnObject {
        /// JSON type name of the rejected value.
        found: &'static str,
    },
    /// A configuration file could not be read.
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        /// File that failed to load.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// A configuration file did not contain valid JSON.
    #[error("failed to parse configuration file {path}: {source}")]
    Parse {
        /// File that failed to parse.
        path: String,
        /// Underlying parse failure.
        #[source]
        source: serde_json::Error,
    },
    /// A `key=value` assignment was malformed.
    #[error("expected KEY=VALUE, got '{text}'")]
    InvalidAssignment {
        /// The rejected assignment.
        text: String,
    },
}

/// Layered JSON configuration answering plugin `GetValue` requests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonConfig {
    root: Map<String, Value>,
}

impl JsonConfig {
    /// Creates an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `layer` on top of the existing layers.
    ///
    /// # Errors
    ///
    /// Returns [`JsonConfigError::NotAnObject`] when `layer` is not an object.
    pub fn with_layer(mut self, layer: Value) -> Result<Self, JsonConfigError> {
        self.push_layer(layer)?;
        Ok(self)
    }

    /// Adds `layer` on top of the existing layers in place.
    ///
    /// # Errors
    ///
    /// Returns [`JsonConfigError::NotAnObject`] when `layer` is not an object.
    pub fn push_layer(&mut self, layer: Value) -> Result<(), JsonConfigError> {
        let Value::Object(map) = layer else {
            return Err(JsonConfigError::NotAnObject {
                found: type_name(&layer),
            });
        };
        merge_into(&mut self.root, map);
        Ok(())
    }

    /// Reads a JSON object from `path` and adds it as a layer.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not JSON, or does not
    /// hold an object.
    pub fn push_file(&mut self, path: &Utf8Path) -> Result<(), JsonConfigError> {
        let text = fs::read_to_string(path).map_err(|source| JsonConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let layer = serde_json::from_str(&text).map_err(|source| JsonConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
        self.push_layer(layer)
    }

    /// Applies a `key=value` assignment as a one-key layer.
    ///
    /// The value is read as JSON when it parses (`true`, `3`, `["a"]`) and
    /// as a plain string otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`JsonConfigError::InvalidAssignment`] when `text` has no `=`
    /// or an empty key.
    pub fn push_assignment(&mut self, text: &str) -> Result<(), JsonConfigError> {
        let Some((name, raw)) = text.split_once('=') else {
            return Err(JsonConfigError::InvalidAssignment {
                text: text.to_owned(),
            });
        };
        let key = name.trim();
        if key.is_empty() || key.split('.').any(str::is_empty) {
            return Err(JsonConfigError::InvalidAssignment {
                text: text.to_owned(),
            });
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()));
        self.set(key, value);
        Ok(())
    }

    /// Sets the value at dotted `key`, creating intermediate objects.
    pub fn set(&mut self, key: &str, value: Value) {
        let layer = key.rsplit('.').fold(value, |inner, segment| {
            let mut map = Map::new();
            map.insert(segment.to_owned(), inner);
            Value::Object(map)
        });
        if let Value::Object(map) = layer {
            merge_into(&mut self.root, map);
        }
    }

    /// Returns the merged configuration as one JSON object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.root.clone())
    }

    /// Looks up `key`, preferring an exact top-level match over a dotted
    /// walk.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<&Value> {
        if let Some(value) = self.root.get(key) {
            return Some(value);
        }
        let mut segments = key.split('.');
        let first = segments.next()?;
        segments.try_fold(self.root.get(first)?, |current, segment| {
            current.as_object()?.get(segment)
        })
    }
}

impl ConfigProvider for JsonConfig {
    fn get(&self, key: &str) -> Option<Value> {
        self.lookup(key).cloned()
    }
}

fn merge_into(target: &mut Map<String, Value>, layer: Map<String, Value>) {
    for (key, incoming) in layer {
        match target.get_mut(&key) {
            Some(Value::Object(existing)) if incoming.is_object() => {
                if let Value::Object(nested) = incoming {
                    merge_into(existing, nested);
                }
            }
            _ => {
                target.insert(key, incoming);
            }
        }
    }
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
