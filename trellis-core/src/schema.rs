//! Schema Hooks
//!
//! States can carry a [`Schema`] that every incoming value is checked against.
//! The engine only depends on the trait; any validation library can sit
//! behind it. A few small building blocks ([`Type`], [`ObjectSchema`],
//! [`ListSchema`]) are provided for the common cases and for tests.
//!
//! # Resolution
//!
//! A state's schema describes the whole container. When a value is written
//! under a key, the engine asks the schema for the sub-schema of that key
//! ([`Schema::field`] for objects, [`Schema::element`] for arrays, maps and
//! sets) and validates against that. Child states wrapped from a parent
//! inherit the same sub-schema.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use thiserror::Error;

use crate::value::{Container, Kind, Value};

/// Validation failure reported by a schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}{message}", path_prefix(.path))]
pub struct SchemaError {
    /// Location of the failure inside the validated value.
    pub path: Vec<String>,
    pub message: String,
}

fn path_prefix(path: &[String]) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!("at {}: ", path.join("."))
    }
}

impl SchemaError {
    /// Failure at the root of the validated value.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            path: Vec::new(),
            message: message.into(),
        }
    }

    /// Prepend a path segment.
    pub fn at(mut self, segment: impl ToString) -> Self {
        self.path.insert(0, segment.to_string());
        self
    }
}

/// Shared schema reference.
pub type SchemaRef = Arc<dyn Schema>;

/// Validation capability attached to a state.
pub trait Schema: Send + Sync {
    /// Validate `value`, returning the (possibly normalized) value to store.
    fn safe_parse(&self, value: &Value) -> Result<Value, SchemaError>;

    /// Sub-schema for an object field. `None` accepts anything.
    fn field(&self, _name: &str) -> Option<SchemaRef> {
        None
    }

    /// Whether an object field must always be present.
    fn is_required(&self, _name: &str) -> bool {
        false
    }

    /// Sub-schema for array items, map values and set members.
    fn element(&self) -> Option<SchemaRef> {
        None
    }
}

/// Primitive type checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Any,
    Null,
    Bool,
    Number,
    String,
    /// Any container of the given kind, contents unchecked.
    Container(Kind),
}

impl Schema for Type {
    fn safe_parse(&self, value: &Value) -> Result<Value, SchemaError> {
        let ok = match (self, value) {
            (Type::Any, _) => true,
            (Type::Null, Value::Null) => true,
            (Type::Bool, Value::Bool(_)) => true,
            (Type::Number, Value::Number(_)) => true,
            (Type::String, Value::String(_)) => true,
            (Type::Container(kind), v) => v.as_raw().is_some_and(|raw| raw.kind() == *kind),
            _ => false,
        };

        if ok {
            Ok(value.clone())
        } else {
            Err(SchemaError::new(format!(
                "expected {self}, got {}",
                value.kind_name()
            )))
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Any => f.write_str("any"),
            Type::Null => f.write_str("null"),
            Type::Bool => f.write_str("boolean"),
            Type::Number => f.write_str("number"),
            Type::String => f.write_str("string"),
            Type::Container(kind) => f.write_str(kind.as_str()),
        }
    }
}

/// Accepts `Undefined` and `Null` in addition to the inner schema.
pub struct Optional(pub SchemaRef);

impl Schema for Optional {
    fn safe_parse(&self, value: &Value) -> Result<Value, SchemaError> {
        match value {
            Value::Undefined | Value::Null => Ok(value.clone()),
            other => self.0.safe_parse(other),
        }
    }

    fn field(&self, name: &str) -> Option<SchemaRef> {
        self.0.field(name)
    }

    fn is_required(&self, name: &str) -> bool {
        self.0.is_required(name)
    }

    fn element(&self) -> Option<SchemaRef> {
        self.0.element()
    }
}

/// Object shape: typed fields, some of them required. Unknown fields are
/// accepted.
#[derive(Default)]
pub struct ObjectSchema {
    fields: IndexMap<String, SchemaRef>,
    required: HashSet<String>,
}

impl ObjectSchema {
    /// Object schema with no declared fields.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an optional typed field.
    pub fn prop(mut self, name: impl Into<String>, schema: impl Schema + 'static) -> Self {
        self.fields.insert(name.into(), Arc::new(schema));
        self
    }

    /// Declare a typed field that must be present.
    pub fn required(mut self, name: impl Into<String>, schema: impl Schema + 'static) -> Self {
        let name = name.into();
        self.required.insert(name.clone());
        self.fields.insert(name, Arc::new(schema));
        self
    }

    /// Share the schema.
    pub fn into_ref(self) -> SchemaRef {
        Arc::new(self)
    }
}

impl Schema for ObjectSchema {
    fn safe_parse(&self, value: &Value) -> Result<Value, SchemaError> {
        let raw = value
            .as_raw()
            .filter(|raw| raw.kind() == Kind::Object)
            .ok_or_else(|| SchemaError::new(format!("expected object, got {}", value.kind_name())))?;

        let fields = match &*raw.read() {
            Container::Object(fields) => fields.clone(),
            _ => return Err(SchemaError::new("expected object")),
        };

        for name in &self.required {
            if !fields.contains_key(name.as_str()) {
                return Err(SchemaError::new("required field is missing").at(name));
            }
        }

        for (name, schema) in &self.fields {
            if let Some(field) = fields.get(name.as_str()) {
                schema.safe_parse(field).map_err(|e| e.at(name))?;
            }
        }

        Ok(value.clone())
    }

    fn field(&self, name: &str) -> Option<SchemaRef> {
        self.fields.get(name).cloned()
    }

    fn is_required(&self, name: &str) -> bool {
        self.required.contains(name)
    }
}

/// Homogeneous collection: every array item, map value or set member must
/// satisfy `element`.
pub struct ListSchema {
    kind: Kind,
    element: SchemaRef,
}

impl ListSchema {
    /// Array whose items match `element`.
    pub fn array(element: impl Schema + 'static) -> Self {
        Self::of(Kind::Array, element)
    }

    /// Container of `kind` whose elements match `element`.
    pub fn of(kind: Kind, element: impl Schema + 'static) -> Self {
        Self {
            kind,
            element: Arc::new(element),
        }
    }

    /// Share the schema.
    pub fn into_ref(self) -> SchemaRef {
        Arc::new(self)
    }
}

impl Schema for ListSchema {
    fn safe_parse(&self, value: &Value) -> Result<Value, SchemaError> {
        let raw = value
            .as_raw()
            .filter(|raw| raw.kind() == self.kind)
            .ok_or_else(|| {
                SchemaError::new(format!(
                    "expected {}, got {}",
                    self.kind.as_str(),
                    value.kind_name()
                ))
            })?;

        let entries = raw.read().entries();
        for (key, item) in entries {
            self.element.safe_parse(&item).map_err(|e| e.at(key))?;
        }
        Ok(value.clone())
    }

    fn element(&self) -> Option<SchemaRef> {
        Some(self.element.clone())
    }
}
