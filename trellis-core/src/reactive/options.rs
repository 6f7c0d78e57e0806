//! Per-state options.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use super::devtool::DevTool;
use crate::config;
use crate::schema::{Schema, SchemaRef};
use crate::value::Value;

/// Comparison function for ordered arrays.
pub type Comparator = Arc<dyn Fn(&Value, &Value) -> Ordering + Send + Sync>;

/// Options applied when a state is created.
///
/// Defaults for `strict` and `observable` come from the global
/// [`EngineConfig`](crate::config::EngineConfig) at construction time.
///
/// # Example
///
/// ```rust,ignore
/// let options = StateOptions::new()
///     .schema(ObjectSchema::new().required("age", Type::Number))
///     .strict(true);
/// let person = wrap_with(json!({"age": 36}), options)?;
/// ```
#[derive(Clone)]
pub struct StateOptions {
    pub(crate) schema: Option<SchemaRef>,
    pub(crate) strict: bool,
    pub(crate) recursive: bool,
    pub(crate) immutable: bool,
    pub(crate) observable: bool,
    pub(crate) ordered: Option<Comparator>,
    pub(crate) devtool: Option<Arc<dyn DevTool>>,
}

impl StateOptions {
    /// Options with the global defaults from [`EngineConfig`](crate::EngineConfig).
    pub fn new() -> Self {
        let config = config::current();
        Self {
            schema: None,
            strict: config.strict,
            recursive: false,
            immutable: false,
            observable: config.observable,
            ordered: None,
            devtool: None,
        }
    }

    /// Validate writes against `schema`.
    pub fn schema(self, schema: impl Schema + 'static) -> Self {
        self.schema_ref(Arc::new(schema))
    }

    /// Same as [`StateOptions::schema`] for a shared schema.
    pub fn schema_ref(mut self, schema: SchemaRef) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Return validation failures of object writes as errors instead of
    /// logging them.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Wrap every nested container eagerly instead of on first read.
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Refuse every mutation.
    pub fn immutable(mut self, immutable: bool) -> Self {
        self.immutable = immutable;
        self
    }

    /// Whether observers record reads of this state.
    pub fn observable(mut self, observable: bool) -> Self {
        self.observable = observable;
        self
    }

    /// Keep the array sorted by `compare` on `push`.
    pub fn ordered<F>(mut self, compare: F) -> Self
    where
        F: Fn(&Value, &Value) -> Ordering + Send + Sync + 'static,
    {
        self.ordered = Some(Arc::new(compare));
        self
    }

    /// Report creation and every mutating call to `devtool`.
    pub fn devtool(mut self, devtool: impl DevTool + 'static) -> Self {
        self.devtool = Some(Arc::new(devtool));
        self
    }

    /// Same as [`StateOptions::devtool`] for a shared hook.
    pub fn devtool_ref(mut self, devtool: Arc<dyn DevTool>) -> Self {
        self.devtool = Some(devtool);
        self
    }

    /// Whether validation failures are returned.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Whether nested containers are wrapped eagerly.
    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    /// Whether mutations are refused.
    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    /// Whether reads are tracked.
    pub fn is_observable(&self) -> bool {
        self.observable
    }

    /// Whether a push comparator is set.
    pub fn is_ordered(&self) -> bool {
        self.ordered.is_some()
    }

    /// Options for a child state living under a key whose sub-schema is
    /// `schema`. Policies are inherited; ordering is not.
    pub(crate) fn for_child(&self, schema: Option<SchemaRef>) -> Self {
        Self {
            schema,
            strict: self.strict,
            recursive: self.recursive,
            immutable: self.immutable,
            observable: self.observable,
            ordered: None,
            devtool: self.devtool.clone(),
        }
    }
}

impl Default for StateOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StateOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateOptions")
            .field("schema", &self.schema.is_some())
            .field("strict", &self.strict)
            .field("recursive", &self.recursive)
            .field("immutable", &self.immutable)
            .field("observable", &self.observable)
            .field("ordered", &self.ordered.is_some())
            .field("devtool", &self.devtool.is_some())
            .finish()
    }
}
