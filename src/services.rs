use std::sync::Arc;

use serde_json::Value;

use crate::args::{ArgsTransformer, DefaultArgsTransformer};
use crate::config::PaginationConfig;
use crate::content_type::ModelRegistry;
use crate::loader::BoxFuture;
use crate::sanitize::{ContentApiSanitizer, Sanitizer};

/// Related value of one parent, as returned by [`EntityService::load_many`].
#[derive(Debug, Clone, PartialEq)]
pub struct ParentRecord {
    /// `id` of the parent entity the value belongs to.
    pub parent_id: Value,
    pub value: Value,
}

impl ParentRecord {
    pub fn new(parent_id: Value, value: Value) -> Self {
        Self { parent_id, value }
    }

    /// Tags `value` with the `id` of `parent`.
    pub fn of(parent: &Value, value: Value) -> Self {
        Self::new(parent.get("id").cloned().unwrap_or(Value::Null), value)
    }
}

/// Bulk relation loading offered by the host's entity layer.
pub trait EntityService: Send + Sync {
    /// Loads `attribute_name` of every entity in `parents`.
    ///
    /// Records are matched back to parents by `parent_id` only, so they may come in
    /// any order. A parent without a record resolves to nothing; a `null` value
    /// means the relation is unset.
    fn load_many<'a>(
        &'a self,
        content_type_uid: &'a str,
        parents: Vec<Value>,
        attribute_name: &'a str,
        args: Value,
    ) -> BoxFuture<'a, anyhow::Result<Vec<ParentRecord>>>;
}

/// Collaborators the association loaders are built from.
#[derive(Clone)]
pub struct Services {
    pub models: Arc<dyn ModelRegistry>,
    pub entities: Arc<dyn EntityService>,
    pub sanitizer: Arc<dyn Sanitizer>,
    pub args: Arc<dyn ArgsTransformer>,
}

impl Services {
    pub fn new(models: Arc<dyn ModelRegistry>, entities: Arc<dyn EntityService>) -> Self {
        Self {
            sanitizer: Arc::new(ContentApiSanitizer::new(models.clone())),
            args: Arc::new(DefaultArgsTransformer::default()),
            models,
            entities,
        }
    }

    pub fn with_sanitizer(mut self, sanitizer: Arc<dyn Sanitizer>) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn with_args_transformer(mut self, args: Arc<dyn ArgsTransformer>) -> Self {
        self.args = args;
        self
    }

    /// Replaces the args transformer with a [`DefaultArgsTransformer`] using
    /// `pagination`.
    pub fn with_pagination(self, pagination: PaginationConfig) -> Self {
        self.with_args_transformer(Arc::new(DefaultArgsTransformer::new(pagination)))
    }
}
