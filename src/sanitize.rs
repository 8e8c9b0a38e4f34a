use std::sync::Arc;

use serde_json::{Map, Value};

use crate::content_type::{is_media, is_morph_relation, is_relation, Attribute, ContentType, ModelRegistry};
use crate::context::AuthPrincipal;
use crate::loader::BoxFuture;

/// Key carried by polymorphic relation values to name their concrete content type.
pub const MORPH_TYPE_KEY: &str = "__type";

pub trait Sanitizer: Send + Sync {
    /// Applies field-level redaction to `data`, an entity (or list of entities) of
    /// `content_type`, on behalf of `auth`.
    fn sanitize_output<'a>(
        &'a self,
        data: Value,
        content_type: &'a ContentType,
        auth: Option<&'a AuthPrincipal>,
    ) -> BoxFuture<'a, anyhow::Result<Value>>;

    /// Sanitizes the value of a single attribute of `content_type`.
    ///
    /// The default implementation sanitizes a synthetic parent holding only
    /// `attribute` and returns what is left of it.
    fn sanitize_attribute<'a>(
        &'a self,
        value: Value,
        content_type: &'a ContentType,
        attribute: &'a str,
        auth: Option<&'a AuthPrincipal>,
    ) -> BoxFuture<'a, anyhow::Result<Value>> {
        Box::pin(async move {
            let mut parent = Map::new();
            parent.insert(attribute.to_string(), value);

            let mut sanitized = self
                .sanitize_output(Value::Object(parent), content_type, auth)
                .await?;

            Ok(sanitized
                .get_mut(attribute)
                .map(Value::take)
                .unwrap_or(Value::Null))
        })
    }
}

/// Removes private and password attributes, following relations into the models
/// the registry knows about.
#[derive(Clone)]
pub struct ContentApiSanitizer {
    models: Arc<dyn ModelRegistry>,
}

impl ContentApiSanitizer {
    pub fn new(models: Arc<dyn ModelRegistry>) -> Self {
        Self { models }
    }

    fn sanitize_entity(&self, data: Value, content_type: &ContentType) -> Value {
        match data {
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| self.sanitize_entity(item, content_type))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .filter_map(|(key, value)| {
                        match content_type.get_attribute(&key) {
                            Some(attribute) if is_hidden(attribute) => None,
                            Some(attribute) => {
                                let value = self.sanitize_related(value, content_type, attribute);
                                Some((key, value))
                            }
                            None => Some((key, value)),
                        }
                    })
                    .collect(),
            ),
            other => other,
        }
    }

    fn sanitize_related(&self, value: Value, content_type: &ContentType, attribute: &Attribute) -> Value {
        if is_morph_relation(attribute) {
            return self.sanitize_morph(value);
        }

        if !is_relation(attribute) && !is_media(attribute) {
            return value;
        }

        match content_type
            .target_of(attribute)
            .and_then(|uid| self.models.get_model(&uid))
        {
            Some(target) => self.sanitize_entity(value, &target),
            None => value,
        }
    }

    fn sanitize_morph(&self, value: Value) -> Value {
        match value {
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|item| self.sanitize_morph(item)).collect())
            }
            Value::Object(map) => {
                let target = map
                    .get(MORPH_TYPE_KEY)
                    .and_then(Value::as_str)
                    .and_then(|uid| self.models.get_model(uid));

                match target {
                    Some(target) => self.sanitize_entity(Value::Object(map), &target),
                    None => Value::Object(map),
                }
            }
            other => other,
        }
    }
}

fn is_hidden(attribute: &Attribute) -> bool {
    attribute.private || attribute.kind == "password"
}

impl Sanitizer for ContentApiSanitizer {
    fn sanitize_output<'a>(
        &'a self,
        data: Value,
        content_type: &'a ContentType,
        _auth: Option<&'a AuthPrincipal>,
    ) -> BoxFuture<'a, anyhow::Result<Value>> {
        Box::pin(async move { Ok(self.sanitize_entity(data, content_type)) })
    }

    fn sanitize_attribute<'a>(
        &'a self,
        value: Value,
        content_type: &'a ContentType,
        attribute: &'a str,
        _auth: Option<&'a AuthPrincipal>,
    ) -> BoxFuture<'a, anyhow::Result<Value>> {
        Box::pin(async move {
            Ok(match content_type.get_attribute(attribute) {
                Some(attr) if is_hidden(attr) => Value::Null,
                Some(attr) => self.sanitize_related(value, content_type, attr),
                None => value,
            })
        })
    }
}
