use std::sync::Arc;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Content type that every media attribute resolves to.
pub const MEDIA_CONTENT_TYPE_UID: &str = "plugins::upload.file";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub relation: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub multiple: bool,
    #[serde(default)]
    pub private: bool,
}

impl Attribute {
    pub fn scalar(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            relation: None,
            target: None,
            multiple: false,
            private: false,
        }
    }

    pub fn relation(relation: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            relation: Some(relation.into()),
            target: Some(target.into()),
            ..Self::scalar("relation")
        }
    }

    pub fn morph(relation: impl Into<String>) -> Self {
        Self {
            relation: Some(relation.into()),
            ..Self::scalar("relation")
        }
    }

    pub fn media(multiple: bool) -> Self {
        Self {
            multiple,
            ..Self::scalar("media")
        }
    }

    pub fn private(mut self) -> Self {
        self.private = true;
        self
    }
}

pub fn is_media(attribute: &Attribute) -> bool {
    attribute.kind == "media"
}

pub fn is_relation(attribute: &Attribute) -> bool {
    attribute.kind == "relation"
}

pub fn is_morph_relation(attribute: &Attribute) -> bool {
    is_relation(attribute)
        && attribute
            .relation
            .as_deref()
            .is_some_and(|relation| relation.to_ascii_lowercase().contains("morph"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    Media { multiple: bool },
    Morph { to_many: bool },
    Relation { to_many: bool },
}

impl RelationKind {
    /// Classifies an association attribute. Returns `None` for scalar attributes.
    pub fn of(attribute: &Attribute) -> Option<Self> {
        if is_media(attribute) {
            return Some(RelationKind::Media {
                multiple: attribute.multiple,
            });
        }

        let relation = attribute.relation.as_deref().filter(|_| is_relation(attribute))?;
        let to_many = relation.ends_with("Many");

        if is_morph_relation(attribute) {
            Some(RelationKind::Morph { to_many })
        } else {
            Some(RelationKind::Relation { to_many })
        }
    }

    pub fn is_to_many(&self) -> bool {
        match self {
            RelationKind::Media { multiple } => *multiple,
            RelationKind::Morph { to_many } | RelationKind::Relation { to_many } => *to_many,
        }
    }

    pub fn is_morph(&self) -> bool {
        matches!(self, RelationKind::Morph { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ContentType {
    pub uid: String,
    #[serde(default)]
    pub attributes: IndexMap<String, Attribute>,
}

impl ContentType {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            attributes: IndexMap::new(),
        }
    }

    pub fn attribute(mut self, name: impl Into<String>, attribute: Attribute) -> Self {
        self.attributes.insert(name.into(), attribute);
        self
    }

    pub fn get_attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    /// Target content type of an association attribute. Media always targets the
    /// upload file type; polymorphic relations have no fixed target.
    pub fn target_of(&self, attribute: &Attribute) -> Option<String> {
        if is_media(attribute) {
            Some(MEDIA_CONTENT_TYPE_UID.to_string())
        } else {
            attribute.target.clone()
        }
    }
}

pub trait ModelRegistry: Send + Sync {
    fn get_model(&self, uid: &str) -> Option<Arc<ContentType>>;
}

#[derive(Debug, Default, Clone)]
pub struct Models {
    models: IndexMap<String, Arc<ContentType>>,
}

impl Models {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, content_type: ContentType) -> Self {
        self.insert(content_type);
        self
    }

    pub fn insert(&mut self, content_type: ContentType) {
        self.models
            .insert(content_type.uid.clone(), Arc::new(content_type));
    }

    /// Loads descriptors from a JSON array of `{"uid": .., "attributes": {..}}`.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        let content_types: Vec<ContentType> =
            serde_json::from_value(value).map_err(|e| Error::Schema(e.into()))?;

        Ok(content_types
            .into_iter()
            .fold(Self::new(), |models, content_type| models.register(content_type)))
    }

    pub fn uids(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(|uid| uid.as_str())
    }
}

impl ModelRegistry for Models {
    fn get_model(&self, uid: &str) -> Option<Arc<ContentType>> {
        self.models.get(uid).cloned()
    }
}
