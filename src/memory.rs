use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, bail};
use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::args::canonical_json;
use crate::content_type::{ContentType, ModelRegistry, RelationKind};
use crate::loader::BoxFuture;
use crate::sanitize::MORPH_TYPE_KEY;
use crate::services::{EntityService, ParentRecord};

/// Entity store kept in memory.
///
/// Relation attributes of stored entities hold the related ids: a single id for
/// to-one relations and single media, a list of ids for to-many relations and
/// multiple media, and `{"__type": uid, "id": ..}` references for polymorphic
/// relations.
pub struct InMemoryStore {
    models: Arc<dyn ModelRegistry>,
    entities: HashMap<String, IndexMap<String, Value>>,
}

impl InMemoryStore {
    pub fn new(models: Arc<dyn ModelRegistry>) -> Self {
        Self {
            models,
            entities: HashMap::new(),
        }
    }

    pub fn insert(&mut self, content_type_uid: &str, entity: Value) -> anyhow::Result<()> {
        let id = entity
            .get("id")
            .filter(|id| !id.is_null())
            .ok_or_else(|| anyhow!("entity of {content_type_uid} has no id"))?;

        self.entities
            .entry(content_type_uid.to_string())
            .or_default()
            .insert(canonical_json(id), entity);
        Ok(())
    }

    pub fn with(mut self, content_type_uid: &str, entities: Vec<Value>) -> anyhow::Result<Self> {
        for entity in entities {
            self.insert(content_type_uid, entity)?;
        }
        Ok(self)
    }

    pub fn find(&self, content_type_uid: &str, id: &Value) -> Option<&Value> {
        self.entities
            .get(content_type_uid)?
            .get(&canonical_json(id))
    }

    pub fn find_all(&self, content_type_uid: &str) -> Vec<Value> {
        self.entities
            .get(content_type_uid)
            .map(|entities| entities.values().cloned().collect())
            .unwrap_or_default()
    }

    fn resolve_ids(&self, target_uid: &str, ids: &Value) -> Vec<Value> {
        let ids = match ids {
            Value::Array(ids) => ids.iter().collect(),
            Value::Null => Vec::new(),
            id => vec![id],
        };

        ids.into_iter()
            .filter_map(|id| self.find(target_uid, id).cloned())
            .collect()
    }

    fn resolve_morph(&self, references: &Value) -> Vec<Value> {
        let references = match references {
            Value::Array(references) => references.iter().collect(),
            Value::Null => Vec::new(),
            reference => vec![reference],
        };

        references
            .into_iter()
            .filter_map(|reference| {
                let uid = reference.get(MORPH_TYPE_KEY)?.as_str()?;
                let mut entity = self.find(uid, reference.get("id")?)?.clone();
                entity
                    .as_object_mut()?
                    .insert(MORPH_TYPE_KEY.to_string(), Value::String(uid.to_string()));
                Some(entity)
            })
            .collect()
    }

    fn load_one(
        &self,
        content_type: &ContentType,
        kind: RelationKind,
        parent: &Value,
        attribute_name: &str,
        args: &Value,
    ) -> anyhow::Result<Value> {
        let id = parent
            .get("id")
            .ok_or_else(|| anyhow!("parent of {} has no id", content_type.uid))?;
        let stored = self.find(&content_type.uid, id).unwrap_or(parent);
        let raw = stored.get(attribute_name).unwrap_or(&Value::Null);

        let related = match kind {
            RelationKind::Morph { .. } => self.resolve_morph(raw),
            _ => {
                let attribute = content_type
                    .get_attribute(attribute_name)
                    .ok_or_else(|| anyhow!("unknown attribute {attribute_name}"))?;
                let target = content_type
                    .target_of(attribute)
                    .ok_or_else(|| anyhow!("{attribute_name} has no target"))?;
                self.resolve_ids(&target, raw)
            }
        };

        if !kind.is_to_many() {
            return Ok(related.into_iter().next().unwrap_or(Value::Null));
        }

        let related = related
            .into_iter()
            .filter(|entity| matches_filters(entity, args.get("filters")));
        Ok(Value::Array(paginate(related, args)))
    }
}

fn paginate(items: impl Iterator<Item = Value>, args: &Value) -> Vec<Value> {
    let start = args.get("start").and_then(Value::as_u64).unwrap_or(0) as usize;
    let items = items.skip(start);

    match args.get("limit").and_then(Value::as_i64) {
        Some(limit) if limit >= 0 => items.take(limit as usize).collect(),
        _ => items.collect(),
    }
}

/// Supports `{attribute: {"$eq": v}}` and `{attribute: {"$ne": v}}` conditions.
fn matches_filters(entity: &Value, filters: Option<&Value>) -> bool {
    let Some(Value::Object(filters)) = filters else {
        return true;
    };

    filters.iter().all(|(attribute, condition)| {
        let value = entity.get(attribute).unwrap_or(&Value::Null);
        match condition {
            Value::Object(operators) => operators_match(value, operators),
            expected => value == expected,
        }
    })
}

fn operators_match(value: &Value, operators: &Map<String, Value>) -> bool {
    operators.iter().all(|(operator, expected)| match operator.as_str() {
        "$eq" => value == expected,
        "$ne" => value != expected,
        _ => true,
    })
}

impl EntityService for InMemoryStore {
    fn load_many<'a>(
        &'a self,
        content_type_uid: &'a str,
        parents: Vec<Value>,
        attribute_name: &'a str,
        args: Value,
    ) -> BoxFuture<'a, anyhow::Result<Vec<ParentRecord>>> {
        Box::pin(async move {
            let content_type = self
                .models
                .get_model(content_type_uid)
                .ok_or_else(|| anyhow!("unknown content type {content_type_uid}"))?;
            let Some(kind) = content_type
                .get_attribute(attribute_name)
                .and_then(RelationKind::of)
            else {
                bail!("{content_type_uid}::{attribute_name} is not an association");
            };

            parents
                .iter()
                .map(|parent| -> anyhow::Result<ParentRecord> {
                    let value = self.load_one(&content_type, kind, parent, attribute_name, &args)?;
                    Ok(ParentRecord::of(parent, value))
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_type::{Attribute, Models, MEDIA_CONTENT_TYPE_UID};
    use serde_json::json;

    fn store() -> InMemoryStore {
        let models = Models::new()
            .register(
                ContentType::new("api::article.article")
                    .attribute(
                        "comments",
                        Attribute::relation("oneToMany", "api::comment.comment"),
                    )
                    .attribute(
                        "author",
                        Attribute::relation("manyToOne", "api::author.author"),
                    )
                    .attribute("gallery", Attribute::media(true))
                    .attribute("related", Attribute::morph("morphToMany")),
            )
            .register(ContentType::new("api::comment.comment"))
            .register(ContentType::new("api::author.author"))
            .register(ContentType::new(MEDIA_CONTENT_TYPE_UID));

        InMemoryStore::new(Arc::new(models))
            .with(
                "api::article.article",
                vec![
                    json!({"id": 1, "comments": [11, 12, 13], "author": 100, "gallery": [7],
                           "related": [{"__type": "api::author.author", "id": 100}]}),
                    json!({"id": 2, "comments": [], "author": null}),
                ],
            )
            .unwrap()
            .with(
                "api::comment.comment",
                vec![
                    json!({"id": 11, "body": "a", "approved": true}),
                    json!({"id": 12, "body": "b", "approved": false}),
                    json!({"id": 13, "body": "c", "approved": true}),
                ],
            )
            .unwrap()
            .with("api::author.author", vec![json!({"id": 100, "name": "Ada"})])
            .unwrap()
            .with(MEDIA_CONTENT_TYPE_UID, vec![json!({"id": 7, "url": "7.png"})])
            .unwrap()
    }

    fn values(records: Vec<ParentRecord>) -> Vec<Value> {
        records.into_iter().map(|record| record.value).collect()
    }

    #[tokio::test]
    async fn test_load_many_tags_records_with_parent_ids() {
        let store = store();
        let records = store
            .load_many(
                "api::article.article",
                vec![json!({"id": 2}), json!({"id": 1})],
                "author",
                json!({}),
            )
            .await
            .unwrap();

        assert_eq!(
            records,
            vec![
                ParentRecord::new(json!(2), Value::Null),
                ParentRecord::new(json!(1), json!({"id": 100, "name": "Ada"})),
            ]
        );
    }

    #[tokio::test]
    async fn test_load_many_paginates_and_filters_to_many() {
        let store = store();
        let records = store
            .load_many(
                "api::article.article",
                vec![json!({"id": 1})],
                "comments",
                json!({"start": 1, "limit": 1}),
            )
            .await
            .unwrap();
        assert_eq!(
            values(records),
            vec![json!([{"id": 12, "body": "b", "approved": false}])]
        );

        let approved = store
            .load_many(
                "api::article.article",
                vec![json!({"id": 1})],
                "comments",
                json!({"start": 0, "limit": -1, "filters": {"approved": {"$eq": true}}}),
            )
            .await
            .unwrap();
        assert_eq!(approved[0].value.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_load_many_resolves_media_and_morph() {
        let store = store();
        let parents = vec![json!({"id": 1})];

        let gallery = store
            .load_many("api::article.article", parents.clone(), "gallery", json!({}))
            .await
            .unwrap();
        assert_eq!(values(gallery), vec![json!([{"id": 7, "url": "7.png"}])]);

        let related = store
            .load_many("api::article.article", parents, "related", json!({}))
            .await
            .unwrap();
        assert_eq!(
            values(related),
            vec![json!([{"id": 100, "name": "Ada", "__type": "api::author.author"}])]
        );
    }

    #[tokio::test]
    async fn test_load_many_rejects_scalar_attribute() {
        let store = store();
        let err = store
            .load_many("api::article.article", vec![json!({"id": 1})], "title", json!({}))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("is not an association"));
    }
}
