use async_graphql::dynamic::{
    Field, FieldFuture, FieldValue, Object, Scalar, SchemaBuilder, TypeRef,
};
use async_graphql_value::ConstValue;
use serde::Serialize;
use serde_json::Value;

pub const JSON_SCALAR: &str = "JSON";
pub const PAGINATION_TYPE: &str = "Pagination";
pub const COLLECTION_META_TYPE: &str = "ResponseCollectionMeta";

/// Resolution metadata attached to envelopes for the resolvers of the envelope types.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionInfo {
    pub args: Value,
    #[serde(rename = "resourceUID")]
    pub resource_uid: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityResponse {
    pub value: Option<Value>,
    pub info: ResolutionInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityResponseCollection {
    pub nodes: Vec<Value>,
    pub info: ResolutionInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub start: i64,
    pub limit: i64,
    pub page: i64,
    pub page_size: i64,
}

pub fn to_entity_response(value: Value, info: ResolutionInfo) -> EntityResponse {
    EntityResponse {
        value: Some(value).filter(|value| !value.is_null()),
        info,
    }
}

pub fn to_entity_response_collection(nodes: Value, info: ResolutionInfo) -> EntityResponseCollection {
    let nodes = match nodes {
        Value::Array(nodes) => nodes,
        Value::Null => Vec::new(),
        single => vec![single],
    };

    EntityResponseCollection { nodes, info }
}

impl EntityResponseCollection {
    pub fn pagination(&self) -> PaginationMeta {
        let start = self.info.args.get("start").and_then(Value::as_i64).unwrap_or(0);
        let limit = self
            .info
            .args
            .get("limit")
            .and_then(Value::as_i64)
            .unwrap_or(self.nodes.len() as i64);

        let (page, page_size) = if limit > 0 {
            (start / limit + 1, limit)
        } else {
            (1, self.nodes.len() as i64)
        };

        PaginationMeta {
            start,
            limit,
            page,
            page_size,
        }
    }
}

/// Per-parent value handed back by an association resolver.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ShapedResult {
    /// Sanitized value of a polymorphic relation.
    Raw(Value),
    Entity(EntityResponse),
    Collection(EntityResponseCollection),
}

impl ShapedResult {
    pub fn into_field_value<'a>(self) -> async_graphql::Result<FieldValue<'a>> {
        Ok(match self {
            ShapedResult::Raw(value) => FieldValue::value(ConstValue::from_json(value)?),
            ShapedResult::Entity(response) => FieldValue::owned_any(response),
            ShapedResult::Collection(collection) => FieldValue::owned_any(collection),
        })
    }
}

pub fn entity_type_name(name: &str) -> String {
    format!("{name}Entity")
}

pub fn entity_response_type_name(name: &str) -> String {
    format!("{name}EntityResponse")
}

pub fn entity_response_collection_type_name(name: &str) -> String {
    format!("{name}EntityResponseCollection")
}

fn id_to_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn entity_object(name: &str) -> Object {
    Object::new(entity_type_name(name))
        .field(Field::new("id", TypeRef::named(TypeRef::ID), |ctx| {
            FieldFuture::new(async move {
                let entity = ctx.parent_value.try_downcast_ref::<Value>()?;
                Ok(entity
                    .get("id")
                    .map(|id| FieldValue::value(id_to_string(id))))
            })
        }))
        .field(Field::new("attributes", TypeRef::named(JSON_SCALAR), |ctx| {
            FieldFuture::new(async move {
                let entity = ctx.parent_value.try_downcast_ref::<Value>()?;
                let mut attributes = entity.clone();
                if let Some(map) = attributes.as_object_mut() {
                    map.remove("id");
                }
                Ok(Some(FieldValue::value(ConstValue::from_json(attributes)?)))
            })
        }))
}

fn entity_response_object(name: &str) -> Object {
    Object::new(entity_response_type_name(name)).field(Field::new(
        "data",
        TypeRef::named(entity_type_name(name)),
        |ctx| {
            FieldFuture::new(async move {
                let response = ctx.parent_value.try_downcast_ref::<EntityResponse>()?;
                Ok(response.value.clone().map(FieldValue::owned_any))
            })
        },
    ))
}

fn entity_response_collection_object(name: &str) -> Object {
    Object::new(entity_response_collection_type_name(name))
        .field(Field::new(
            "data",
            TypeRef::named_nn_list_nn(entity_type_name(name)),
            |ctx| {
                FieldFuture::new(async move {
                    let collection = ctx
                        .parent_value
                        .try_downcast_ref::<EntityResponseCollection>()?;
                    Ok(Some(FieldValue::list(
                        collection.nodes.iter().cloned().map(FieldValue::owned_any),
                    )))
                })
            },
        ))
        .field(Field::new(
            "meta",
            TypeRef::named_nn(COLLECTION_META_TYPE),
            |ctx| {
                FieldFuture::new(async move {
                    let collection = ctx
                        .parent_value
                        .try_downcast_ref::<EntityResponseCollection>()?;
                    Ok(Some(FieldValue::owned_any(collection.pagination())))
                })
            },
        ))
}

fn pagination_field(name: &'static str, read: fn(&PaginationMeta) -> i64) -> Field {
    Field::new(name, TypeRef::named_nn(TypeRef::INT), move |ctx| {
        FieldFuture::new(async move {
            let meta = ctx.parent_value.try_downcast_ref::<PaginationMeta>()?;
            Ok(Some(FieldValue::value(read(meta))))
        })
    })
}

/// Registers the scalar and meta types shared by every envelope type.
pub fn register_shared_types(builder: SchemaBuilder) -> SchemaBuilder {
    let pagination = Object::new(PAGINATION_TYPE)
        .field(pagination_field("start", |m| m.start))
        .field(pagination_field("limit", |m| m.limit))
        .field(pagination_field("page", |m| m.page))
        .field(pagination_field("pageSize", |m| m.page_size));

    let meta = Object::new(COLLECTION_META_TYPE).field(Field::new(
        "pagination",
        TypeRef::named_nn(PAGINATION_TYPE),
        |ctx| {
            FieldFuture::new(async move {
                let meta = ctx.parent_value.try_downcast_ref::<PaginationMeta>()?;
                Ok(Some(FieldValue::owned_any(*meta)))
            })
        },
    ));

    builder
        .register(Scalar::new(JSON_SCALAR))
        .register(pagination)
        .register(meta)
}

/// Registers `<name>Entity`, `<name>EntityResponse` and
/// `<name>EntityResponseCollection`.
pub fn register_entity_types(builder: SchemaBuilder, name: &str) -> SchemaBuilder {
    builder
        .register(entity_object(name))
        .register(entity_response_object(name))
        .register(entity_response_collection_object(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn info(args: Value) -> ResolutionInfo {
        ResolutionInfo {
            args,
            resource_uid: "api::comment.comment".to_string(),
        }
    }

    #[test]
    fn test_entity_response_treats_null_as_absent() {
        let response = to_entity_response(Value::Null, info(json!({})));
        assert_eq!(response.value, None);

        let response = to_entity_response(json!({"id": 1}), info(json!({})));
        assert_eq!(response.value, Some(json!({"id": 1})));
    }

    #[test]
    fn test_collection_serializes_with_info() {
        let collection = to_entity_response_collection(
            json!([{"id": 1}, {"id": 2}]),
            info(json!({"start": 0, "limit": 10})),
        );

        assert_eq!(
            serde_json::to_value(ShapedResult::Collection(collection)).unwrap(),
            json!({
                "nodes": [{"id": 1}, {"id": 2}],
                "info": {
                    "args": {"start": 0, "limit": 10},
                    "resourceUID": "api::comment.comment"
                }
            })
        );
    }

    #[test]
    fn test_collection_pagination_meta() {
        let collection =
            to_entity_response_collection(json!([]), info(json!({"start": 20, "limit": 10})));
        assert_eq!(
            collection.pagination(),
            PaginationMeta {
                start: 20,
                limit: 10,
                page: 3,
                page_size: 10
            }
        );

        let unbounded =
            to_entity_response_collection(json!([{"id": 1}]), info(json!({"start": 0, "limit": -1})));
        assert_eq!(unbounded.pagination().page, 1);
        assert_eq!(unbounded.pagination().page_size, 1);
    }
}
