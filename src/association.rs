//! Batched resolution of relation, polymorphic relation and media attributes.
//!
//! Every GraphQL field resolution of an association goes through the request's
//! [`AssociationLoader`] for that content type and attribute. Loads queued within one
//! accumulation window become a single `load_many` call on the entity service, and
//! each caller gets back the shaped result for its own parent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_graphql::dynamic::{FieldFuture, FieldValue, ResolverContext};
use async_graphql_value::ConstValue;
use indexmap::IndexMap;
use serde_json::Value;

use crate::args::canonical_json;
use crate::config::{ArgsStrategy, LoaderConfig};
use crate::content_type::{ContentType, RelationKind};
use crate::context::{AuthPrincipal, RequestContext, RequestState};
use crate::error::{Error, Result};
use crate::format::{to_entity_response, to_entity_response_collection, ResolutionInfo, ShapedResult};
use crate::loader::{BatchFn, BatchLoader, BoxFuture};
use crate::services::Services;

/// One field resolution: the entity owning the association, the field arguments, and
/// the state of the request it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest {
    pub parent: Value,
    pub args: Value,
    pub state: RequestState,
}

struct QueuedRequest {
    parent_id: String,
    request: BatchRequest,
}

/// Stable identifier of a parent entity, as used in cache keys and routing.
pub fn parent_id(parent: &Value) -> Result<String> {
    match parent.get("id") {
        Some(id) if !id.is_null() => Ok(canonical_json(id)),
        _ => Err(Error::invalid_parent(format!(
            "entity has no identifier: {parent}"
        ))),
    }
}

/// `{content type}::{parent id}::{canonical args}`. Calls with the same key share
/// one fetch slot and one result.
pub fn cache_key(content_type_uid: &str, parent_id: &str, args: &Value) -> String {
    format!("{content_type_uid}::{parent_id}::{}", canonical_json(args))
}

#[derive(Clone)]
struct AssociationFetcher {
    services: Arc<Services>,
    content_type: Arc<ContentType>,
    attribute_name: Arc<str>,
    kind: RelationKind,
    target: Option<Arc<ContentType>>,
    args_strategy: ArgsStrategy,
}

impl AssociationFetcher {
    async fn fetch(&self, batch: Vec<(String, QueuedRequest)>) -> Result<HashMap<String, ShapedResult>> {
        let groups = match self.args_strategy {
            ArgsStrategy::FirstRequest => vec![batch],
            ArgsStrategy::GroupByArgs => {
                let mut groups: IndexMap<String, Vec<(String, QueuedRequest)>> = IndexMap::new();
                for (key, queued) in batch {
                    groups
                        .entry(canonical_json(&queued.request.args))
                        .or_default()
                        .push((key, queued));
                }
                groups.into_values().collect()
            }
        };

        tracing::trace!(
            content_type = %self.content_type.uid,
            attribute = %self.attribute_name,
            groups = groups.len(),
            "dispatching association batch"
        );

        let results =
            futures::future::try_join_all(groups.into_iter().map(|group| self.fetch_group(group)))
                .await?;

        Ok(results.into_iter().flatten().collect())
    }

    async fn fetch_group(&self, group: Vec<(String, QueuedRequest)>) -> Result<HashMap<String, ShapedResult>> {
        let Some((_, first)) = group.first() else {
            return Ok(HashMap::new());
        };

        // The first request stands for the whole group.
        let auth = first.request.state.auth.clone();
        let args_content_type = self.target.as_deref().unwrap_or(&self.content_type);
        let args = self
            .services
            .args
            .transform_args(&first.request.args, args_content_type, true)?;

        let mut parents: IndexMap<&str, Value> = IndexMap::new();
        for (_, queued) in &group {
            parents
                .entry(queued.parent_id.as_str())
                .or_insert_with(|| queued.request.parent.clone());
        }

        let started = Instant::now();
        let records = self
            .services
            .entities
            .load_many(
                &self.content_type.uid,
                parents.values().cloned().collect(),
                &self.attribute_name,
                args.clone(),
            )
            .await
            .map_err(|err| {
                tracing::warn!(
                    content_type = %self.content_type.uid,
                    attribute = %self.attribute_name,
                    error = %err,
                    "bulk load failed"
                );
                Error::Fetch {
                    content_type: self.content_type.uid.clone(),
                    attribute: self.attribute_name.to_string(),
                    cause: Arc::new(err),
                }
            })?;

        tracing::trace!(
            content_type = %self.content_type.uid,
            attribute = %self.attribute_name,
            parents = parents.len(),
            records = records.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "bulk load finished"
        );

        let info = ResolutionInfo {
            args,
            resource_uid: self
                .target
                .as_ref()
                .map(|target| target.uid.clone())
                .unwrap_or_default(),
        };

        let mut records_by_parent: HashMap<String, Value> = HashMap::with_capacity(records.len());
        for record in records {
            let id = canonical_json(&record.parent_id);
            if !parents.contains_key(id.as_str()) {
                tracing::warn!(
                    content_type = %self.content_type.uid,
                    attribute = %self.attribute_name,
                    parent_id = %id,
                    "bulk load returned a record for a parent outside the batch"
                );
                continue;
            }
            if records_by_parent.contains_key(&id) {
                return Err(Error::Fetch {
                    content_type: self.content_type.uid.clone(),
                    attribute: self.attribute_name.to_string(),
                    cause: Arc::new(anyhow::anyhow!("duplicate records for parent {id}")),
                });
            }
            records_by_parent.insert(id, record.value);
        }

        let mut shaped = HashMap::with_capacity(records_by_parent.len());
        for (parent_id, record) in records_by_parent {
            let result = self.shape(record, &info, auth.as_ref()).await?;
            shaped.insert(parent_id, result);
        }

        Ok(group
            .iter()
            .filter_map(|(key, queued)| {
                shaped
                    .get(&queued.parent_id)
                    .map(|result| (key.clone(), result.clone()))
            })
            .collect())
    }

    async fn shape(
        &self,
        record: Value,
        info: &ResolutionInfo,
        auth: Option<&AuthPrincipal>,
    ) -> Result<ShapedResult> {
        if self.kind.is_morph() {
            let value = self
                .services
                .sanitizer
                .sanitize_attribute(record, &self.content_type, &self.attribute_name, auth)
                .await
                .map_err(|err| Error::Sanitize(Arc::new(err)))?;
            return Ok(ShapedResult::Raw(value));
        }

        if self.kind.is_to_many() {
            Ok(ShapedResult::Collection(to_entity_response_collection(
                record,
                info.clone(),
            )))
        } else {
            Ok(ShapedResult::Entity(to_entity_response(record, info.clone())))
        }
    }
}

impl BatchFn<String, QueuedRequest, ShapedResult> for AssociationFetcher {
    fn load(
        &self,
        batch: Vec<(String, QueuedRequest)>,
    ) -> BoxFuture<'static, Result<HashMap<String, ShapedResult>>> {
        let this = self.clone();
        Box::pin(async move { this.fetch(batch).await })
    }
}

/// Batching engine for one association attribute within one request.
pub struct AssociationLoader {
    content_type_uid: String,
    attribute_name: String,
    kind: RelationKind,
    target_uid: Option<String>,
    loader: BatchLoader<String, QueuedRequest, ShapedResult>,
}

impl AssociationLoader {
    /// Resolves the attribute and its target. Fails before any fetch when the content
    /// type, the attribute, or a fixed relation target is unknown.
    pub fn new(
        content_type_uid: &str,
        attribute_name: &str,
        services: Arc<Services>,
        config: &LoaderConfig,
    ) -> Result<Self> {
        let configuration_error = || Error::Configuration {
            content_type: content_type_uid.to_string(),
            attribute: attribute_name.to_string(),
        };

        let content_type =
            services
                .models
                .get_model(content_type_uid)
                .ok_or_else(|| Error::UnknownContentType {
                    uid: content_type_uid.to_string(),
                })?;
        let attribute = content_type
            .get_attribute(attribute_name)
            .ok_or_else(configuration_error)?;
        let kind = RelationKind::of(attribute).ok_or_else(configuration_error)?;
        let target_uid = content_type.target_of(attribute);

        let target = match (kind, target_uid.as_deref()) {
            (RelationKind::Morph { .. }, _) => None,
            (_, Some(uid)) => Some(
                services
                    .models
                    .get_model(uid)
                    .ok_or_else(|| Error::UnknownContentType {
                        uid: uid.to_string(),
                    })?,
            ),
            (_, None) => return Err(configuration_error()),
        };

        tracing::debug!(
            content_type = %content_type_uid,
            attribute = %attribute_name,
            kind = ?kind,
            target = ?target_uid,
            "created association loader"
        );

        let fetcher = AssociationFetcher {
            services,
            content_type,
            attribute_name: Arc::from(attribute_name),
            kind,
            target,
            args_strategy: config.args_strategy,
        };

        Ok(Self {
            content_type_uid: content_type_uid.to_string(),
            attribute_name: attribute_name.to_string(),
            kind,
            target_uid,
            loader: BatchLoader::new(config.batch_delay(), fetcher),
        })
    }

    pub fn content_type_uid(&self) -> &str {
        &self.content_type_uid
    }

    pub fn attribute_name(&self) -> &str {
        &self.attribute_name
    }

    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    pub fn target_uid(&self) -> Option<&str> {
        self.target_uid.as_deref()
    }

    /// Queues `request` into the current batch and waits for its shaped result.
    /// `Ok(None)` means the fetch returned nothing for this parent.
    pub async fn load(&self, request: BatchRequest) -> Result<Option<ShapedResult>> {
        let parent_id = parent_id(&request.parent)?;
        let key = cache_key(&self.content_type_uid, &parent_id, &request.args);

        self.loader
            .load(key, QueuedRequest { parent_id, request })
            .await
    }
}

fn resolver<F>(f: F) -> F
where
    F: for<'a> Fn(ResolverContext<'a>) -> FieldFuture<'a> + Send + Sync + 'static,
{
    f
}

fn parent_entity(parent: &FieldValue<'_>) -> Result<Value> {
    if let Some(entity) = parent.downcast_ref::<Value>() {
        return Ok(entity.clone());
    }

    match parent.as_value() {
        Some(value) => value
            .clone()
            .into_json()
            .map_err(|err| Error::invalid_parent(err.to_string())),
        None => Err(Error::invalid_parent(
            "parent is neither a JSON entity nor a GraphQL value",
        )),
    }
}

/// Builds the field resolver for `content_type_uid::attribute_name`.
///
/// The resolver expects a [`RequestContext`] in the request data and routes every
/// call through that request's loader for the attribute.
pub fn build_association_resolver(
    content_type_uid: impl Into<String>,
    attribute_name: impl Into<String>,
) -> impl for<'a> Fn(ResolverContext<'a>) -> FieldFuture<'a> + Send + Sync + 'static {
    let content_type_uid: Arc<str> = Arc::from(content_type_uid.into());
    let attribute_name: Arc<str> = Arc::from(attribute_name.into());

    resolver(move |ctx| {
        let content_type_uid = content_type_uid.clone();
        let attribute_name = attribute_name.clone();

        FieldFuture::new(async move {
            let context = ctx
                .ctx
                .data::<RequestContext>()
                .map_err(|_| Error::MissingContext)?;

            let loader = context
                .loaders()
                .get_or_init(&content_type_uid, &attribute_name)
                .await?;

            let parent = parent_entity(ctx.parent_value)?;
            let args = ConstValue::Object(ctx.args.as_index_map().clone()).into_json()?;

            let result = loader
                .load(BatchRequest {
                    parent,
                    args,
                    state: context.state.clone(),
                })
                .await?;

            result.map(ShapedResult::into_field_value).transpose()
        })
    })
}
