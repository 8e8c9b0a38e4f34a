use std::sync::Arc;

use anyhow::Result;
use async_graphql::dynamic::{Field, FieldFuture, FieldValue, InputValue, Object, Schema, TypeRef};
use convoy_associations::format::{
    entity_response_collection_type_name, entity_response_type_name, register_entity_types,
    register_shared_types, JSON_SCALAR,
};
use convoy_associations::{
    build_association_resolver, Attribute, BuiltSchema, ContentType, GraphQLServer,
    InMemoryStore, LoaderConfig, Models, PaginationConfig, Services, MEDIA_CONTENT_TYPE_UID,
};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

const ARTICLE: &str = "api::article.article";
const COMMENT: &str = "api::comment.comment";
const AUTHOR: &str = "api::author.author";

fn models() -> Models {
    Models::new()
        .register(
            ContentType::new(ARTICLE)
                .attribute("title", Attribute::scalar("string"))
                .attribute("comments", Attribute::relation("oneToMany", COMMENT))
                .attribute("author", Attribute::relation("manyToOne", AUTHOR))
                .attribute("cover", Attribute::media(false))
                .attribute("related", Attribute::morph("morphToMany")),
        )
        .register(
            ContentType::new(COMMENT)
                .attribute("body", Attribute::scalar("text"))
                .attribute("ip", Attribute::scalar("string").private()),
        )
        .register(
            ContentType::new(AUTHOR)
                .attribute("name", Attribute::scalar("string"))
                .attribute("password", Attribute::scalar("password")),
        )
        .register(ContentType::new(MEDIA_CONTENT_TYPE_UID).attribute("url", Attribute::scalar("string")))
}

fn store(models: Arc<Models>) -> Result<InMemoryStore> {
    InMemoryStore::new(models)
        .with(
            ARTICLE,
            vec![
                json!({"id": 1, "title": "Batching resolvers", "comments": [11, 12], "author": 100,
                       "cover": 7, "related": [{"__type": AUTHOR, "id": 101}]}),
                json!({"id": 2, "title": "Avoiding N+1", "comments": [13], "author": 101,
                       "related": [{"__type": COMMENT, "id": 11}]}),
                json!({"id": 3, "title": "Drafts", "comments": [], "author": 100}),
            ],
        )?
        .with(
            COMMENT,
            vec![
                json!({"id": 11, "body": "Nice write-up", "ip": "10.0.0.1"}),
                json!({"id": 12, "body": "What about caching?", "ip": "10.0.0.2"}),
                json!({"id": 13, "body": "Finally", "ip": "10.0.0.3"}),
            ],
        )?
        .with(
            AUTHOR,
            vec![
                json!({"id": 100, "name": "Ada", "password": "hunter2"}),
                json!({"id": 101, "name": "Grace", "password": "correct horse"}),
            ],
        )?
        .with(MEDIA_CONTENT_TYPE_UID, vec![json!({"id": 7, "url": "/uploads/cover.png"})])
}

fn association(name: &str, type_ref: TypeRef) -> Field {
    Field::new(name, type_ref, build_association_resolver(ARTICLE, name))
        .argument(InputValue::new("filters", TypeRef::named(JSON_SCALAR)))
        .argument(InputValue::new("pagination", TypeRef::named(JSON_SCALAR)))
}

fn scalar(name: &'static str, type_ref: TypeRef) -> Field {
    Field::new(name, type_ref, move |ctx| {
        FieldFuture::new(async move {
            let entity = ctx.parent_value.try_downcast_ref::<Value>()?;
            Ok(entity.get(name).map(|value| match value {
                Value::String(s) => FieldValue::value(s.clone()),
                other => FieldValue::value(other.to_string()),
            }))
        })
    })
}

fn build_schema(articles: Vec<Value>) -> Result<Schema> {
    let article = Object::new("Article")
        .field(scalar("id", TypeRef::named_nn(TypeRef::ID)))
        .field(scalar("title", TypeRef::named(TypeRef::STRING)))
        .field(association(
            "comments",
            TypeRef::named(entity_response_collection_type_name("Comment")),
        ))
        .field(association(
            "author",
            TypeRef::named(entity_response_type_name("Author")),
        ))
        .field(association(
            "cover",
            TypeRef::named(entity_response_type_name("UploadFile")),
        ))
        .field(association("related", TypeRef::named(JSON_SCALAR)));

    let query = Object::new("Query").field(Field::new(
        "articles",
        TypeRef::named_nn_list_nn("Article"),
        move |_ctx| {
            let articles = articles.clone();
            FieldFuture::new(async move {
                Ok(Some(FieldValue::list(
                    articles.into_iter().map(FieldValue::owned_any),
                )))
            })
        },
    ));

    let mut builder = Schema::build("Query", None, None)
        .register(query)
        .register(article);
    builder = register_shared_types(builder);
    for name in ["Comment", "Author", "UploadFile"] {
        builder = register_entity_types(builder, name);
    }

    Ok(builder.finish()?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,convoy_associations=trace")),
        )
        .init();

    let config = LoaderConfig::from_json(json!({
        "batchDelayMs": 1,
        "argsStrategy": "firstRequest"
    }))?;
    let pagination = PaginationConfig::from_json(json!({"defaultLimit": 25, "maxLimit": 100}))?;

    let models = Arc::new(models());
    let store = store(models.clone())?;
    let articles = store.find_all(ARTICLE);

    let services = Services::new(models, Arc::new(store)).with_pagination(pagination);
    let schema = BuiltSchema::from_dynamic_schema(build_schema(articles)?, Arc::new(services))
        .with_config(config);

    GraphQLServer::new(schema).serve("127.0.0.1:8000").await?;
    Ok(())
}
