use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use super::BuiltSchema;
use crate::context::AuthPrincipal;

#[derive(Debug, Deserialize)]
pub struct GraphQLRequest {
    pub query: String,
    #[serde(default)]
    pub variables: Option<serde_json::Value>,
    #[serde(default, rename = "operationName")]
    pub operation_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GraphQLResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<serde_json::Value>,
}

struct AppState {
    schema: BuiltSchema,
}

pub struct GraphQLServer {
    schema: BuiltSchema,
}

impl GraphQLServer {
    pub fn new(schema: BuiltSchema) -> Self {
        Self { schema }
    }

    pub async fn serve(self, addr: &str) -> Result<(), std::io::Error> {
        let addr: SocketAddr = addr.parse().map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Invalid address: {}", e),
            )
        })?;

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION]);

        let app = self.router().layer(cors);

        tracing::info!(%addr, "GraphQL server listening on http://{}/graphql", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await
    }

    pub fn router(self) -> Router {
        let state = Arc::new(AppState {
            schema: self.schema,
        });

        Router::new()
            .route("/graphql", post(graphql_post_handler))
            .route("/health", get(health_handler))
            .with_state(state)
    }
}

/// `Authorization: Bearer <token>` becomes the request's auth principal.
fn auth_from_headers(headers: &HeaderMap) -> Option<AuthPrincipal> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();

    if token.is_empty() {
        None
    } else {
        Some(AuthPrincipal::bearer(token))
    }
}

async fn graphql_post_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<GraphQLRequest>,
) -> impl IntoResponse {
    let mut gql_request = async_graphql::Request::new(&request.query);

    if let Some(vars) = request.variables {
        match serde_json::from_value(vars) {
            Ok(variables) => gql_request = gql_request.variables(variables),
            Err(e) => {
                let errors = vec![serde_json::json!({
                    "message": format!("Invalid variables: {}", e)
                })];
                return (
                    StatusCode::BAD_REQUEST,
                    Json(GraphQLResponse { data: None, errors }),
                );
            }
        }
    }

    if let Some(op_name) = request.operation_name {
        gql_request = gql_request.operation_name(op_name);
    }

    let response = state
        .schema
        .execute_as(gql_request, auth_from_headers(&headers))
        .await;

    let data = if response.data != async_graphql::Value::Null {
        Some(response.data.into_json().unwrap_or(serde_json::Value::Null))
    } else {
        None
    };

    let errors: Vec<serde_json::Value> = response
        .errors
        .into_iter()
        .map(|e| {
            serde_json::json!({
                "message": e.message,
                "locations": e.locations,
                "path": e.path
            })
        })
        .collect();

    let status = if errors.is_empty() || data.is_some() {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };

    (status, Json(GraphQLResponse { data, errors }))
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_type::Models;
    use crate::context::RequestContext;
    use crate::memory::InMemoryStore;
    use crate::services::Services;
    use async_graphql::dynamic;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use hyper::Request;
    use tower::ServiceExt;

    fn create_test_schema() -> BuiltSchema {
        let query = dynamic::Object::new("Query")
            .field(dynamic::Field::new(
                "hello",
                dynamic::TypeRef::named_nn(dynamic::TypeRef::STRING),
                |_ctx| {
                    dynamic::FieldFuture::new(async move {
                        Ok(Some(dynamic::FieldValue::value("world")))
                    })
                },
            ))
            .field(dynamic::Field::new(
                "token",
                dynamic::TypeRef::named(dynamic::TypeRef::STRING),
                |ctx| {
                    dynamic::FieldFuture::new(async move {
                        let context = ctx.ctx.data::<RequestContext>()?;
                        Ok(context.auth().and_then(|auth| {
                            auth.credentials
                                .as_str()
                                .map(|token| dynamic::FieldValue::value(token.to_string()))
                        }))
                    })
                },
            ));

        let schema = dynamic::Schema::build("Query", None, None)
            .register(query)
            .finish()
            .unwrap();

        let models = Arc::new(Models::new());
        let store = Arc::new(InMemoryStore::new(models.clone()));
        BuiltSchema::from_dynamic_schema(schema, Arc::new(Services::new(models, store)))
    }

    async fn graphql_post(
        app: &Router,
        body: &str,
        authorization: Option<&str>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/graphql")
            .header("content-type", "application/json");
        if let Some(authorization) = authorization {
            builder = builder.header("authorization", authorization);
        }

        let response = app
            .clone()
            .oneshot(builder.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        (status, json)
    }

    #[tokio::test]
    async fn test_graphql_request_parsing() {
        let json = r#"{"query": "{ hello }"}"#;
        let request: GraphQLRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.query, "{ hello }");
        assert!(request.variables.is_none());
        assert!(request.operation_name.is_none());
    }

    #[tokio::test]
    async fn test_simple_query() {
        let app = GraphQLServer::new(create_test_schema()).router();

        let (status, json) = graphql_post(&app, r#"{"query": "{ hello }"}"#, None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["hello"], "world");
    }

    #[tokio::test]
    async fn test_bearer_token_reaches_request_context() {
        let app = GraphQLServer::new(create_test_schema()).router();

        let (_, anonymous) = graphql_post(&app, r#"{"query": "{ token }"}"#, None).await;
        assert_eq!(anonymous["data"]["token"], serde_json::Value::Null);

        let (status, json) =
            graphql_post(&app, r#"{"query": "{ token }"}"#, Some("Bearer abc123")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["token"], "abc123");
    }

    #[tokio::test]
    async fn test_invalid_query_returns_error() {
        let app = GraphQLServer::new(create_test_schema()).router();

        let (status, json) = graphql_post(&app, r#"{"query": "{ nonexistent }"}"#, None).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["errors"].is_array());
        assert!(!json["errors"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_variables_return_error() {
        let app = GraphQLServer::new(create_test_schema()).router();

        let (status, json) = graphql_post(
            &app,
            r#"{"query": "{ hello }", "variables": [1, 2]}"#,
            None,
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json.get("data").is_none());
        assert!(json["errors"][0]["message"]
            .as_str()
            .unwrap()
            .starts_with("Invalid variables"));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = GraphQLServer::new(create_test_schema()).router();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[test]
    fn test_auth_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(auth_from_headers(&headers), None);

        headers.insert(header::AUTHORIZATION, "Basic xyz".parse().unwrap());
        assert_eq!(auth_from_headers(&headers), None);

        headers.insert(header::AUTHORIZATION, "Bearer  tok ".parse().unwrap());
        assert_eq!(auth_from_headers(&headers), Some(AuthPrincipal::bearer("tok")));
    }

    #[test]
    fn test_graphql_response_serialization_with_errors() {
        let response = GraphQLResponse {
            data: None,
            errors: vec![serde_json::json!({"message": "Something went wrong"})],
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("errors"));
        assert!(json.contains("Something went wrong"));
        assert!(!json.contains("data"));
    }
}
