use std::sync::Arc;

use async_graphql::{dynamic, Request, Response, ServerError, Variables};

use crate::config::LoaderConfig;
use crate::context::{AuthPrincipal, RequestContext};
use crate::services::Services;

/// A dynamic schema plus the collaborators its association resolvers need.
///
/// Each execution gets a fresh [`RequestContext`], so association loaders and the
/// auth principal never outlive the request that created them.
#[derive(Clone)]
pub struct BuiltSchema {
    pub graphql_schema: dynamic::Schema,
    services: Arc<Services>,
    config: LoaderConfig,
}

impl BuiltSchema {
    pub fn from_dynamic_schema(graphql_schema: dynamic::Schema, services: Arc<Services>) -> Self {
        Self {
            graphql_schema,
            services,
            config: LoaderConfig::default(),
        }
    }

    pub fn with_config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn request_context(&self, auth: Option<AuthPrincipal>) -> RequestContext {
        RequestContext::with_config(self.services.clone(), self.config.clone()).with_auth(auth)
    }

    pub async fn execute(&self, request: Request) -> Response {
        self.execute_as(request, None).await
    }

    pub async fn execute_as(&self, request: Request, auth: Option<AuthPrincipal>) -> Response {
        let request = request.data(self.request_context(auth));
        self.graphql_schema.execute(request).await
    }

    pub async fn execute_query(&self, query: &str) -> Response {
        let request = Request::new(query);
        self.execute(request).await
    }

    pub async fn execute_with_variables(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Response {
        match serde_json::from_value::<Variables>(variables) {
            Ok(vars) => self.execute(Request::new(query).variables(vars)).await,
            Err(e) => Response::from_errors(vec![ServerError::new(
                format!("Invalid variables: {}", e),
                None,
            )]),
        }
    }
}
