use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::association::AssociationLoader;
use crate::config::LoaderConfig;
use crate::error::Result;
use crate::services::Services;

/// Authenticated caller of a request, handed to the sanitizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthPrincipal {
    pub strategy: String,
    #[serde(default)]
    pub credentials: Value,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl AuthPrincipal {
    pub fn new(strategy: impl Into<String>, credentials: Value) -> Self {
        Self {
            strategy: strategy.into(),
            credentials,
            scopes: Vec::new(),
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self::new("bearer", Value::String(token.into()))
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Ambient state of one request, copied into every queued load.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RequestState {
    pub auth: Option<AuthPrincipal>,
}

/// Per-request registry of association loaders, one per (content type, attribute).
pub struct AssociationLoaders {
    services: Arc<Services>,
    config: LoaderConfig,
    loaders: Mutex<HashMap<(String, String), Arc<AssociationLoader>>>,
}

impl AssociationLoaders {
    pub fn new(services: Arc<Services>, config: LoaderConfig) -> Self {
        Self {
            services,
            config,
            loaders: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the request's loader for `content_type_uid::attribute_name`, building it
    /// on first use. Construction errors are returned without caching anything.
    pub async fn get_or_init(
        &self,
        content_type_uid: &str,
        attribute_name: &str,
    ) -> Result<Arc<AssociationLoader>> {
        let key = (content_type_uid.to_string(), attribute_name.to_string());
        let mut loaders = self.loaders.lock().await;

        if let Some(loader) = loaders.get(&key) {
            return Ok(loader.clone());
        }

        let loader = Arc::new(AssociationLoader::new(
            content_type_uid,
            attribute_name,
            self.services.clone(),
            &self.config,
        )?);
        loaders.insert(key, loader.clone());

        Ok(loader)
    }

    pub async fn len(&self) -> usize {
        self.loaders.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Request data attached to every GraphQL execution. Created when the request starts
/// and dropped with it, taking its loaders along.
pub struct RequestContext {
    pub state: RequestState,
    loaders: AssociationLoaders,
}

impl RequestContext {
    pub fn new(services: Arc<Services>) -> Self {
        Self::with_config(services, LoaderConfig::default())
    }

    pub fn with_config(services: Arc<Services>, config: LoaderConfig) -> Self {
        Self {
            state: RequestState::default(),
            loaders: AssociationLoaders::new(services, config),
        }
    }

    pub fn with_auth(mut self, auth: Option<AuthPrincipal>) -> Self {
        self.state.auth = auth;
        self
    }

    pub fn auth(&self) -> Option<&AuthPrincipal> {
        self.state.auth.as_ref()
    }

    pub fn loaders(&self) -> &AssociationLoaders {
        &self.loaders
    }
}
