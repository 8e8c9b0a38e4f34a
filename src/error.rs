use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SchemaError {
    #[error("Failed to build GraphQL schema: {message}")]
    BuildError { message: String },

    #[error("Failed to parse: {message}")]
    ParseError { message: String },
}

impl From<serde_json::Error> for SchemaError {
    fn from(err: serde_json::Error) -> Self {
        SchemaError::ParseError {
            message: err.to_string(),
        }
    }
}

/// Errors surfaced by association resolvers.
///
/// `Clone` so a single failed bulk fetch can be handed to every caller that was
/// waiting on the same batch.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Failed to build an association resolver for {content_type}::{attribute}")]
    Configuration {
        content_type: String,
        attribute: String,
    },

    #[error("Unknown content type: {uid}")]
    UnknownContentType { uid: String },

    #[error("Invalid parent entity: {message}")]
    InvalidParent { message: String },

    #[error("Invalid arguments: {message}")]
    Validation { message: String },

    #[error("Failed to load {attribute} of {content_type}: {cause}")]
    Fetch {
        content_type: String,
        attribute: String,
        cause: Arc<anyhow::Error>,
    },

    #[error("Failed to sanitize output: {0}")]
    Sanitize(Arc<anyhow::Error>),

    #[error("Batch was dropped before it produced a result")]
    BatchAborted,

    #[error("Request context is missing from the GraphQL request data")]
    MissingContext,

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }

    pub fn invalid_parent(message: impl Into<String>) -> Self {
        Error::InvalidParent {
            message: message.into(),
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Configuration { .. } | Error::UnknownContentType { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
