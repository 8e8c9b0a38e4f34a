pub mod args;
pub mod association;
pub mod config;
pub mod content_type;
pub mod context;
pub mod error;
pub mod format;
pub mod loader;
pub mod memory;
pub mod sanitize;
pub mod server;
pub mod services;

pub use async_graphql_value::ConstValue;
pub use args::{canonical_json, ArgsTransformer, DefaultArgsTransformer};
pub use association::{build_association_resolver, AssociationLoader, BatchRequest};
pub use config::{ArgsStrategy, LoaderConfig, PaginationConfig};
pub use content_type::{Attribute, ContentType, ModelRegistry, Models, RelationKind, MEDIA_CONTENT_TYPE_UID};
pub use context::{AssociationLoaders, AuthPrincipal, RequestContext, RequestState};
pub use error::{Error, Result, SchemaError};
pub use format::{EntityResponse, EntityResponseCollection, ResolutionInfo, ShapedResult};
pub use loader::{BatchFn, BatchLoader, BoxFuture};
pub use memory::InMemoryStore;
pub use sanitize::{ContentApiSanitizer, Sanitizer};
pub use server::{BuiltSchema, GraphQLRequest, GraphQLResponse, GraphQLServer};
pub use services::{EntityService, ParentRecord, Services};
