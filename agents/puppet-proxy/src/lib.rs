//! Puppet Proxy Library
//!
//! Environment discovery and class retrieval against a Puppet server,
//! with a shared, ETag-revalidated cache of `environment_classes` payloads.

pub mod apiv3;
pub mod parser;
pub mod retriever;
pub mod source;
pub mod types;
pub mod warmup;

pub use apiv3::{PuppetApiClient, PuppetApiConfig};
pub use retriever::{ClassesFetch, EnvironmentClassesRetriever, FetchOutcome, RetrieverConfig};
pub use source::{ClassSource, EnvironmentSource, FetchResult, UPSTREAM_DEADLINE};
pub use types::{
    ClassEntry, ClassesError, ClassesPayload, Environment, FileOutcome, FileResult, ParamSpec,
    PuppetClass,
};
pub use warmup::{warm_cache, WarmupSummary};
