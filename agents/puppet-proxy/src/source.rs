//! Remote Sources
//!
//! Trait seams between the retrieval engine and whatever talks to Puppet.
//! The HTTP client in [`crate::apiv3`] implements both; tests substitute
//! in-memory fakes.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::types::{ClassesError, ClassesPayload, Environment};

/// Maximum time Puppet may take to answer one `environment_classes` request.
///
/// Independent of how long callers are willing to wait for the result.
pub const UPSTREAM_DEADLINE: Duration = Duration::from_secs(300);

/// Outcome of one conditional classes fetch
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult {
    /// New payload along with its validation token
    Fresh {
        payload: ClassesPayload,
        token: Option<String>,
    },
    /// The payload matching the token sent is still current
    NotModified { token: Option<String> },
}

/// Performs a single conditional fetch of an environment's classes
#[async_trait]
pub trait ClassSource: Send + Sync {
    async fn fetch(
        &self,
        environment: &str,
        token: Option<&str>,
        deadline: Duration,
    ) -> Result<FetchResult, ClassesError>;
}

/// Lists the environments Puppet knows about
#[async_trait]
pub trait EnvironmentSource: Send + Sync {
    async fn environments(&self) -> Result<Vec<Environment>, ClassesError>;

    async fn environment(&self, name: &str) -> Result<Environment, ClassesError> {
        self.environments()
            .await?
            .into_iter()
            .find(|env| env.name == name)
            .ok_or_else(|| ClassesError::EnvironmentNotFound(name.to_string()))
    }
}

#[async_trait]
impl<T: ClassSource + ?Sized> ClassSource for Arc<T> {
    async fn fetch(
        &self,
        environment: &str,
        token: Option<&str>,
        deadline: Duration,
    ) -> Result<FetchResult, ClassesError> {
        (**self).fetch(environment, token, deadline).await
    }
}

#[async_trait]
impl<T: EnvironmentSource + ?Sized> EnvironmentSource for Arc<T> {
    async fn environments(&self) -> Result<Vec<Environment>, ClassesError> {
        (**self).environments().await
    }

    async fn environment(&self, name: &str) -> Result<Environment, ClassesError> {
        (**self).environment(name).await
    }
}
