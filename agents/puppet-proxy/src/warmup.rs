//! Class Cache Warm-up
//!
//! Fetches the classes of every known environment at startup so the first
//! real request is served from cache.

use futures::future::join_all;
use tracing::{info, warn};

use crate::retriever::EnvironmentClassesRetriever;
use crate::source::ClassSource;
use crate::types::Environment;

/// Outcome of a warm-up pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmupSummary {
    pub warmed: usize,
    pub failed: usize,
}

/// Start a fetch for every environment and wait for all of them.
///
/// Fetches run concurrently and are shared with any request arriving
/// meanwhile. Failures are logged, not returned.
pub async fn warm_cache<S: ClassSource + 'static>(
    retriever: &EnvironmentClassesRetriever<S>,
    environments: &[Environment],
) -> WarmupSummary {
    info!("Warming class cache for {} environments", environments.len());

    let fetches = environments.iter().map(|env| {
        let fetch = retriever.async_get_classes(&env.name);
        async move { (env.name.as_str(), fetch.await) }
    });

    let mut summary = WarmupSummary::default();
    for (name, outcome) in join_all(fetches).await {
        match outcome {
            Ok(_) => summary.warmed += 1,
            Err(e) => {
                warn!("Failed to warm classes for environment {}: {}", name, e);
                summary.failed += 1;
            }
        }
    }

    info!(
        "Class cache warm-up finished: {} warmed, {} failed",
        summary.warmed, summary.failed
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retriever::RetrieverConfig;
    use crate::source::FetchResult;
    use crate::types::{ClassesError, ClassesPayload};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    /// Knows only `production`; counts fetches
    #[derive(Default)]
    struct ProductionOnly {
        fetches: Mutex<usize>,
    }

    #[async_trait]
    impl ClassSource for ProductionOnly {
        async fn fetch(
            &self,
            environment: &str,
            token: Option<&str>,
            _deadline: Duration,
        ) -> Result<FetchResult, ClassesError> {
            *self.fetches.lock() += 1;
            match (environment, token) {
                ("production", None) => Ok(FetchResult::Fresh {
                    payload: ClassesPayload::default(),
                    token: Some("1".to_string()),
                }),
                ("production", Some(_)) => Ok(FetchResult::NotModified {
                    token: Some("1".to_string()),
                }),
                _ => Err(ClassesError::EnvironmentNotFound(environment.to_string())),
            }
        }
    }

    #[tokio::test]
    async fn test_warm_cache_counts_outcomes() {
        let source = Arc::new(ProductionOnly::default());
        let retriever =
            EnvironmentClassesRetriever::new(Arc::clone(&source), RetrieverConfig::default());
        let environments = vec![
            Environment::new("production", vec![]),
            Environment::new("retired", vec![]),
        ];

        let summary = warm_cache(&retriever, &environments).await;

        assert_eq!(summary, WarmupSummary { warmed: 1, failed: 1 });
        assert_eq!(*source.fetches.lock(), 2);

        // Cached now, so revalidation answers "not modified"
        assert!(retriever.get_classes("production").await.is_ok());
    }
}
