//! Environment Classes Retriever
//!
//! Caches `environment_classes` payloads per environment, revalidates them
//! with the ETag Puppet handed out, and makes every concurrent request for an
//! environment share a single upstream call.
//!
//! Waiting is bounded by [`RetrieverConfig::wait_bound`]. When the bound
//! elapses the caller gets [`ClassesError::FetchTimeout`] while the fetch
//! itself keeps running on its own task and still refreshes the cache.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::parser;
use crate::source::{ClassSource, FetchResult, UPSTREAM_DEADLINE};
use crate::types::{ClassesError, ClassesPayload, FileResult, PuppetClass};

/// Result delivered to every caller sharing a fetch
pub type FetchOutcome = Result<Arc<ClassesPayload>, ClassesError>;

/// Handle on the single in-flight fetch for an environment
pub type ClassesFetch = Shared<BoxFuture<'static, FetchOutcome>>;

/// Retriever configuration
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// How long `get_classes` waits for a fetch before giving up
    pub wait_bound: Duration,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            wait_bound: Duration::from_secs(30),
        }
    }
}

struct CacheEntry {
    validation_token: Option<String>,
    payload: Arc<ClassesPayload>,
}

#[derive(Default)]
struct RetrieverState {
    cache: HashMap<String, CacheEntry>,
    in_flight: HashMap<String, ClassesFetch>,
}

struct Inner<S> {
    source: S,
    state: Mutex<RetrieverState>,
}

/// Removes the in-flight entry when the fetch task finishes, panics included
struct InFlightGuard<'a> {
    state: &'a Mutex<RetrieverState>,
    environment: &'a str,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.state.lock().in_flight.remove(self.environment);
    }
}

impl<S: ClassSource> Inner<S> {
    async fn do_fetch(&self, environment: &str) -> FetchOutcome {
        let _in_flight = InFlightGuard {
            state: &self.state,
            environment,
        };

        let token = self
            .state
            .lock()
            .cache
            .get(environment)
            .and_then(|entry| entry.validation_token.clone());

        debug!(
            "Fetching classes for environment {} (etag: {:?})",
            environment, token
        );

        match self
            .source
            .fetch(environment, token.as_deref(), UPSTREAM_DEADLINE)
            .await?
        {
            FetchResult::Fresh { payload, token } => {
                info!(
                    "Cached {} files for environment {}",
                    payload.files.len(),
                    environment
                );
                let payload = Arc::new(payload);
                self.state.lock().cache.insert(
                    environment.to_string(),
                    CacheEntry {
                        validation_token: token,
                        payload: Arc::clone(&payload),
                    },
                );
                Ok(payload)
            }
            FetchResult::NotModified { token } => {
                let mut state = self.state.lock();
                match state.cache.get_mut(environment) {
                    Some(entry) => {
                        debug!("Classes for environment {} not modified", environment);
                        entry.validation_token = token;
                        Ok(Arc::clone(&entry.payload))
                    }
                    None => Err(ClassesError::CacheInconsistency(environment.to_string())),
                }
            }
        }
    }
}

/// Shared, revalidating retriever of environment classes
///
/// Cloning is cheap and every clone shares the same cache.
pub struct EnvironmentClassesRetriever<S> {
    inner: Arc<Inner<S>>,
    wait_bound: Duration,
}

impl<S> Clone for EnvironmentClassesRetriever<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            wait_bound: self.wait_bound,
        }
    }
}

impl<S: ClassSource + 'static> EnvironmentClassesRetriever<S> {
    pub fn new(source: S, config: RetrieverConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                state: Mutex::new(RetrieverState::default()),
            }),
            wait_bound: config.wait_bound,
        }
    }

    pub fn wait_bound(&self) -> Duration {
        self.wait_bound
    }

    /// Whether a fetch for `environment` is currently running
    pub fn is_fetching(&self, environment: &str) -> bool {
        self.inner.state.lock().in_flight.contains_key(environment)
    }

    /// Get the in-flight fetch for `environment`, starting one if none is running.
    ///
    /// Does not wait. Must be called from within a Tokio runtime.
    pub fn async_get_classes(&self, environment: &str) -> ClassesFetch {
        let mut state = self.inner.state.lock();

        if let Some(fetch) = state.in_flight.get(environment) {
            debug!("Joining in-flight fetch for environment {}", environment);
            return fetch.clone();
        }

        // The task cannot deregister before this insert: it needs the lock held here.
        let inner = Arc::clone(&self.inner);
        let name = environment.to_string();
        let task = tokio::spawn(async move { inner.do_fetch(&name).await });

        let fetch = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(ClassesError::RemoteUnavailable(format!(
                    "classes fetch task failed: {}",
                    e
                ))),
            }
        }
        .boxed()
        .shared();

        state
            .in_flight
            .insert(environment.to_string(), fetch.clone());
        fetch
    }

    /// Get the class payload for `environment`, waiting at most the wait bound
    pub async fn get_classes(&self, environment: &str) -> FetchOutcome {
        let fetch = self.async_get_classes(environment);

        match tokio::time::timeout(self.wait_bound, fetch).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    "Gave up waiting {:?} for classes of environment {}; fetch continues in background",
                    self.wait_bound, environment
                );
                Err(ClassesError::FetchTimeout {
                    environment: environment.to_string(),
                    waited: self.wait_bound,
                })
            }
        }
    }

    /// Flat class list, files with parse errors left out
    pub async fn classes_in_environment(
        &self,
        environment: &str,
    ) -> Result<Vec<PuppetClass>, ClassesError> {
        let payload = self.get_classes(environment).await?;
        Ok(parser::classes_in_environment(&payload))
    }

    /// Per-file classes and parse errors
    pub async fn classes_and_errors_in_environment(
        &self,
        environment: &str,
    ) -> Result<Vec<FileResult>, ClassesError> {
        let payload = self.get_classes(environment).await?;
        Ok(parser::classes_and_errors_in_environment(&payload))
    }
}
