//! Named executor registry.
//!
//! The process-wide map from executor names to [`ManagedExecutor`]
//! instances, with create-on-first-use and destroy-on-shutdown lifecycle.
//! The registry is an explicit value the embedder owns and threads through —
//! not a global static — per the library's no-hidden-state rule.

use crate::config::ContextServiceDefinition;
use crate::errors::{ConfigError, ConfigResult};
use crate::executor::ManagedExecutor;
use crate::policy::PolicyExecutorConfig;
use crate::provider::ContextProvider;
use crate::service::ContextService;
use crate::types::ExecutorName;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

struct Registered {
    definition: ContextServiceDefinition,
    executor: Arc<ManagedExecutor>,
}

/// Maps executor names to managed executor instances.
///
/// Read-mostly and safe for concurrent use from many threads.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: RwLock<HashMap<ExecutorName, Registered>>,
}

impl ExecutorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the executor registered under `name`, creating it on first
    /// use.
    ///
    /// On first use, the executor is built from `definition`, `providers`,
    /// and `policy_config`. A later call under the same name with an
    /// *identical* definition returns the existing instance; a call with a
    /// *differing* definition is a configuration error — duplicate
    /// same-name definitions with conflicting policy are flagged, never
    /// silently resolved.
    pub fn get_or_create(
        &self,
        name: &ExecutorName,
        definition: &ContextServiceDefinition,
        providers: Vec<Arc<dyn ContextProvider>>,
        policy_config: PolicyExecutorConfig,
    ) -> ConfigResult<Arc<ManagedExecutor>> {
        {
            let executors = self.executors.read();
            if let Some(registered) = executors.get(name) {
                if registered.definition == *definition {
                    return Ok(Arc::clone(&registered.executor));
                }
                warn!(%name, "conflicting executor definitions under one name");
                return Err(ConfigError::DuplicateDefinition { name: name.clone() });
            }
        }

        let mut executors = self.executors.write();
        // Re-check under the write lock; another thread may have won.
        if let Some(registered) = executors.get(name) {
            if registered.definition == *definition {
                return Ok(Arc::clone(&registered.executor));
            }
            return Err(ConfigError::DuplicateDefinition { name: name.clone() });
        }

        let service = Arc::new(ContextService::new(definition.clone(), providers));
        let executor = Arc::new(ManagedExecutor::new(name.clone(), service, policy_config));
        debug!(%name, "created managed executor");
        executors.insert(
            name.clone(),
            Registered {
                definition: definition.clone(),
                executor: Arc::clone(&executor),
            },
        );
        Ok(executor)
    }

    /// Looks up an executor without creating one.
    pub fn get(&self, name: &ExecutorName) -> Option<Arc<ManagedExecutor>> {
        self.executors
            .read()
            .get(name)
            .map(|registered| Arc::clone(&registered.executor))
    }

    /// The names currently registered.
    pub fn names(&self) -> Vec<ExecutorName> {
        self.executors.read().keys().cloned().collect()
    }

    /// Removes and shuts down the executor registered under `name`.
    ///
    /// Returns whether an executor was registered.
    pub fn shutdown(&self, name: &ExecutorName) -> bool {
        let removed = self.executors.write().remove(name);
        match removed {
            Some(registered) => {
                registered.executor.shutdown();
                true
            }
            None => false,
        }
    }

    /// Shuts down and removes every registered executor.
    pub fn shutdown_all(&self) {
        let drained: Vec<Registered> = {
            let mut executors = self.executors.write();
            executors.drain().map(|(_, registered)| registered).collect()
        };
        for registered in drained {
            registered.executor.shutdown();
        }
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("names", &self.names())
            .finish()
    }
}
