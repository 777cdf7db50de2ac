/*!
 * Worker Registry
 * Name-to-factory table for workers constructible inside a child
 * process from a launch token
 */

mod workers;

pub use workers::register_builtins;

use crate::runner::Task;
use log::debug;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::LazyLock;
use thiserror::Error;

/// Registry operation result
pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("unknown worker: {0:?}")]
    NotFound(String),

    #[error("could not construct {name:?}: {reason}")]
    Construct { name: String, reason: String },
}

impl RegistryError {
    pub fn construct(name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        RegistryError::Construct {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

/// Builds one worker from token arguments.
pub type FactoryFn =
    dyn Fn(&[Value], &Map<String, Value>) -> RegistryResult<Box<dyn Task>> + Send + Sync;

static WORKERS: LazyLock<dashmap::DashMap<String, Arc<FactoryFn>>> =
    LazyLock::new(dashmap::DashMap::new);

/// Process-wide table of constructible workers.
///
/// The set of targets is closed: a child process will only ever build
/// what was registered here before launch, so an arbitrary token can
/// name nothing outside this table.
pub struct WorkerRegistry;

impl WorkerRegistry {
    /// Register a factory under `name`, replacing any previous entry.
    pub fn register(name: impl Into<String>, factory: Arc<FactoryFn>) {
        let name = name.into();
        debug!("registering worker {name:?}");
        WORKERS.insert(name, factory);
    }

    pub fn contains(name: &str) -> bool {
        WORKERS.contains_key(name)
    }

    pub fn names() -> Vec<String> {
        let mut names: Vec<String> = WORKERS.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Construct the named worker with the given token arguments.
    pub fn create(
        name: &str,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> RegistryResult<Box<dyn Task>> {
        let factory = WORKERS
            .get(name)
            .map(|e| e.value().clone())
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        factory(args, kwargs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{RunnerResult, Tick};
    use pretty_assertions::assert_eq;

    struct Noop;

    impl Task for Noop {
        fn io(&mut self, tick: &mut Tick<'_>) -> RunnerResult<()> {
            tick.stop();
            Ok(())
        }
    }

    #[test]
    fn create_unknown_is_not_found() {
        assert!(matches!(
            WorkerRegistry::create("no-such-worker", &[], &Map::new()),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn registered_factory_is_invoked() {
        WorkerRegistry::register(
            "noop-test",
            Arc::new(|_args, _kwargs| Ok(Box::new(Noop) as Box<dyn Task>)),
        );
        assert!(WorkerRegistry::contains("noop-test"));

        let task = WorkerRegistry::create("noop-test", &[], &Map::new());
        assert!(task.is_ok());
    }

    #[test]
    fn builtins_are_listed() {
        register_builtins();
        let names = WorkerRegistry::names();
        assert!(names.contains(&"echo-server".to_string()));
        assert!(names.contains(&"idle".to_string()));
        assert_eq!(names, {
            let mut sorted = names.clone();
            sorted.sort();
            sorted
        });
    }
}
