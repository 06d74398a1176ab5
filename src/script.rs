//! The transaction capability and the script registry.
//!
//! A script is a named, user-supplied unit of work. The engine never looks
//! inside a transaction; it only constructs one instance per agent, times
//! each `run` call and snapshots the custom timers afterwards.
use linkme::distributed_slice;
use std::collections::HashMap;
use std::sync::Arc;

pub use futures_util::future::BoxFuture;

/// Named sub-measurements a transaction records inside one iteration, in
/// seconds.
pub type CustomTimers = HashMap<String, f64>;

/// Error type user scripts may raise from construction or from an iteration.
pub type ScriptError = Box<dyn std::error::Error + Send + Sync>;

/// Read-only context injected into a transaction at construction, useful for
/// loading unique per-user data.
#[derive(Debug, Clone, Copy)]
pub struct ScriptContext {
    /// Index of the agent within its user group.
    pub thread_num: usize,
    /// Index of the owning user group in launch order.
    pub process_num: usize,
}

/// One pluggable unit of work, measured per iteration.
pub trait Transaction: Send {
    /// Runs one iteration. `timers` persists across iterations and is never
    /// reset by the engine; scripts clear or reuse entries at their own
    /// discretion.
    fn run<'a>(
        &'a mut self,
        timers: &'a mut CustomTimers,
    ) -> BoxFuture<'a, Result<(), ScriptError>>;
}

/// Constructs one transaction instance per agent. Construction failure is
/// fatal to that agent only.
pub trait TransactionFactory: Send + Sync {
    fn construct(&self, cx: &ScriptContext) -> Result<Box<dyn Transaction>, ScriptError>;
}

impl<F> TransactionFactory for F
where
    F: Fn(&ScriptContext) -> Result<Box<dyn Transaction>, ScriptError> + Send + Sync,
{
    fn construct(&self, cx: &ScriptContext) -> Result<Box<dyn Transaction>, ScriptError> {
        (self)(cx)
    }
}

/// Scripts registered at link time: (identifier, constructor). Entries land
/// here from any crate linked into the final binary.
#[distributed_slice]
pub static SCRIPTS: [(
    &'static str,
    fn(&ScriptContext) -> Result<Box<dyn Transaction>, ScriptError>,
)];

/// Maps the script identifiers referenced by configuration to the factories
/// producing their transaction instances.
#[derive(Default, Clone)]
pub struct ScriptRegistry {
    factories: HashMap<String, Arc<dyn TransactionFactory>>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from every script registered via [`SCRIPTS`].
    pub fn discover() -> Self {
        let mut registry = Self::new();
        for (name, construct) in SCRIPTS.iter() {
            registry.insert(name, *construct);
        }
        registry
    }

    pub fn insert<F>(&mut self, name: &str, factory: F)
    where
        F: TransactionFactory + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TransactionFactory>> {
        self.factories.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
