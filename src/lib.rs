//! stampede — a concurrent load-generation engine.
//!
//! Orchestrates named user groups of simulated users, each repeatedly
//! executing a pluggable [`Transaction`](script::Transaction) against a
//! target system. Every iteration is timed, tagged with its group and custom
//! sub-timers, and funneled over a single aggregation channel into a durable
//! CSV log, with live progress feedback and an optional remote control
//! endpoint for asynchronous triggering.
pub(crate) mod agent;

pub mod collector;
pub mod config;
pub mod error;
pub mod group;
pub mod progress;
pub mod report;
pub mod runner;
pub mod script;
pub mod server;

pub mod prelude {
    pub use crate::config::{GroupConfig, Project, RunConfig, TestConfig};
    pub use crate::runner::Coordinator;
    pub use crate::script::{
        BoxFuture, CustomTimers, ScriptContext, ScriptError, ScriptRegistry, Transaction,
        TransactionFactory, SCRIPTS,
    };
}
