//! assistd — multi-agent assistant runtime.
//!
//! Jobs flow from producers (cron, chat buses, the HTTP surface, agents
//! dispatching to each other) through one shared queue to a router that runs
//! each job in an agent session under that agent's concurrency limit.

pub mod agent;
pub mod api;
pub mod channels;
pub mod config;
pub mod context;
pub mod defs;
pub mod error;
pub mod history;
pub mod llm;
pub mod server;
pub mod testing;
pub mod tools;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use config::RuntimeConfig;
pub use context::RuntimeContext;
pub use error::{Error, ErrorClass, Result};
pub use server::Server;
