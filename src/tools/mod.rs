//! Tool abstraction for agent capabilities.

pub mod builtin;
pub mod registry;
pub mod tool;

pub use builtin::build_session_tools;
pub use registry::ToolRegistry;
pub use tool::*;
