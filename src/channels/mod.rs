//! Chat-platform buses and output frontends.

pub mod bus;
pub mod cli;
pub mod frontend;
pub mod telegram;

pub use bus::{BusContext, InboundMessage, MessageBus, MessageStream};
pub use cli::CliBus;
pub use frontend::{BusFrontend, Frontend, LogFrontend, TransientStatus};
pub use telegram::{TelegramBus, TelegramConfig};
