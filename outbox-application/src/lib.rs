pub mod command;
pub mod command_bus;
pub mod command_handler;
pub mod context;
pub mod dto;
pub mod error;
pub mod inmemory_command_bus;
pub mod inmemory_query_bus;
pub mod operator;
pub mod publisher;
pub mod query;
pub mod query_bus;
pub mod query_handler;

pub use context::AppContext;
pub use error::AppError;
pub use inmemory_command_bus::InMemoryCommandBus;
pub use inmemory_query_bus::InMemoryQueryBus;
pub use operator::{OutboxOperator, register_operator};
pub use publisher::EventPublisher;
