pub mod config;
pub mod endpoint_key;
pub mod events;
pub mod message_handler;
pub mod node;

mod acceptor;
mod connection;
mod establishment;
mod node_driver;
mod registry;

#[cfg(test)] mod test_util;
