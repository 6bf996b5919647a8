mod config;
mod input_event;
mod logging;
mod tls;
mod transport;

pub mod client;
pub mod server;
