pub mod bus_client;
pub mod config;
pub mod error;
pub mod http_client;
pub mod path;
pub mod plan;
pub mod services;
pub mod session_client;
