pub mod auth;
pub mod config;
pub mod error;
pub mod host;
pub mod images;
pub mod notify;
pub mod poller;
pub mod store;
pub mod transport;
