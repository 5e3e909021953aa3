pub mod api;
pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod node;
pub mod scheduler;
pub mod shutdown;
pub mod store;
pub mod worker;

pub use error::{BoquitaError, Result};
