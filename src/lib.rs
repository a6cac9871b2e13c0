pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod node;
pub mod partition;
pub mod scheduler;
pub mod shutdown;
