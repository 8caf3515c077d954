//! Kernel module - job engine infrastructure.

pub mod jobs;
pub mod service_host;

pub use service_host::{Service, ServiceHost};
