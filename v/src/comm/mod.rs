#[cfg(feature = "config")]
pub mod config;
pub mod tracing;
