pub mod request_tracing;

pub use request_tracing::*;
