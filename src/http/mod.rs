//! Outbound HTTP with trace propagation.

pub mod client;

pub use client::{TracedHttpClient, headers_from_pairs};
