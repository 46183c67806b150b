//! Trace identity: minting, per-hop context and per-task binding.
//!
//! # Data Flow
//! ```text
//! inbound headers
//!     → context.rs (establish: reuse or mint trace id, mint request id)
//!     → scope.rs (bind to the request task)
//!     → logging / http client read scope::current()
//!     → context.rs (derive_child for each outbound hop)
//! ```

pub mod context;
pub mod ids;
pub mod scope;

pub use context::{
    DEPLOYMENT_ID_HEADER, PARENT_SPAN_ID_HEADER, REQUEST_ID_HEADER, RESPONSE_TIME_HEADER,
    SERVED_BY_HEADER, TRACE_ID_HEADER, TraceContext,
};
pub use ids::{IdGenerator, ParsedTraceId, is_header_safe, parse_trace_id};
pub use scope::{TeardownGuard, clear, current, derive_for_outbound_call, propagate};
