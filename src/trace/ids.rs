//! Identifier minting for trace and request scopes.
//!
//! Trace ids look like `<unix-seconds-hex>-<random-hex>-<service-short>` and
//! request ids like `<service-short>_<random-hex>`. Both carry 128 random bits
//! drawn from the thread-local CSPRNG, so minting never blocks and never needs
//! coordination with other processes.

use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Upper bound on identifier length accepted from the wire.
pub const MAX_ID_LEN: usize = 128;

const MAX_SHORT_LEN: usize = 16;
const DEFAULT_SHORT: &str = "svc";

/// Mints collision-resistant identifiers tagged with a service short name.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    service_short: Arc<str>,
}

impl IdGenerator {
    /// Create a generator with an explicit short name.
    ///
    /// The name is lowercased and stripped to `[a-z0-9-]`; an empty result
    /// falls back to `svc`.
    pub fn new(service_short: &str) -> Self {
        let cleaned: String = service_short
            .chars()
            .filter_map(|c| {
                let c = c.to_ascii_lowercase();
                (c.is_ascii_alphanumeric() || c == '-').then_some(c)
            })
            .take(MAX_SHORT_LEN)
            .collect();
        let short = cleaned.trim_matches('-');
        let short = if short.is_empty() { DEFAULT_SHORT } else { short };

        Self {
            service_short: Arc::from(short),
        }
    }

    /// Create a generator whose short name is derived from the service name.
    pub fn for_service(service_name: &str) -> Self {
        Self::new(&short_name_for(service_name))
    }

    pub fn service_short(&self) -> &str {
        &self.service_short
    }

    /// Mint a trace id for a new call chain.
    pub fn new_trace_id(&self) -> String {
        let issued_at = Utc::now().timestamp().max(0) as u64;
        format!(
            "{:x}-{:032x}-{}",
            issued_at,
            rand::random::<u128>(),
            self.service_short
        )
    }

    /// Mint a request id for one hop.
    pub fn new_request_id(&self) -> String {
        format!("{}_{:032x}", self.service_short, rand::random::<u128>())
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_SHORT)
    }
}

/// Derive the default short name: the first four alphanumeric characters.
pub fn short_name_for(service_name: &str) -> String {
    let short: String = service_name
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .take(4)
        .collect();

    if short.is_empty() {
        DEFAULT_SHORT.to_string()
    } else {
        short
    }
}

/// Whether a value can travel verbatim in an HTTP header.
pub fn is_header_safe(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_ID_LEN
        && value.bytes().all(|b| b.is_ascii_graphic())
}

/// Components of a trace id minted by [`IdGenerator::new_trace_id`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTraceId {
    pub issued_at: DateTime<Utc>,
    pub random: String,
    pub service_short: String,
}

/// Split a trace id back into its parts.
///
/// Returns `None` for ids minted elsewhere; they are still valid trace ids,
/// just opaque ones.
pub fn parse_trace_id(trace_id: &str) -> Option<ParsedTraceId> {
    let mut parts = trace_id.splitn(3, '-');
    let timestamp = parts.next()?;
    let random = parts.next()?;
    let service_short = parts.next()?;

    if random.is_empty()
        || service_short.is_empty()
        || !random.bytes().all(|b| b.is_ascii_hexdigit())
    {
        return None;
    }

    let seconds = i64::from_str_radix(timestamp, 16).ok()?;
    let issued_at = DateTime::from_timestamp(seconds, 0)?;

    Some(ParsedTraceId {
        issued_at,
        random: random.to_string(),
        service_short: service_short.to_string(),
    })
}
